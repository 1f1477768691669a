use std::{collections::BTreeMap, fs, io::ErrorKind, path::Path, sync::Arc};

use anyhow::Context;
use dispatch::{AclRule, AliasEntry, OptionLayer, StaticAcl};
use serde::Deserialize;
use shared::domain::{ValidatorFormat, DEFAULT_ROLE};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AliasTarget {
    Command(String),
    Entry(AliasEntry),
}

impl From<AliasTarget> for AliasEntry {
    fn from(value: AliasTarget) -> Self {
        match value {
            AliasTarget::Command(command) => AliasEntry::new(command),
            AliasTarget::Entry(entry) => entry,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_role: String,
    pub check_access_on_aliases: bool,
    pub validator_format: ValidatorFormat,
    pub aliases: BTreeMap<String, AliasTarget>,
    /// Empty means no access-control adapter; role lists still apply.
    pub acl: Vec<AclRule>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "Greetings.show".to_string(),
            AliasTarget::Command("Hello.sayHello".to_string()),
        );
        Self {
            default_role: DEFAULT_ROLE.into(),
            check_access_on_aliases: false,
            validator_format: ValidatorFormat::default(),
            aliases,
            acl: Vec::new(),
        }
    }
}

impl Settings {
    /// Options the dispatcher injects over every call.
    pub fn option_layer(&self) -> OptionLayer {
        let mut layer = OptionLayer::default()
            .with_default_role(self.default_role.clone())
            .check_access_on_aliases(self.check_access_on_aliases)
            .with_validator_format(self.validator_format);
        if !self.acl.is_empty() {
            layer = layer.with_acl(Arc::new(StaticAcl::new(self.acl.clone())));
        }
        layer
    }
}

/// Defaults, then the TOML file at `path` when it exists, then `APP__*`
/// environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = read_settings_file(path)?;
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Settings::default()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    toml::from_str(&raw).with_context(|| format!("invalid settings file '{}'", path.display()))
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("APP__DEFAULT_ROLE") {
        settings.default_role = v;
    }

    if let Some(v) = var("APP__CHECK_ACCESS_ON_ALIASES") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.check_access_on_aliases = parsed;
        }
    }

    if let Some(v) = var("APP__VALIDATOR_FORMAT") {
        if let Ok(parsed) = serde_json::from_value(serde_json::Value::String(v)) {
            settings.validator_format = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
