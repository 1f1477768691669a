use std::{fmt, sync::Arc};

use serde::Deserialize;
use serde_json::{Map, Value};
use shared::domain::{ValidatorFormat, DEFAULT_ROLE};

use crate::{
    access::{AccessControl, RolePolicy},
    context::{default_role_lookup, ExecutionContext},
    error::DispatchError,
    validation::{ConstraintValidator, Validator},
};

/// Builds the value a failed invocation resolves to.
pub trait ErrorFormatter: Send + Sync {
    fn format(&self, code: &str, message: Option<&str>, details: Option<Value>) -> Value;
}

impl<F> ErrorFormatter for F
where
    F: Fn(&str, Option<&str>, Option<Value>) -> Value + Send + Sync,
{
    fn format(&self, code: &str, message: Option<&str>, details: Option<Value>) -> Value {
        self(code, message, details)
    }
}

/// `{ "error": { "code", "message"?, "details"? } }`
pub struct DefaultErrorFormatter;

impl ErrorFormatter for DefaultErrorFormatter {
    fn format(&self, code: &str, message: Option<&str>, details: Option<Value>) -> Value {
        let mut error = Map::new();
        error.insert("code".into(), Value::String(code.to_string()));
        if let Some(message) = message {
            error.insert("message".into(), Value::String(message.to_string()));
        }
        if let Some(details) = details {
            error.insert("details".into(), details);
        }
        let mut payload = Map::new();
        payload.insert("error".into(), Value::Object(error));
        Value::Object(payload)
    }
}

pub type RoleLookup = Arc<dyn Fn(&ExecutionContext) -> Option<String> + Send + Sync>;

/// One layer of per-invocation options. Unset fields defer to lower layers.
///
/// Layers merge in this order, later wins: built-in defaults, group, call
/// site, dispatcher-injected.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionLayer {
    pub validator_format: Option<ValidatorFormat>,
    pub default_role: Option<String>,
    pub check_access_on_aliases: Option<bool>,
    pub allow_roles: Option<Vec<String>>,
    pub deny_roles: Option<Vec<String>>,
    #[serde(skip)]
    pub error_formatter: Option<Arc<dyn ErrorFormatter>>,
    #[serde(skip)]
    pub acl: Option<Arc<dyn AccessControl>>,
    #[serde(skip)]
    pub validator: Option<Arc<dyn Validator>>,
    #[serde(skip)]
    pub role_lookup: Option<RoleLookup>,
    /// Unrecognized keys, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OptionLayer {
    pub fn from_map(map: Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(map))
    }

    pub fn with_validator_format(mut self, format: ValidatorFormat) -> Self {
        self.validator_format = Some(format);
        self
    }

    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = Some(role.into());
        self
    }

    pub fn check_access_on_aliases(mut self, enabled: bool) -> Self {
        self.check_access_on_aliases = Some(enabled);
        self
    }

    pub fn allow_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn deny_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_error_formatter(mut self, formatter: Arc<dyn ErrorFormatter>) -> Self {
        self.error_formatter = Some(formatter);
        self
    }

    pub fn with_acl(mut self, acl: Arc<dyn AccessControl>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_role_lookup(mut self, lookup: RoleLookup) -> Self {
        self.role_lookup = Some(lookup);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// `self` layered on top of `base`.
    pub fn merged_over(&self, base: &OptionLayer) -> OptionLayer {
        let mut extra = base.extra.clone();
        extra.extend(self.extra.clone());
        OptionLayer {
            validator_format: self.validator_format.or(base.validator_format),
            default_role: self.default_role.clone().or_else(|| base.default_role.clone()),
            check_access_on_aliases: self
                .check_access_on_aliases
                .or(base.check_access_on_aliases),
            allow_roles: self.allow_roles.clone().or_else(|| base.allow_roles.clone()),
            deny_roles: self.deny_roles.clone().or_else(|| base.deny_roles.clone()),
            error_formatter: self
                .error_formatter
                .clone()
                .or_else(|| base.error_formatter.clone()),
            acl: self.acl.clone().or_else(|| base.acl.clone()),
            validator: self.validator.clone().or_else(|| base.validator.clone()),
            role_lookup: self.role_lookup.clone().or_else(|| base.role_lookup.clone()),
            extra,
        }
    }
}

impl fmt::Debug for OptionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionLayer")
            .field("validator_format", &self.validator_format)
            .field("default_role", &self.default_role)
            .field("check_access_on_aliases", &self.check_access_on_aliases)
            .field("allow_roles", &self.allow_roles)
            .field("deny_roles", &self.deny_roles)
            .field("error_formatter", &self.error_formatter.is_some())
            .field("acl", &self.acl.is_some())
            .field("validator", &self.validator.is_some())
            .field("role_lookup", &self.role_lookup.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

/// Options snapshot for one invocation, resolved from layers once and not
/// changed afterward.
#[derive(Clone)]
pub struct Options {
    pub validator_format: ValidatorFormat,
    pub default_role: String,
    pub check_access_on_aliases: bool,
    pub allow_roles: Option<Vec<String>>,
    pub deny_roles: Option<Vec<String>>,
    pub error_formatter: Arc<dyn ErrorFormatter>,
    pub acl: Option<Arc<dyn AccessControl>>,
    pub validator: Arc<dyn Validator>,
    pub role_lookup: RoleLookup,
    pub extra: Map<String, Value>,
    /// Role lists declared by the owning group; handlers fall back to these.
    pub(crate) group_policy: RolePolicy,
}

impl Options {
    /// Resolves `layers`, given lowest priority first, over the built-in
    /// defaults.
    pub fn resolve<'a, I>(layers: I) -> Self
    where
        I: IntoIterator<Item = &'a OptionLayer>,
    {
        let merged = layers
            .into_iter()
            .fold(OptionLayer::default(), |acc, layer| layer.merged_over(&acc));

        Self {
            validator_format: merged.validator_format.unwrap_or_default(),
            default_role: merged
                .default_role
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            check_access_on_aliases: merged.check_access_on_aliases.unwrap_or(false),
            allow_roles: merged.allow_roles,
            deny_roles: merged.deny_roles,
            error_formatter: merged
                .error_formatter
                .unwrap_or_else(|| Arc::new(DefaultErrorFormatter)),
            acl: merged.acl,
            validator: merged
                .validator
                .unwrap_or_else(|| Arc::new(ConstraintValidator)),
            role_lookup: merged
                .role_lookup
                .unwrap_or_else(|| Arc::new(default_role_lookup)),
            extra: merged.extra,
            group_policy: RolePolicy::default(),
        }
    }

    /// Acting role: the lookup result, or the configured default role.
    pub fn role_for(&self, ctx: &ExecutionContext) -> String {
        (self.role_lookup)(ctx).unwrap_or_else(|| self.default_role.clone())
    }

    pub fn format_error(&self, err: &DispatchError) -> Value {
        err.format_with(self.error_formatter.as_ref())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::resolve(std::iter::empty())
    }
}
