use serde::Serialize;
use serde_json::{Map, Value};
use shared::domain::CommandPath;

/// Outcome of the authorization check for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    #[default]
    Unchecked,
    Allowed,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasInfo {
    pub name: String,
    pub options: Map<String, Value>,
}

/// Stamped by the group once the handler has been resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub group_name: String,
    pub handler_name: String,
    pub handler_type: &'static str,
}

/// Resolved metadata for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescriptor {
    /// Command that was resolved; the alias target when reached through an alias.
    pub command: String,
    /// Command exactly as the caller sent it.
    pub original_command: String,
    pub namespace: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<AliasInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    access: AccessState,
}

impl CommandDescriptor {
    pub fn new(command: &str, path: CommandPath<'_>) -> Self {
        Self {
            command: command.to_string(),
            original_command: command.to_string(),
            namespace: path.namespace.to_string(),
            operation: path.operation.to_string(),
            alias: None,
            resolution: None,
            access: AccessState::Unchecked,
        }
    }

    pub fn access(&self) -> AccessState {
        self.access
    }

    pub fn is_allowed(&self) -> bool {
        self.access == AccessState::Allowed
    }

    /// Records the authorization decision. Only the first write sticks.
    pub(crate) fn record_access(&mut self, allowed: bool) -> AccessState {
        if self.access == AccessState::Unchecked {
            self.access = if allowed {
                AccessState::Allowed
            } else {
                AccessState::Denied
            };
        }
        self.access
    }

    /// Resource and operation the access-control adapter is asked about.
    ///
    /// With `on_aliases` set and an alias in play, the alias name's own
    /// segments are used. Alias names that do not split into two segments
    /// fall back to the resolved namespace/operation.
    pub fn access_target(&self, on_aliases: bool) -> (&str, &str) {
        if on_aliases {
            if let Some(path) = self
                .alias
                .as_ref()
                .and_then(|alias| CommandPath::split(&alias.name))
            {
                return (path.namespace, path.operation);
            }
        }
        (&self.namespace, &self.operation)
    }
}
