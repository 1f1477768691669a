use serde_json::{Map, Value};
use uuid::Uuid;

use crate::descriptor::CommandDescriptor;

/// Ambient state for one invocation: the caller's opaque payload plus the
/// descriptor attached during dispatch.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    caller: Map<String, Value>,
    pub command: Option<CommandDescriptor>,
    pub bulk: bool,
    pub invocation_id: Uuid,
}

impl ExecutionContext {
    pub fn new(caller: Map<String, Value>) -> Self {
        Self {
            caller,
            command: None,
            bulk: false,
            invocation_id: Uuid::new_v4(),
        }
    }

    /// Context whose caller payload is `{ "role": role }`.
    pub fn with_role(role: impl Into<String>) -> Self {
        let mut caller = Map::new();
        caller.insert("role".into(), Value::String(role.into()));
        Self::new(caller)
    }

    pub fn caller(&self) -> &Map<String, Value> {
        &self.caller
    }

    pub fn caller_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.caller
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.caller.get(key)
    }

    pub fn descriptor(&self) -> Option<&CommandDescriptor> {
        self.command.as_ref()
    }

    /// Shallow copy for a new invocation: same caller payload and bulk flag,
    /// fresh invocation id, no descriptor.
    pub fn fork(&self) -> Self {
        Self {
            caller: self.caller.clone(),
            command: None,
            bulk: self.bulk,
            invocation_id: Uuid::new_v4(),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl From<Map<String, Value>> for ExecutionContext {
    fn from(caller: Map<String, Value>) -> Self {
        Self::new(caller)
    }
}

/// Reads `role`, then `user.role`, from the caller payload.
pub fn default_role_lookup(ctx: &ExecutionContext) -> Option<String> {
    if let Some(role) = ctx.get("role").and_then(Value::as_str) {
        return Some(role.to_string());
    }
    ctx.get("user")
        .and_then(|user| user.get("role"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
