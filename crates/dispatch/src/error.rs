use serde::Serialize;
use serde_json::{json, Value};
use shared::error::{ErrorCode, ErrorPayload};
use thiserror::Error;

use crate::{descriptor::CommandDescriptor, options::ErrorFormatter};

const INVALID_PARAMS_MESSAGE: &str = "Please send valid parameters.";

/// Which policy produced an `ACCESS_DENIED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeniedBy {
    Acl { command: Box<CommandDescriptor> },
    AllowList(Vec<String>),
    DenyList(Vec<String>),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid command name: {message}")]
    InvalidCommandName {
        message: String,
        details: Option<Value>,
    },
    #[error("action {action_name} not found")]
    InvalidActionName { action_name: String },
    #[error("invalid params: {details}")]
    InvalidParams { details: Value },
    /// A bulk entry whose `options` do not parse; it fails only its own slot.
    #[error("invalid options for command {command}: {source}")]
    InvalidOptions {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("access denied for role {role}")]
    AccessDenied { role: String, denied_by: DeniedBy },
    /// Failure reported by the access-control adapter, kept as-is.
    #[error(transparent)]
    AccessControl(anyhow::Error),
    /// Failure raised by handler or group code.
    #[error("handler failed with {}", .0.error.code)]
    Handler(ErrorPayload),
}

impl DispatchError {
    pub fn handler(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler(ErrorPayload::new(code).with_message(message))
    }

    pub fn code(&self) -> &str {
        match self {
            Self::InvalidCommandName { .. } => ErrorCode::InvalidCommandName.as_str(),
            Self::InvalidActionName { .. } => ErrorCode::InvalidActionName.as_str(),
            Self::InvalidParams { .. } => ErrorCode::InvalidParams.as_str(),
            Self::InvalidOptions { .. } => ErrorCode::InvalidOptions.as_str(),
            Self::AccessDenied { .. } => ErrorCode::AccessDenied.as_str(),
            Self::AccessControl(_) => ErrorCode::AccessControlFailure.as_str(),
            Self::Handler(payload) => payload.code(),
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            Self::InvalidCommandName { message, .. } => Some(message.clone()),
            Self::InvalidActionName { action_name } => {
                Some(format!("Action {action_name} not found."))
            }
            Self::InvalidParams { .. } => Some(INVALID_PARAMS_MESSAGE.to_string()),
            Self::InvalidOptions { source, .. } => {
                Some(format!("Invalid command options: {source}"))
            }
            Self::AccessDenied { role, .. } => {
                Some(format!("This action not allowed for role {role}."))
            }
            Self::AccessControl(err) => Some(err.to_string()),
            Self::Handler(payload) => payload.error.message.clone(),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidCommandName { details, .. } => details.clone(),
            Self::InvalidActionName { action_name } => Some(json!({ "actionName": action_name })),
            Self::InvalidParams { details } => Some(details.clone()),
            Self::InvalidOptions { command, .. } => Some(json!({ "command": command })),
            Self::AccessDenied { role, denied_by } => Some(match denied_by {
                DeniedBy::Acl { command } => json!({ "currentRole": role, "command": command }),
                DeniedBy::AllowList(roles) => json!({ "currentRole": role, "allowRoles": roles }),
                DeniedBy::DenyList(roles) => json!({ "currentRole": role, "denyRoles": roles }),
            }),
            Self::AccessControl(_) => None,
            Self::Handler(payload) => payload.error.details.clone(),
        }
    }

    /// The error in the default `{error: {code, message?, details?}}` shape.
    pub fn payload(&self) -> ErrorPayload {
        let mut payload = ErrorPayload::new(self.code());
        payload.error.message = self.message();
        payload.error.details = self.details();
        payload
    }

    pub fn format_with(&self, formatter: &dyn ErrorFormatter) -> Value {
        formatter.format(self.code(), self.message().as_deref(), self.details())
    }
}

impl From<ErrorPayload> for DispatchError {
    fn from(value: ErrorPayload) -> Self {
        Self::Handler(value)
    }
}
