use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCommandName,
    InvalidActionName,
    InvalidParams,
    InvalidOptions,
    AccessDenied,
    AccessControlFailure,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCommandName => "INVALID_COMMAND_NAME",
            Self::InvalidActionName => "INVALID_ACTION_NAME",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::InvalidOptions => "INVALID_OPTIONS",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::AccessControlFailure => "ACCESS_CONTROL_FAILURE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// `{ "error": { "code", "message"?, "details"? } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: ErrorBody,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: None,
                details: None,
            },
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn code(&self) -> &str {
        &self.error.code
    }

    /// Reads a payload back out of a formatted value. Returns `None` when the
    /// value is not error-shaped.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("error")?;
        serde_json::from_value(value.clone()).ok()
    }
}
