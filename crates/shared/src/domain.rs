use serde::{Deserialize, Serialize};

/// Role assumed when the caller context carries none.
pub const DEFAULT_ROLE: &str = "UNAUTHORIZED";

/// The two significant segments of a `<namespace>.<operation>` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandPath<'a> {
    pub namespace: &'a str,
    pub operation: &'a str,
}

impl<'a> CommandPath<'a> {
    /// Splits on `.` and keeps the first two segments. Anything after the
    /// operation segment is ignored.
    pub fn split(command: &'a str) -> Option<Self> {
        let mut parts = command.split('.');
        let namespace = parts.next()?;
        let operation = parts.next()?;
        Some(Self {
            namespace,
            operation,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidatorFormat {
    /// `field -> first violation message`
    #[default]
    ErrorFormatter,
    /// `field -> [violation messages]`
    Grouped,
    /// `[violation messages]`
    Flat,
}
