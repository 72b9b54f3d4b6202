use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single problem reported by a schema validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field (empty for the whole body)
    pub path: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result of running a schema over a request body.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOutcome {
    Valid(Value),
    Invalid(Vec<ValidationIssue>),
}

impl SchemaOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, SchemaOutcome::Valid(_))
    }
}
