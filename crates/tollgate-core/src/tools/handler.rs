//! Tool handler trait and its result types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::recovery::Retryable;

/// Failure reported by a tool handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The arguments do not match the tool's input schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The backing resource could not be reached
    #[error("Tool unavailable: {0}")]
    Unavailable(String),

    /// The tool ran and failed
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The tool's own deadline passed
    #[error("Tool execution timeout")]
    Timeout,
}

impl ToolError {
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

impl Retryable for ToolError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Successful tool result
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    /// Set when the output was cut at the tool's size limit
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
        }
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }
}

/// What `tools/list` reports for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A capability exposed to clients.
///
/// `call` may run several times for one client request when the pipeline
/// retries; `attempt` is zero-based. Long-running handlers should stop when
/// `cancel` fires.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `arguments` object
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn call(
        &self,
        arguments: Value,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Read a required string argument
pub fn require_str<'a>(arguments: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    match arguments.get(field) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ToolError::invalid_arguments(format!(
            "'{}' must be a string",
            field
        ))),
        None => Err(ToolError::invalid_arguments(format!(
            "missing required argument '{}'",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(ToolError::unavailable("spawn failed").is_retryable());
        assert!(ToolError::Timeout.is_retryable());
        assert!(!ToolError::execution("exit 1").is_retryable());
        assert!(!ToolError::invalid_arguments("query").is_retryable());
    }

    #[test]
    fn test_require_str() {
        let args = json!({"query": "Vec", "limit": 3});
        assert_eq!(require_str(&args, "query").unwrap(), "Vec");
        assert!(matches!(
            require_str(&args, "limit"),
            Err(ToolError::InvalidArguments(msg)) if msg.contains("must be a string")
        ));
        assert!(matches!(
            require_str(&args, "path"),
            Err(ToolError::InvalidArguments(msg)) if msg.contains("missing")
        ));
    }

    #[test]
    fn test_output_serialization() {
        let plain = serde_json::to_value(ToolOutput::text("ok")).unwrap();
        assert_eq!(plain, json!({"text": "ok"}));

        let cut = serde_json::to_value(ToolOutput::text("ok").with_truncated(true)).unwrap();
        assert_eq!(cut, json!({"text": "ok", "truncated": true}));
    }
}
