//! Tools backed by an external program

use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use tollgate_core::config::CommandToolConfig;
use tollgate_core::tools::{ToolError, ToolHandler, ToolOutput, ToolRegistry, require_str};
use tollgate_core::TollgateResult;

/// Replaced in each argument by the call's `query` string
pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Runs a configured program once per call.
///
/// The program is spawned directly, never through a shell, so the substituted
/// query stays a single argument.
#[derive(Debug, Clone)]
pub struct CommandTool {
    config: CommandToolConfig,
    description: String,
}

impl CommandTool {
    pub fn new(config: CommandToolConfig) -> TollgateResult<Self> {
        config.validate()?;
        let description = if config.description.is_empty() {
            format!("Runs `{}`", config.program)
        } else {
            config.description.clone()
        };
        Ok(Self {
            config,
            description,
        })
    }

    pub fn config(&self) -> &CommandToolConfig {
        &self.config
    }

    fn takes_query(&self) -> bool {
        self.config
            .args
            .iter()
            .any(|arg| arg.contains(QUERY_PLACEHOLDER))
    }

    fn build_args(&self, arguments: &Value) -> Result<Vec<String>, ToolError> {
        if !self.takes_query() {
            return Ok(self.config.args.clone());
        }
        let query = require_str(arguments, "query")?;
        Ok(self
            .config
            .args
            .iter()
            .map(|arg| arg.replace(QUERY_PLACEHOLDER, query))
            .collect())
    }

    fn truncate(&self, mut text: String) -> ToolOutput {
        let limit = self.config.max_output_bytes;
        if text.len() <= limit {
            return ToolOutput::text(text);
        }
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        ToolOutput::text(text).with_truncated(true)
    }
}

#[async_trait]
impl ToolHandler for CommandTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        if self.takes_query() {
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            })
        } else {
            json!({ "type": "object" })
        }
    }

    async fn call(
        &self,
        arguments: Value,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let args = self.build_args(&arguments)?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(tool = %self.config.name, program = %self.config.program, attempt, "spawning command");
        let child = cmd.spawn().map_err(|e| {
            ToolError::unavailable(format!(
                "failed to start '{}': {}",
                self.config.program, e
            ))
        })?;

        // Dropping the wait future kills the child
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ToolError::execution(format!(
                    "'{}' was cancelled",
                    self.config.name
                )));
            }
            output = child.wait_with_output() => output.map_err(|e| {
                ToolError::execution(format!("failed to collect output: {}", e))
            })?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(ToolError::execution(format!(
                "'{}' exited with {}: {}",
                self.config.program,
                code,
                stderr.trim()
            )));
        }

        Ok(self.truncate(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

/// Register one [`CommandTool`] per entry, returning how many were added
pub fn register_command_tools(
    registry: &mut ToolRegistry,
    configs: &[CommandToolConfig],
) -> TollgateResult<usize> {
    for config in configs {
        registry.register(Arc::new(CommandTool::new(config.clone())?))?;
    }
    Ok(configs.len())
}
