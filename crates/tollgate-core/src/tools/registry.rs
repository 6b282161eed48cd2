//! Tool registry

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{ToolDescriptor, ToolHandler};
use crate::error::{TollgateError, TollgateResult};

/// Name to handler map, filled at startup and read-only afterwards
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique and usable as a rate-limit key part
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) -> TollgateResult<()> {
        let name = tool.name();
        if name.trim().is_empty() || name.contains(':') {
            return Err(TollgateError::config(format!(
                "invalid tool name '{}'",
                name
            )));
        }
        if self.tools.contains_key(name) {
            return Err(TollgateError::config(format!(
                "tool '{}' is already registered",
                name
            )));
        }
        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(name.to_string(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors sorted by name
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<_> = self.tools.values().map(|t| t.descriptor()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
