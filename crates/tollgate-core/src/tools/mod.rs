//! Tool layer: handlers, their registry and the dispatcher in front of the
//! resilience pipeline

mod dispatcher;
mod handler;
mod registry;

#[cfg(test)]
mod tests;

pub use dispatcher::ToolDispatcher;
pub use handler::{ToolDescriptor, ToolError, ToolHandler, ToolOutput, require_str};
pub use registry::ToolRegistry;
