//! Tool implementations for Tollgate
//!
//! Tools here are handlers the server registers at startup. Today that means
//! external programs described in configuration.

pub mod command;

pub use command::{CommandTool, QUERY_PLACEHOLDER, register_command_tools};
