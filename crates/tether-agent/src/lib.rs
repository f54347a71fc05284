//! Coding-agent CLI adapter.
//!
//! Provides:
//! - `AgentAdapter` - The "agent" session kind (external coding-agent
//!   CLI with newline-delimited JSON stdio, no resize)
//! - `AgentCommand` - Command-line configuration for the agent tool

pub mod adapter;
pub mod command;

pub use adapter::AgentAdapter;
pub use command::{AgentCommand, CommandParseError};
