//! Pseudo-terminal process adapter.
//!
//! Provides:
//! - `ProcessAdapter` - The "process" session kind (interactive shell in
//!   a PTY, resize-capable)
//! - Shell detection utilities for Unix

pub mod adapter;
pub mod shell;

pub use adapter::ProcessAdapter;
pub use shell::{UnixShell, expand_workspace, resolve_executable};
