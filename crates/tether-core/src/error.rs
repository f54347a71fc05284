//! Shared error taxonomy.
//!
//! Repository and adapter failures are fatal for create/resume; input
//! and resize failures are surfaced to the caller without a status
//! change so they can be retried.

use thiserror::Error;

use crate::types::SessionId;

/// Persistence failure. Fatal to the calling operation; no silent retry.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("repository error: {0}")]
    Internal(String),
}

/// Adapter failure.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The external process could never be started.
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("executable not found: {0}")]
    ExecutableNotFound(String),
    /// Transient I/O failure on a live process; callers may retry.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The capability is not implemented by this session kind.
    #[error("{0} is not supported by this session kind")]
    Unsupported(&'static str),
    /// The underlying process has already exited or been closed.
    #[error("process is closed")]
    Closed,
    #[error("invalid session options: {0}")]
    InvalidOptions(String),
}

impl AdapterError {
    /// Whether the caller may reasonably retry the failed call.
    ///
    /// Spawn-path failures are final for that attempt; I/O hiccups on a
    /// live process are not.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
