//! Repository and adapter traits.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    error::{AdapterError, RepositoryError},
    sink::EventSink,
    types::{Session, SessionDraft, SessionFilter, SessionId, SessionStatus},
};

/// Trait for session metadata persistence backends.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a new session in `Pending` status.
    async fn create(&self, draft: SessionDraft) -> Result<Session, RepositoryError>;

    /// Get a session by id.
    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError>;

    /// Update session status.
    async fn update_status(&self, id: SessionId, status: SessionStatus)
    -> Result<(), RepositoryError>;

    /// Merge a metadata patch into the session record.
    async fn update_metadata(
        &self,
        id: SessionId,
        patch: HashMap<String, Value>,
    ) -> Result<(), RepositoryError>;

    /// Startup crash-recovery reconciliation: every session recorded as
    /// `Pending` or `Running` is moved to `Paused`.
    async fn mark_all_stopped(&self) -> Result<(), RepositoryError>;

    /// List sessions, newest first.
    async fn list(&self, filter: SessionFilter) -> Result<Vec<Session>, RepositoryError>;
}

/// Out-of-band facts an adapter reports while its process runs.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// The external agent tool issued its own session id, needed later
    /// for resume.
    AgentSession { id: String },
    /// The process exited on its own.
    Exited { code: Option<i32> },
}

/// Everything an adapter needs to bring up a process for one session.
pub struct SpawnRequest {
    pub session_id: SessionId,
    /// Working directory for the spawned process.
    pub workspace: std::path::PathBuf,
    /// Kind-specific options; opaque to the orchestrator.
    pub options: HashMap<String, Value>,
    /// Initial terminal size.
    pub cols: u16,
    pub rows: u16,
    /// Recording path for everything the process emits.
    pub sink: EventSink,
    /// Channel for out-of-band updates (agent session id, exit).
    pub updates: mpsc::UnboundedSender<SessionUpdate>,
}

/// Live process handle owned by the orchestrator's active table.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Write input bytes to the process.
    async fn input(&self, data: &[u8]) -> Result<(), AdapterError>;

    /// Resize the terminal. Optional capability.
    async fn resize(&self, cols: u16, rows: u16) -> Result<(), AdapterError> {
        let _ = (cols, rows);
        Err(AdapterError::Unsupported("resize"))
    }

    /// Terminate the process. Must be safe to call more than once.
    async fn close(&self) -> Result<(), AdapterError>;
}

/// Polymorphic capability binding one session kind to real processes.
#[async_trait]
pub trait SessionAdapter: Send + Sync {
    /// Kind string this adapter is registered under.
    fn kind(&self) -> &'static str;

    /// Whether handles produced by this adapter accept `resize`.
    fn supports_resize(&self) -> bool {
        false
    }

    /// Spawn a fresh process for a new session.
    async fn create(&self, req: SpawnRequest) -> Result<Box<dyn ProcessHandle>, AdapterError>;

    /// Bring a previously stopped session back up, using whatever the
    /// session record carries (e.g. a stored agent session id).
    async fn resume(
        &self,
        session: &Session,
        req: SpawnRequest,
    ) -> Result<Box<dyn ProcessHandle>, AdapterError>;
}
