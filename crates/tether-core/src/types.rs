//! Session and event types.

use std::{
    collections::HashMap,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Session identifier. Opaque on the wire.
pub type SessionId = Uuid;

/// Metadata key under which an adapter-issued external session id is
/// persisted (used by the agent kind for resume).
pub const AGENT_SESSION_KEY: &str = "agent_session_id";

/// Session status state machine.
///
/// `Pending -> Running -> {Paused, Closed, Error}`; `Paused -> Running`
/// via resume; any state may reach `Error` on unrecoverable adapter
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but the adapter has not confirmed a live process yet.
    Pending,
    /// A live process is attached.
    Running,
    /// Process stopped but the session may be resumed.
    Paused,
    /// Terminal state; the session will never run again.
    Closed,
    /// Unrecoverable adapter failure.
    Error,
}

impl SessionStatus {
    /// Whether a session in this status may be resumed.
    #[must_use]
    pub const fn resumable(self) -> bool {
        matches!(self, Self::Pending | Self::Paused | Self::Error)
    }
}

/// Draft handed to the repository when creating a session.
#[derive(Debug, Clone)]
pub struct SessionDraft {
    /// Session kind, resolved against the adapter registry.
    pub kind: String,
    /// Working directory for the session's process.
    pub workspace: PathBuf,
    /// Arbitrary metadata; opaque to the core.
    pub metadata: HashMap<String, Value>,
}

/// Persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Session kind (e.g. "process", "agent").
    pub kind: String,
    /// Current status.
    pub status: SessionStatus,
    /// Working directory for the session's process.
    pub workspace: PathBuf,
    /// Arbitrary metadata; opaque to the core.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Session filter for list queries.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Filter by status.
    pub status: Option<SessionStatus>,
    /// Filter by kind.
    pub kind: Option<String>,
    /// Limit results.
    pub limit: Option<usize>,
}

/// Event channel classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    Stdout,
    Stderr,
    System,
    Input,
}

/// One recorded unit of session activity, uniquely ordered per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Owning session.
    pub session_id: SessionId,
    /// Per-session monotonic sequence, starting at 1.
    pub sequence: u64,
    /// Channel classification.
    pub channel: EventChannel,
    /// Event kind (e.g. "output", "input", "resized", "exited").
    pub kind: String,
    /// Event payload; byte payloads are base64-encoded under "data".
    pub payload: Value,
    /// Record timestamp (Unix epoch milliseconds).
    pub timestamp: i64,
}

impl EventRecord {
    /// Approximate in-memory size, used for retention accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const RECORD_OVERHEAD: usize = 96;
        RECORD_OVERHEAD + self.kind.len() + approx_value_bytes(&self.payload)
    }
}

fn approx_value_bytes(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(approx_value_bytes).sum::<usize>() + 8,
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.len() + approx_value_bytes(v))
            .sum::<usize>()
            + 8,
    }
}

/// Current Unix timestamp in seconds.
#[must_use]
pub fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Current Unix timestamp in milliseconds.
#[must_use]
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
