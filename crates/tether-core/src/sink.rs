//! Per-session event recording handle.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Value, json};

use crate::{
    event_store::EventStore,
    types::{EventChannel, SessionId},
};

/// Cloneable recording handle bound to one session's log.
///
/// This is the single writer for its session: the orchestrator creates
/// one sink per active process and hands clones to the adapter's I/O
/// tasks. Pushes are synchronous and safe to call from blocking reader
/// threads.
#[derive(Clone)]
pub struct EventSink {
    store: Arc<EventStore>,
    session_id: SessionId,
}

impl EventSink {
    /// Bind a sink to a session's log.
    #[must_use]
    pub fn new(store: Arc<EventStore>, session_id: SessionId) -> Self {
        Self { store, session_id }
    }

    /// Session this sink records for.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Record an event with an explicit channel and kind. Returns the
    /// assigned sequence.
    pub fn record(&self, channel: EventChannel, kind: &str, payload: Value) -> u64 {
        self.store.record(self.session_id, channel, kind, payload)
    }

    /// Record a stdout chunk.
    pub fn push_stdout(&self, data: &[u8]) -> u64 {
        self.record(
            EventChannel::Stdout,
            "output",
            json!({ "data": BASE64.encode(data) }),
        )
    }

    /// Record a stderr chunk.
    pub fn push_stderr(&self, data: &[u8]) -> u64 {
        self.record(
            EventChannel::Stderr,
            "output",
            json!({ "data": BASE64.encode(data) }),
        )
    }

    /// Record client input, for audit and replay fidelity.
    pub fn push_input(&self, data: &[u8]) -> u64 {
        self.record(
            EventChannel::Input,
            "input",
            json!({ "data": BASE64.encode(data) }),
        )
    }

    /// Record a system event (e.g. "resized", "exited", "resumed").
    pub fn push_system(&self, kind: &str, payload: Value) -> u64 {
        self.record(EventChannel::System, kind, payload)
    }
}
