//! Core abstractions for tether session orchestration.
//!
//! This crate provides the fundamental building blocks:
//! - `EventStore` - Append-only, per-session sequenced event log with
//!   pre-ready buffering and broadcast fan-out for reconnection support
//! - `EventSink` - Per-session recording handle handed to adapters
//! - `AdapterRegistry` - Closed kind-string to adapter lookup
//! - Repository and adapter traits plus the shared error taxonomy

pub mod error;
pub mod event_store;
pub mod registry;
pub mod sink;
pub mod traits;
pub mod types;

pub use error::{AdapterError, RepositoryError};
pub use event_store::{EventStore, EventStoreConfig};
pub use registry::{AdapterRegistry, UnknownKind};
pub use sink::EventSink;
pub use traits::{ProcessHandle, SessionAdapter, SessionRepository, SessionUpdate, SpawnRequest};
pub use types::{
    AGENT_SESSION_KEY, EventChannel, EventRecord, Session, SessionDraft, SessionFilter, SessionId,
    SessionStatus,
};
