//! Session orchestration and storage for tether.
//!
//! Provides:
//! - `Orchestrator` - Lifecycle state machine over repository, event
//!   store, and adapter registry
//! - `MemoryRepository` - In-memory session metadata storage

pub mod orchestrator;
pub mod repo;

pub use orchestrator::{CreateOptions, Orchestrator, OrchestratorConfig, OrchestratorError};
pub use repo::MemoryRepository;
