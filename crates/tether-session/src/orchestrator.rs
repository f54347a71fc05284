//! Session orchestrator: the lifecycle state machine.
//!
//! One orchestrator instance owns the active-process table and drives
//! every status transition. Adapters never touch the repository; they
//! report through their event sink and update channel, which keeps the
//! per-session single-writer invariant intact.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use serde_json::{Value, json};
use tether_core::{
    AdapterError, AdapterRegistry, EventSink, EventStore, ProcessHandle, RepositoryError, Session,
    SessionAdapter, SessionDraft, SessionFilter, SessionId, SessionRepository, SessionStatus,
    SessionUpdate, SpawnRequest, UnknownKind,
    types::AGENT_SESSION_KEY,
};
use tokio::sync::{RwLock, mpsc};

/// Orchestrator error.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("session {id} is {status:?} and cannot {op}")]
    InvalidState {
        id: SessionId,
        status: SessionStatus,
        op: &'static str,
    },
    #[error("no active process for session {0}")]
    NoActiveProcess(SessionId),
    #[error("{op} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        timeout: Duration,
    },
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on adapter create/resume calls. Elapse is a spawn
    /// failure, never a half-registered session.
    pub spawn_timeout: Duration,
    /// Terminal size used when the options carry none.
    pub default_cols: u16,
    pub default_rows: u16,
    /// Drop the session's event log when it is closed. Off by default
    /// so closed sessions stay replayable for late attachments.
    pub drop_log_on_close: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            spawn_timeout: Duration::from_secs(30),
            default_cols: 80,
            default_rows: 24,
            drop_log_on_close: false,
        }
    }
}

/// Options for creating a session.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Working directory for the session's process.
    pub workspace: PathBuf,
    /// Kind-specific options, stored as session metadata. Conventional
    /// keys: "shell", "cols", "rows".
    pub options: HashMap<String, Value>,
}

impl CreateOptions {
    #[must_use]
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            options: HashMap::new(),
        }
    }
}

/// In-memory linkage between a session id and its live process. Never
/// persisted; at most one exists per session.
struct ActiveProcess {
    handle: Arc<dyn ProcessHandle>,
    supports_resize: bool,
}

type ActiveTable = Arc<RwLock<HashMap<SessionId, ActiveProcess>>>;

/// Top-level coordinator for session lifecycle, input, and shutdown.
pub struct Orchestrator {
    repo: Arc<dyn SessionRepository>,
    registry: AdapterRegistry,
    events: Arc<EventStore>,
    active: ActiveTable,
    cfg: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator with default configuration.
    #[must_use]
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        registry: AdapterRegistry,
        events: Arc<EventStore>,
    ) -> Self {
        Self::with_config(repo, registry, events, OrchestratorConfig::default())
    }

    /// Create an orchestrator with explicit configuration.
    #[must_use]
    pub fn with_config(
        repo: Arc<dyn SessionRepository>,
        registry: AdapterRegistry,
        events: Arc<EventStore>,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            repo,
            registry,
            events,
            active: Arc::new(RwLock::new(HashMap::new())),
            cfg,
        }
    }

    /// The event store backing this orchestrator's sessions.
    #[must_use]
    pub fn events(&self) -> Arc<EventStore> {
        Arc::clone(&self.events)
    }

    /// Startup crash-recovery reconciliation: sessions persisted as
    /// running by a previous process are moved to `Paused`.
    ///
    /// # Errors
    /// Returns the repository error if reconciliation fails.
    pub async fn reconcile_startup(&self) -> Result<(), OrchestratorError> {
        self.repo.mark_all_stopped().await?;
        Ok(())
    }

    /// Create a new session and bring its process up.
    ///
    /// On any failure in this path the session status becomes `Error`,
    /// buffered events are discarded, and the error is returned — no
    /// orphaned state.
    ///
    /// # Errors
    /// Unknown kind, repository failure, adapter spawn failure, timeout.
    pub async fn create_session(
        &self,
        kind: &str,
        opts: CreateOptions,
    ) -> Result<Session, OrchestratorError> {
        let draft = SessionDraft {
            kind: kind.to_string(),
            workspace: opts.workspace,
            metadata: opts.options,
        };
        let session = self.repo.create(draft).await?;

        let adapter = match self.registry.get(kind) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.fail_session(session.id).await;
                return Err(e.into());
            }
        };

        self.activate(&adapter, &session, false).await?;
        self.require_session(session.id).await
    }

    /// Resume a stopped session.
    ///
    /// Resuming a session that is already running is a no-op success; a
    /// second process is never created. `Closed` sessions are terminal.
    /// `Error` sessions may re-enter the lifecycle through this path.
    ///
    /// # Errors
    /// Unknown session, terminal status, adapter resume failure, timeout.
    pub async fn resume_session(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        let session = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))?;

        if self.active.read().await.contains_key(&id) {
            tracing::debug!(session_id = %id, "resume on a running session is a no-op");
            return Ok(session);
        }

        if !session.status.resumable() {
            return Err(OrchestratorError::InvalidState {
                id,
                status: session.status,
                op: "resume",
            });
        }

        let adapter = self.registry.get(&session.kind)?;
        self.activate(&adapter, &session, true).await?;
        self.require_session(id).await
    }

    /// Write input to a session's process and record it for replay.
    /// Returns the sequence of the recorded input event.
    ///
    /// Failures surface without changing session status; callers may
    /// retry transient I/O errors.
    ///
    /// # Errors
    /// No active process, or adapter write failure.
    pub async fn send_input(&self, id: SessionId, data: &[u8]) -> Result<u64, OrchestratorError> {
        let handle = self.handle_for(id).await?;
        handle.input(data).await?;
        Ok(self.sink(id).push_input(data))
    }

    /// Resize a session's terminal. Records a `system/resized` event.
    ///
    /// # Errors
    /// No active process, unsupported kind, or adapter failure.
    pub async fn resize(
        &self,
        id: SessionId,
        cols: u16,
        rows: u16,
    ) -> Result<u64, OrchestratorError> {
        let (handle, supports_resize) = {
            let active = self.active.read().await;
            let entry = active
                .get(&id)
                .ok_or(OrchestratorError::NoActiveProcess(id))?;
            (Arc::clone(&entry.handle), entry.supports_resize)
        };
        if !supports_resize {
            return Err(AdapterError::Unsupported("resize").into());
        }
        handle.resize(cols, rows).await?;
        Ok(self
            .sink(id)
            .push_system("resized", json!({ "cols": cols, "rows": rows })))
    }

    /// Close a session. Never fails and is idempotent: adapter errors
    /// are logged, and the session always reaches `Closed`.
    pub async fn close_session(&self, id: SessionId) {
        let removed = self.active.write().await.remove(&id);
        if let Some(active) = removed {
            if let Err(e) = active.handle.close().await {
                tracing::warn!(session_id = %id, "error closing session process: {e}");
            }
        }
        self.events.clear_buffer(id);
        if self.cfg.drop_log_on_close {
            self.events.remove(id);
        }
        match self.repo.update_status(id, SessionStatus::Closed).await {
            Ok(()) | Err(RepositoryError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(session_id = %id, "failed to persist closed status: {e}");
            }
        }
    }

    /// Stop a session's process while keeping it resumable.
    ///
    /// # Errors
    /// No active process, or repository failure.
    pub async fn pause_session(&self, id: SessionId) -> Result<(), OrchestratorError> {
        let removed = self
            .active
            .write()
            .await
            .remove(&id)
            .ok_or(OrchestratorError::NoActiveProcess(id))?;

        // Status first: the exit watcher skips sessions that already
        // left Running.
        self.repo.update_status(id, SessionStatus::Paused).await?;
        if let Err(e) = removed.handle.close().await {
            tracing::warn!(session_id = %id, "error stopping paused session process: {e}");
        }
        Ok(())
    }

    /// Close every active process. Process shutdown path; sessions are
    /// left `Paused` so a restart can resume them.
    pub async fn cleanup(&self) {
        let drained: Vec<(SessionId, ActiveProcess)> =
            self.active.write().await.drain().collect();
        for (id, active) in drained {
            if let Err(e) = self.repo.update_status(id, SessionStatus::Paused).await {
                tracing::warn!(session_id = %id, "failed to persist paused status: {e}");
            }
            if let Err(e) = active.handle.close().await {
                tracing::warn!(session_id = %id, "error closing session process: {e}");
            }
        }
    }

    /// Fetch a session record.
    ///
    /// # Errors
    /// Unknown session or repository failure.
    pub async fn get_session(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        self.require_session(id).await
    }

    /// List sessions.
    ///
    /// # Errors
    /// Repository failure.
    pub async fn list_sessions(
        &self,
        filter: SessionFilter,
    ) -> Result<Vec<Session>, OrchestratorError> {
        Ok(self.repo.list(filter).await?)
    }

    /// Whether a session currently has a live process.
    pub async fn is_active(&self, id: SessionId) -> bool {
        self.active.read().await.contains_key(&id)
    }

    fn sink(&self, id: SessionId) -> EventSink {
        EventSink::new(Arc::clone(&self.events), id)
    }

    async fn handle_for(&self, id: SessionId) -> Result<Arc<dyn ProcessHandle>, OrchestratorError> {
        self.active
            .read()
            .await
            .get(&id)
            .map(|a| Arc::clone(&a.handle))
            .ok_or(OrchestratorError::NoActiveProcess(id))
    }

    async fn require_session(&self, id: SessionId) -> Result<Session, OrchestratorError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    fn dimension(options: &HashMap<String, Value>, key: &str, default: u16) -> u16 {
        options
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(default)
    }

    /// Shared create/resume path: buffer, spawn under timeout, register,
    /// flush, mark running. Rolls back on any failure.
    async fn activate(
        &self,
        adapter: &Arc<dyn SessionAdapter>,
        session: &Session,
        resume: bool,
    ) -> Result<(), OrchestratorError> {
        let op: &'static str = if resume { "resume" } else { "create" };
        let id = session.id;

        self.events.start_buffering(id);

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let req = SpawnRequest {
            session_id: id,
            workspace: session.workspace.clone(),
            options: session.metadata.clone(),
            cols: Self::dimension(&session.metadata, "cols", self.cfg.default_cols),
            rows: Self::dimension(&session.metadata, "rows", self.cfg.default_rows),
            sink: self.sink(id),
            updates: updates_tx,
        };

        let spawn = async {
            if resume {
                adapter.resume(session, req).await
            } else {
                adapter.create(req).await
            }
        };

        let handle = match tokio::time::timeout(self.cfg.spawn_timeout, spawn).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                tracing::error!(session_id = %id, op, "adapter spawn failed: {e}");
                self.roll_back_failed_spawn(id).await;
                return Err(e.into());
            }
            Err(_) => {
                self.roll_back_failed_spawn(id).await;
                return Err(OrchestratorError::Timeout {
                    op,
                    timeout: self.cfg.spawn_timeout,
                });
            }
        };

        {
            let mut active = self.active.write().await;
            if active.contains_key(&id) {
                drop(active);
                // A concurrent activation won the race; there must never
                // be a second live process for this session.
                tracing::warn!(session_id = %id, "discarding duplicate process after activation race");
                // Our start_buffering call may have re-buffered the
                // winner's output; commit it rather than dropping it.
                self.events.flush_buffer(id);
                let handle: Arc<dyn ProcessHandle> = Arc::from(handle);
                if let Err(e) = handle.close().await {
                    tracing::debug!(session_id = %id, "error closing duplicate process: {e}");
                }
                return Ok(());
            }
            active.insert(
                id,
                ActiveProcess {
                    handle: Arc::from(handle),
                    supports_resize: adapter.supports_resize(),
                },
            );
        }

        self.spawn_update_watcher(id, updates_rx);
        self.events.flush_buffer(id);

        if let Err(e) = self.repo.update_status(id, SessionStatus::Running).await {
            // Late failure: the process is up but the session cannot be
            // marked running. Tear everything down again.
            if let Some(active) = self.active.write().await.remove(&id) {
                if let Err(close_err) = active.handle.close().await {
                    tracing::debug!(session_id = %id, "error closing process during rollback: {close_err}");
                }
            }
            self.fail_session(id).await;
            return Err(e.into());
        }

        tracing::info!(session_id = %id, kind = %session.kind, op, "session running");
        Ok(())
    }

    /// Rollback after a failed spawn. If a concurrent activation won
    /// the race in the meantime, its live process and status are left
    /// untouched: our `start_buffering` call may have re-buffered the
    /// winner's output, so the buffer is flushed rather than cleared.
    async fn roll_back_failed_spawn(&self, id: SessionId) {
        if self.active.read().await.contains_key(&id) {
            tracing::debug!(
                session_id = %id,
                "spawn failed after a concurrent activation won; leaving its state intact"
            );
            self.events.flush_buffer(id);
            return;
        }
        self.fail_session(id).await;
    }

    async fn fail_session(&self, id: SessionId) {
        self.events.clear_buffer(id);
        match self.repo.update_status(id, SessionStatus::Error).await {
            Ok(()) | Err(RepositoryError::NotFound(_)) => {}
            Err(e) => tracing::error!(session_id = %id, "failed to persist error status: {e}"),
        }
    }

    /// Drains adapter updates for one active session. Ends when the
    /// adapter's senders are dropped.
    fn spawn_update_watcher(&self, id: SessionId, mut rx: mpsc::UnboundedReceiver<SessionUpdate>) {
        let repo = Arc::clone(&self.repo);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                match update {
                    SessionUpdate::AgentSession { id: agent_id } => {
                        tracing::debug!(session_id = %id, agent_id, "recorded agent session id");
                        let mut patch = HashMap::new();
                        patch.insert(AGENT_SESSION_KEY.to_string(), json!(agent_id));
                        if let Err(e) = repo.update_metadata(id, patch).await {
                            tracing::error!(session_id = %id, "failed to persist agent session id: {e}");
                        }
                    }
                    SessionUpdate::Exited { code } => {
                        tracing::info!(session_id = %id, ?code, "session process exited");
                        active.write().await.remove(&id);
                        // Pause/close paths set their status before the
                        // process dies; only a natural exit transitions
                        // Running -> Closed here.
                        match repo.find_by_id(id).await {
                            Ok(Some(s)) if s.status == SessionStatus::Running => {
                                if let Err(e) =
                                    repo.update_status(id, SessionStatus::Closed).await
                                {
                                    tracing::warn!(session_id = %id, "failed to persist exit: {e}");
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(session_id = %id, "exit reconciliation failed: {e}");
                            }
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use tether_core::EventChannel;
    use tokio::sync::oneshot;

    use super::*;

    const MOCK: &str = "mock";

    /// Scripted adapter: spawn behavior is controlled per test, handles
    /// record nothing on their own.
    #[derive(Default)]
    struct MockAdapter {
        fail: AtomicBool,
        hang: AtomicBool,
        banner: AtomicBool,
        spawned: AtomicUsize,
        /// When set, the next spawn parks until released and then fails.
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        updates: Mutex<Option<mpsc::UnboundedSender<SessionUpdate>>>,
    }

    struct MockHandle {
        closed: AtomicBool,
    }

    #[async_trait]
    impl ProcessHandle for MockHandle {
        async fn input(&self, _data: &[u8]) -> Result<(), AdapterError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(AdapterError::Closed);
            }
            Ok(())
        }

        async fn resize(&self, _cols: u16, _rows: u16) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), AdapterError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl SessionAdapter for MockAdapter {
        fn kind(&self) -> &'static str {
            MOCK
        }

        fn supports_resize(&self) -> bool {
            true
        }

        async fn create(&self, req: SpawnRequest) -> Result<Box<dyn ProcessHandle>, AdapterError> {
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let gated = self.gate.lock().unwrap().take();
            if let Some(release) = gated {
                let _ = release.await;
                return Err(AdapterError::SpawnFailed("gated spawn".to_string()));
            }
            if self.fail.load(Ordering::SeqCst) {
                // Emit into the pre-ready buffer before failing, to
                // prove rollback discards it.
                req.sink.push_stdout(b"doomed output");
                return Err(AdapterError::SpawnFailed("boom".to_string()));
            }
            if self.banner.load(Ordering::SeqCst) {
                req.sink.push_stdout(b"ready\n");
            }
            self.spawned.fetch_add(1, Ordering::SeqCst);
            *self.updates.lock().unwrap() = Some(req.updates.clone());
            Ok(Box::new(MockHandle {
                closed: AtomicBool::new(false),
            }))
        }

        async fn resume(
            &self,
            _session: &Session,
            req: SpawnRequest,
        ) -> Result<Box<dyn ProcessHandle>, AdapterError> {
            self.create(req).await
        }
    }

    struct Fixture {
        orchestrator: Arc<Orchestrator>,
        adapter: Arc<MockAdapter>,
        events: Arc<EventStore>,
    }

    fn fixture() -> Fixture {
        fixture_with(OrchestratorConfig::default())
    }

    fn fixture_with(cfg: OrchestratorConfig) -> Fixture {
        let adapter = Arc::new(MockAdapter::default());
        let registry = AdapterRegistry::new().with(Arc::clone(&adapter) as Arc<dyn SessionAdapter>);
        let events = Arc::new(EventStore::new());
        let orchestrator = Arc::new(Orchestrator::with_config(
            Arc::new(crate::MemoryRepository::new()),
            registry,
            Arc::clone(&events),
            cfg,
        ));
        Fixture {
            orchestrator,
            adapter,
            events,
        }
    }

    fn opts() -> CreateOptions {
        CreateOptions::new(PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn create_reaches_running_with_one_active_process() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(f.orchestrator.is_active(session.id).await);
        assert_eq!(f.adapter.spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_ready_output_is_flushed_in_order() {
        let f = fixture();
        f.adapter.banner.store(true, Ordering::SeqCst);
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        let events = f.events.events_since(session.id, 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[0].channel, EventChannel::Stdout);
    }

    #[tokio::test]
    async fn failed_create_leaves_no_trace() {
        let f = fixture();
        f.adapter.fail.store(true, Ordering::SeqCst);

        let err = f.orchestrator.create_session(MOCK, opts()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Adapter(_)));

        let sessions = f
            .orchestrator
            .list_sessions(SessionFilter::default())
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        let id = sessions[0].id;
        assert_eq!(sessions[0].status, SessionStatus::Error);
        assert_eq!(f.events.sequence(id), 0);
        assert!(f.events.events_since(id, 0).is_empty());
        assert!(!f.orchestrator.is_active(id).await);
    }

    #[tokio::test]
    async fn unknown_kind_is_fatal_and_marks_the_record_errored() {
        let f = fixture();
        let err = f
            .orchestrator
            .create_session("no-such-kind", opts())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownKind(_)));

        let sessions = f
            .orchestrator
            .list_sessions(SessionFilter::default())
            .await
            .unwrap();
        assert_eq!(sessions[0].status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn spawn_timeout_is_a_clean_failure() {
        let f = fixture_with(OrchestratorConfig {
            spawn_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        f.adapter.hang.store(true, Ordering::SeqCst);

        let err = f.orchestrator.create_session(MOCK, opts()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));

        let sessions = f
            .orchestrator
            .list_sessions(SessionFilter::default())
            .await
            .unwrap();
        let id = sessions[0].id;
        assert_eq!(sessions[0].status, SessionStatus::Error);
        assert_eq!(f.events.sequence(id), 0);
        assert!(!f.orchestrator.is_active(id).await);
    }

    #[tokio::test]
    async fn input_is_recorded_after_the_write_and_before_resulting_output() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        let seq = f
            .orchestrator
            .send_input(session.id, b"echo hi\n")
            .await
            .unwrap();
        assert_eq!(seq, 1);

        // The shell's response arrives through the adapter's sink.
        EventSink::new(f.orchestrator.events(), session.id).push_stdout(b"hi\n");

        let events = f.events.events_since(session.id, 0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[0].channel, EventChannel::Input);
        assert_eq!(events[1].sequence, 2);
        assert_eq!(events[1].channel, EventChannel::Stdout);
        let data = events[1].payload["data"].as_str().unwrap();
        assert!(String::from_utf8_lossy(&BASE64.decode(data).unwrap()).contains("hi"));
    }

    #[tokio::test]
    async fn resize_records_a_system_event() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        let seq = f.orchestrator.resize(session.id, 120, 40).await.unwrap();
        assert_eq!(seq, 1);

        let events = f.events.events_since(session.id, 0);
        assert_eq!(events[0].channel, EventChannel::System);
        assert_eq!(events[0].kind, "resized");
        assert_eq!(events[0].payload["cols"], 120);
    }

    #[tokio::test]
    async fn input_without_an_active_process_is_fatal() {
        let f = fixture();
        let err = f
            .orchestrator
            .send_input(uuid::Uuid::new_v4(), b"echo\n")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoActiveProcess(_)));
    }

    #[tokio::test]
    async fn resume_on_a_running_session_is_a_no_op() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        let resumed = f.orchestrator.resume_session(session.id).await.unwrap();
        assert_eq!(resumed.id, session.id);
        assert_eq!(f.adapter.spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        f.orchestrator.pause_session(session.id).await.unwrap();
        assert!(!f.orchestrator.is_active(session.id).await);
        assert_eq!(
            f.orchestrator.get_session(session.id).await.unwrap().status,
            SessionStatus::Paused
        );

        let resumed = f.orchestrator.resume_session(session.id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Running);
        assert!(f.orchestrator.is_active(session.id).await);
        assert_eq!(f.adapter.spawned.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn losing_a_resume_race_leaves_the_winner_untouched() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();
        f.orchestrator.pause_session(session.id).await.unwrap();

        // First resume parks inside the adapter until released, then fails.
        let (release, parked) = oneshot::channel();
        *f.adapter.gate.lock().unwrap() = Some(parked);
        let loser = {
            let orchestrator = Arc::clone(&f.orchestrator);
            tokio::spawn(async move { orchestrator.resume_session(session.id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A second resume wins while the first is still parked.
        let winner = f.orchestrator.resume_session(session.id).await.unwrap();
        assert_eq!(winner.status, SessionStatus::Running);

        release.send(()).unwrap();
        let err = loser.await.unwrap().unwrap_err();
        assert!(matches!(err, OrchestratorError::Adapter(_)));

        // The late failure must not clobber the winner's live process.
        assert!(f.orchestrator.is_active(session.id).await);
        assert_eq!(
            f.orchestrator.get_session(session.id).await.unwrap().status,
            SessionStatus::Running
        );
    }

    #[tokio::test]
    async fn errored_sessions_may_re_enter_through_resume() {
        let f = fixture();
        f.adapter.fail.store(true, Ordering::SeqCst);
        let _ = f.orchestrator.create_session(MOCK, opts()).await;
        let id = f
            .orchestrator
            .list_sessions(SessionFilter::default())
            .await
            .unwrap()[0]
            .id;

        f.adapter.fail.store(false, Ordering::SeqCst);
        let resumed = f.orchestrator.resume_session(id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_never_fails() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        f.orchestrator.close_session(session.id).await;
        f.orchestrator.close_session(session.id).await;
        f.orchestrator.close_session(uuid::Uuid::new_v4()).await;

        let closed = f.orchestrator.get_session(session.id).await.unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(!f.orchestrator.is_active(session.id).await);
    }

    #[tokio::test]
    async fn close_drops_the_event_log_when_configured() {
        let f = fixture_with(OrchestratorConfig {
            drop_log_on_close: true,
            ..Default::default()
        });
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();
        f.orchestrator.send_input(session.id, b"ls\n").await.unwrap();
        assert_eq!(f.events.sequence(session.id), 1);

        f.orchestrator.close_session(session.id).await;
        assert_eq!(f.events.sequence(session.id), 0);
        assert!(f.events.events_since(session.id, 0).is_empty());

        // Default configuration keeps the log for post-close replay.
        let g = fixture();
        let kept = g.orchestrator.create_session(MOCK, opts()).await.unwrap();
        g.orchestrator.send_input(kept.id, b"ls\n").await.unwrap();
        g.orchestrator.close_session(kept.id).await;
        assert_eq!(g.events.sequence(kept.id), 1);
    }

    #[tokio::test]
    async fn closed_sessions_cannot_resume() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();
        f.orchestrator.close_session(session.id).await;

        let err = f.orchestrator.resume_session(session.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn concurrent_resumes_leave_exactly_one_process() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();
        f.orchestrator.pause_session(session.id).await.unwrap();

        let (a, b) = tokio::join!(
            f.orchestrator.resume_session(session.id),
            f.orchestrator.resume_session(session.id),
        );
        a.unwrap();
        b.unwrap();
        assert!(f.orchestrator.is_active(session.id).await);
    }

    #[tokio::test]
    async fn agent_session_updates_are_persisted() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        let tx = f.adapter.updates.lock().unwrap().clone().unwrap();
        tx.send(SessionUpdate::AgentSession {
            id: "agent-42".to_string(),
        })
        .unwrap();

        let mut stored = None;
        for _ in 0..50 {
            let s = f.orchestrator.get_session(session.id).await.unwrap();
            if let Some(v) = s.metadata.get(AGENT_SESSION_KEY) {
                stored = Some(v.clone());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored, Some(json!("agent-42")));
    }

    #[tokio::test]
    async fn natural_exit_closes_the_session() {
        let f = fixture();
        let session = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        let tx = f.adapter.updates.lock().unwrap().clone().unwrap();
        tx.send(SessionUpdate::Exited { code: Some(0) }).unwrap();

        let mut status = SessionStatus::Running;
        for _ in 0..50 {
            status = f.orchestrator.get_session(session.id).await.unwrap().status;
            if status == SessionStatus::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, SessionStatus::Closed);
        assert!(!f.orchestrator.is_active(session.id).await);
    }

    #[tokio::test]
    async fn cleanup_pauses_every_active_session() {
        let f = fixture();
        let a = f.orchestrator.create_session(MOCK, opts()).await.unwrap();
        let b = f.orchestrator.create_session(MOCK, opts()).await.unwrap();

        f.orchestrator.cleanup().await;

        for id in [a.id, b.id] {
            assert!(!f.orchestrator.is_active(id).await);
            assert_eq!(
                f.orchestrator.get_session(id).await.unwrap().status,
                SessionStatus::Paused
            );
        }
    }

    #[tokio::test]
    async fn reconcile_startup_pauses_stale_running_sessions() {
        let repo = Arc::new(crate::MemoryRepository::new());
        let stale = repo
            .create(SessionDraft {
                kind: MOCK.to_string(),
                workspace: PathBuf::from("/tmp"),
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        repo.update_status(stale.id, SessionStatus::Running)
            .await
            .unwrap();

        let orchestrator = Orchestrator::new(
            Arc::clone(&repo) as Arc<dyn SessionRepository>,
            AdapterRegistry::new(),
            Arc::new(EventStore::new()),
        );
        orchestrator.reconcile_startup().await.unwrap();

        assert_eq!(
            repo.find_by_id(stale.id).await.unwrap().unwrap().status,
            SessionStatus::Paused
        );
    }
}
