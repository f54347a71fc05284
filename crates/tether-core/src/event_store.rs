//! Append-only, per-session sequenced event log.
//!
//! The log is two-phase: events recorded while a session is still being
//! brought up land in an in-memory buffer and are only committed (and
//! broadcast to subscribers) once the orchestrator confirms the session
//! is running. This closes the race between adapter spawn and session
//! registration without losing or reordering output. Subscribers never
//! see an event before it is committed.
//!
//! Sequence numbers are assigned under a single-writer discipline per
//! session: only the owning session's recording path emits events, which
//! holds by construction because at most one active process exists per
//! session.

use std::{
    collections::{HashMap, VecDeque},
    sync::RwLock,
};

use futures::{StreamExt, stream};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::types::{EventChannel, EventRecord, SessionId, epoch_millis};

/// Event store tuning knobs.
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Per-session cap on retained committed events, in approximate
    /// bytes. Oldest events are evicted first once the cap is reached.
    pub max_session_bytes: usize,
    /// Capacity of each session's live broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            // 100 MB per session.
            max_session_bytes: 100_000 * 1024,
            broadcast_capacity: 10_000,
        }
    }
}

struct SessionLog {
    committed: VecDeque<EventRecord>,
    committed_bytes: usize,
    /// Highest committed sequence; survives retention eviction.
    last_committed: u64,
    /// Pre-ready buffer; `Some` between `start_buffering` and
    /// `flush_buffer`/`clear_buffer`.
    buffer: Option<Vec<EventRecord>>,
    tx: broadcast::Sender<EventRecord>,
}

impl SessionLog {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            committed: VecDeque::with_capacity(32),
            committed_bytes: 0,
            last_committed: 0,
            buffer: None,
            tx,
        }
    }

    /// Next sequence to assign: committed high-water mark plus anything
    /// already sitting in the buffer. Clearing the buffer rolls the
    /// numbering back to the committed mark.
    fn next_sequence(&self) -> u64 {
        self.last_committed + self.buffer.as_ref().map_or(0, Vec::len) as u64 + 1
    }

    fn commit(&mut self, event: EventRecord, max_bytes: usize) {
        let bytes = event.approx_bytes();
        while self.committed_bytes.saturating_add(bytes) > max_bytes {
            if let Some(front) = self.committed.pop_front() {
                self.committed_bytes = self.committed_bytes.saturating_sub(front.approx_bytes());
            } else {
                break;
            }
        }
        self.last_committed = event.sequence;
        self.committed_bytes = self.committed_bytes.saturating_add(bytes);
        self.committed.push_back(event.clone());
        let _ = self.tx.send(event); // live subscribers
    }
}

/// Per-session sequenced event log with pre-ready buffering and live
/// broadcast, the durable side of the reconnection protocol.
pub struct EventStore {
    cfg: EventStoreConfig,
    inner: RwLock<HashMap<SessionId, SessionLog>>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create a store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EventStoreConfig::default())
    }

    /// Create a store with explicit configuration.
    #[must_use]
    pub fn with_config(cfg: EventStoreConfig) -> Self {
        Self {
            cfg,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Open the pre-ready buffer for a session that is being created or
    /// resumed. Events recorded until `flush_buffer` stay invisible to
    /// subscribers and catch-up reads.
    pub fn start_buffering(&self, session_id: SessionId) {
        let mut inner = self.inner.write().unwrap();
        let log = inner
            .entry(session_id)
            .or_insert_with(|| SessionLog::new(self.cfg.broadcast_capacity));
        log.buffer.get_or_insert_with(Vec::new);
    }

    /// Record an event, assigning the next sequence number. Returns the
    /// assigned sequence.
    pub fn record(
        &self,
        session_id: SessionId,
        channel: EventChannel,
        kind: &str,
        payload: Value,
    ) -> u64 {
        let mut inner = self.inner.write().unwrap();
        let log = inner
            .entry(session_id)
            .or_insert_with(|| SessionLog::new(self.cfg.broadcast_capacity));

        let sequence = log.next_sequence();
        let event = EventRecord {
            session_id,
            sequence,
            channel,
            kind: kind.to_string(),
            payload,
            timestamp: epoch_millis(),
        };

        if let Some(buffer) = log.buffer.as_mut() {
            buffer.push(event);
        } else {
            log.commit(event, self.cfg.max_session_bytes);
        }
        sequence
    }

    /// Commit buffered events in their original order and broadcast
    /// them. No-op if the session is not buffering.
    pub fn flush_buffer(&self, session_id: SessionId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(log) = inner.get_mut(&session_id) {
            if let Some(buffered) = log.buffer.take() {
                for event in buffered {
                    log.commit(event, self.cfg.max_session_bytes);
                }
            }
        }
    }

    /// Discard buffered events after a failed create/resume. No partial
    /// events survive; sequence numbering restarts after the last
    /// committed event.
    pub fn clear_buffer(&self, session_id: SessionId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(log) = inner.get_mut(&session_id) {
            if let Some(dropped) = log.buffer.take() {
                if !dropped.is_empty() {
                    tracing::debug!(
                        session_id = %session_id,
                        count = dropped.len(),
                        "discarded buffered events"
                    );
                }
            }
        }
    }

    /// Drop a session's entire log: committed events, any open buffer,
    /// and the broadcast channel. Live subscribers see their stream end.
    /// Numbering restarts from 1 if the session ever records again.
    pub fn remove(&self, session_id: SessionId) {
        let mut inner = self.inner.write().unwrap();
        if inner.remove(&session_id).is_some() {
            tracing::debug!(session_id = %session_id, "dropped session event log");
        }
    }

    /// Committed events with sequence greater than `since`, in order.
    #[must_use]
    pub fn events_since(&self, session_id: SessionId, since: u64) -> Vec<EventRecord> {
        let inner = self.inner.read().unwrap();
        inner.get(&session_id).map_or_else(Vec::new, |log| {
            log.committed
                .iter()
                .filter(|e| e.sequence > since)
                .cloned()
                .collect()
        })
    }

    /// Highest committed sequence for a session (0 if none).
    #[must_use]
    pub fn sequence(&self, session_id: SessionId) -> u64 {
        let inner = self.inner.read().unwrap();
        inner.get(&session_id).map_or(0, |log| log.last_committed)
    }

    /// Receiver for live committed events.
    #[must_use]
    pub fn subscribe(&self, session_id: SessionId) -> broadcast::Receiver<EventRecord> {
        let mut inner = self.inner.write().unwrap();
        inner
            .entry(session_id)
            .or_insert_with(|| SessionLog::new(self.cfg.broadcast_capacity))
            .tx
            .subscribe()
    }

    /// Catch-up stream: committed events after `since`, then live events
    /// with no gap and no duplicate.
    ///
    /// Subscription, the committed-sequence snapshot, and the catch-up
    /// batch are all taken under one lock acquisition, so every event
    /// past the snapshot is guaranteed to arrive on the live receiver;
    /// live events at or below the snapshot are dropped as duplicates of
    /// the catch-up batch.
    #[must_use]
    pub fn follow(
        &self,
        session_id: SessionId,
        since: u64,
    ) -> futures::stream::BoxStream<'static, EventRecord> {
        let (rx, snapshot, catchup) = {
            let mut inner = self.inner.write().unwrap();
            let log = inner
                .entry(session_id)
                .or_insert_with(|| SessionLog::new(self.cfg.broadcast_capacity));
            let catchup: Vec<EventRecord> = log
                .committed
                .iter()
                .filter(|e| e.sequence > since)
                .cloned()
                .collect();
            (log.tx.subscribe(), log.last_committed, catchup)
        };

        let live = BroadcastStream::new(rx).filter_map(move |res| {
            futures::future::ready(match res {
                Ok(event) if event.sequence > snapshot => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    tracing::warn!(
                        session_id = %session_id,
                        missed,
                        "attachment fell behind the live event feed"
                    );
                    None
                }
            })
        });

        Box::pin(stream::iter(catchup).chain(live))
    }
}
