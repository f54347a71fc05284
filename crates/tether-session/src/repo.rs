//! In-memory session repository.

use std::{
    collections::HashMap,
    sync::RwLock,
};

use async_trait::async_trait;
use serde_json::Value;
use tether_core::{
    RepositoryError, Session, SessionDraft, SessionFilter, SessionId, SessionRepository,
    SessionStatus, types::epoch_secs,
};
use uuid::Uuid;

/// In-memory repository implementation.
///
/// Useful for development and single-process deployments. Data is lost
/// on restart.
#[derive(Default)]
pub struct MemoryRepository {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemoryRepository {
    /// Create a new in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn create(&self, draft: SessionDraft) -> Result<Session, RepositoryError> {
        let timestamp = epoch_secs();
        let session = Session {
            id: Uuid::new_v4(),
            kind: draft.kind,
            status: SessionStatus::Pending,
            workspace: draft.workspace,
            metadata: draft.metadata,
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.sessions
            .write()
            .map_err(|e| RepositoryError::Internal(e.to_string()))?
            .insert(session.id, session.clone());

        Ok(session)
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| RepositoryError::Internal(e.to_string()))?
            .get(&id)
            .cloned())
    }

    async fn update_status(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| RepositoryError::Internal(e.to_string()))?;

        let session = sessions.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        session.status = status;
        session.updated_at = epoch_secs();
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: SessionId,
        patch: HashMap<String, Value>,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| RepositoryError::Internal(e.to_string()))?;

        let session = sessions.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        session.metadata.extend(patch);
        session.updated_at = epoch_secs();
        Ok(())
    }

    async fn mark_all_stopped(&self) -> Result<(), RepositoryError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| RepositoryError::Internal(e.to_string()))?;

        for session in sessions.values_mut() {
            if matches!(
                session.status,
                SessionStatus::Pending | SessionStatus::Running
            ) {
                session.status = SessionStatus::Paused;
                session.updated_at = epoch_secs();
            }
        }
        Ok(())
    }

    async fn list(&self, filter: SessionFilter) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| RepositoryError::Internal(e.to_string()))?;

        let mut result: Vec<Session> = sessions
            .values()
            .filter(|s| {
                if let Some(status) = filter.status {
                    if s.status != status {
                        return false;
                    }
                }
                if let Some(ref kind) = filter.kind {
                    if s.kind != *kind {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        // Newest first.
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }

        Ok(result)
    }
}
