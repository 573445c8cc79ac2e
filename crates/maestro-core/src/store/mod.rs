//! Session store contract
//!
//! Sessions are the single source of truth for conversation state, so every
//! transition goes through the store: `apply_reply` loads, transitions and
//! persists atomically with respect to other callers of the same store.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ReplyOutcome, SessionStatus, TaskSession, UserReply};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Listing filter. All fields are conjunctive; `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub user_id: Option<String>,
    pub entity_ref: Option<String>,
    pub status: Option<SessionStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SessionFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_entity_ref(mut self, entity_ref: impl Into<String>) -> Self {
        self.entity_ref = Some(entity_ref.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a session passes the non-paging parts of the filter
    pub fn matches(&self, session: &TaskSession) -> bool {
        if let Some(user_id) = &self.user_id {
            if &session.user_id != user_id {
                return false;
            }
        }
        if let Some(entity_ref) = &self.entity_ref {
            if session.entity_ref.as_ref() != Some(entity_ref) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if session.status != status {
                return false;
            }
        }
        true
    }
}

/// Externally driven status change (the execution subsystem reporting
/// completion, not a user reply).
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: SessionStatus,
    pub error: Option<String>,
    pub current_step_index: Option<usize>,
}

impl StatusUpdate {
    pub fn succeeded() -> Self {
        Self {
            status: SessionStatus::Succeeded,
            error: None,
            current_step_index: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Failed,
            error: Some(error.into()),
            current_step_index: None,
        }
    }

    pub fn running_at_step(index: usize) -> Self {
        Self {
            status: SessionStatus::Running,
            error: None,
            current_step_index: Some(index),
        }
    }
}

/// Persistence contract for task sessions.
///
/// `apply_reply` is the only way a user reply reaches a stored session; it
/// returns the updated session together with the transition outcome, or
/// `None` when the session does not exist.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session
    async fn create(&self, session: TaskSession) -> Result<TaskSession, StoreError>;

    /// Load a session by id
    async fn get(&self, session_id: &str) -> Result<Option<TaskSession>, StoreError>;

    /// List sessions matching the filter, most recently updated first
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<TaskSession>, StoreError>;

    /// Apply an external status update. Fails with `NotFound` for unknown ids.
    async fn update_status(
        &self,
        session_id: &str,
        update: StatusUpdate,
    ) -> Result<TaskSession, StoreError>;

    /// Atomically load, transition and persist a session for a user reply.
    async fn apply_reply(
        &self,
        session_id: &str,
        reply: UserReply,
    ) -> Result<Option<(TaskSession, ReplyOutcome)>, StoreError>;

    /// Remove a session. Returns false when the id was not present.
    async fn delete(&self, session_id: &str) -> Result<bool, StoreError>;

    /// Remove terminal sessions whose completion is older than the given
    /// number of days. Returns how many were removed.
    async fn sweep_completed(&self, older_than_days: i64) -> Result<usize, StoreError>;

    /// Sessions of a user that still react to replies
    async fn active_for_user(&self, user_id: &str) -> Result<Vec<TaskSession>, StoreError> {
        let sessions = self.list(&SessionFilter::for_user(user_id)).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.status.is_active())
            .collect())
    }

    /// Sessions of a user waiting on a confirmation
    async fn awaiting_confirm_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<TaskSession>, StoreError> {
        self.list(&SessionFilter::for_user(user_id).with_status(SessionStatus::AwaitingConfirm))
            .await
    }

    /// Sessions of a user currently executing
    async fn running_for_user(&self, user_id: &str) -> Result<Vec<TaskSession>, StoreError> {
        self.list(&SessionFilter::for_user(user_id).with_status(SessionStatus::Running))
            .await
    }
}
