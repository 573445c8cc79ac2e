//! SessionStore implementations

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use maestro_core::store::{SessionFilter, SessionStore, StatusUpdate, StoreError};
use maestro_core::types::{ReplyOutcome, SessionStatus, TaskSession, UserReply};

/// In-memory implementation for development and testing
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, TaskSession>>,
}

impl InMemorySessionStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: TaskSession) -> Result<TaskSession, StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<TaskSession>, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<TaskSession>, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let mut matched: Vec<TaskSession> = sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let offset = filter.offset.unwrap_or(0);
        let matched: Vec<TaskSession> = match filter.limit {
            Some(limit) => matched.into_iter().skip(offset).take(limit).collect(),
            None => matched.into_iter().skip(offset).collect(),
        };
        Ok(matched)
    }

    async fn update_status(
        &self,
        session_id: &str,
        update: StatusUpdate,
    ) -> Result<TaskSession, StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        match update.status {
            SessionStatus::Succeeded => {
                session.mark_succeeded();
            }
            SessionStatus::Failed => {
                session.mark_failed(update.error.unwrap_or_else(|| "execution failed".to_string()));
            }
            status => {
                session.status = status;
                session.updated_at = Utc::now();
            }
        }
        if let Some(index) = update.current_step_index {
            session.current_step_index = index;
        }
        tracing::debug!(
            session_id = %session.id,
            status = session.status.as_str(),
            "session status updated"
        );
        Ok(session.clone())
    }

    async fn apply_reply(
        &self,
        session_id: &str,
        reply: UserReply,
    ) -> Result<Option<(TaskSession, ReplyOutcome)>, StoreError> {
        // transition and persist under one write lock
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(None);
        };
        let outcome = session.apply_reply(reply);
        Ok(Some((session.clone(), outcome)))
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn sweep_completed(&self, older_than_days: i64) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let before = sessions.len();
        sessions.retain(|_, s| {
            !(s.status.is_terminal() && s.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, older_than_days, "swept completed sessions");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::types::{Plan, PlanStep, Requirement, RequirementKind, Role};
    use serde_json::json;

    fn ready_session(user_id: &str) -> TaskSession {
        let plan = Plan::new(
            "t",
            "d",
            vec![PlanStep::new(1, "project", "summary", "summary")],
        );
        TaskSession::new(plan, user_id, Role::Operator, None)
    }

    fn collecting_session(user_id: &str) -> TaskSession {
        let plan = Plan::new(
            "t",
            "d",
            vec![PlanStep::new(1, "feasibility", "run_sensitivity", "analysis")],
        )
        .with_requirements(vec![Requirement::new(
            "projectId",
            "Project to analyse",
            RequirementKind::EntityRef,
        )]);
        TaskSession::new(plan, user_id, Role::Operator, None)
    }

    #[test]
    fn test_create_get_delete_round_trip() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let session = store.create(ready_session("u1")).await.unwrap();

            let loaded = store.get(&session.id).await.unwrap().unwrap();
            assert_eq!(loaded.id, session.id);

            assert!(store.delete(&session.id).await.unwrap());
            assert!(!store.delete(&session.id).await.unwrap());
            assert!(store.get(&session.id).await.unwrap().is_none());
        });
    }

    #[test]
    fn test_apply_reply_transitions_and_persists() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let session = store.create(collecting_session("u1")).await.unwrap();

            let (updated, outcome) = store
                .apply_reply(
                    &session.id,
                    UserReply::provide_value("u1", json!({"projectId": "proj-1"})),
                )
                .await
                .unwrap()
                .unwrap();
            assert_eq!(outcome, ReplyOutcome::ValuesApplied { ready: true });
            assert_eq!(updated.status, SessionStatus::AwaitingConfirm);

            // the transition stuck
            let loaded = store.get(&session.id).await.unwrap().unwrap();
            assert_eq!(loaded.status, SessionStatus::AwaitingConfirm);
            assert_eq!(loaded.replies.len(), 1);
        });
    }

    #[test]
    fn test_apply_reply_to_unknown_session_is_none() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let result = store
                .apply_reply("missing", UserReply::confirm("u1"))
                .await
                .unwrap();
            assert!(result.is_none());
        });
    }

    #[test]
    fn test_list_filters_and_orders_most_recent_first() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let first = store.create(ready_session("u1")).await.unwrap();
            store.create(ready_session("u2")).await.unwrap();
            let third = store.create(ready_session("u1")).await.unwrap();

            // touch the older one so it sorts first
            store
                .apply_reply(&first.id, UserReply::dry_run("u1"))
                .await
                .unwrap();

            let mine = store.list(&SessionFilter::for_user("u1")).await.unwrap();
            assert_eq!(mine.len(), 2);
            assert_eq!(mine[0].id, first.id);
            assert_eq!(mine[1].id, third.id);

            let limited = store
                .list(&SessionFilter::for_user("u1").with_limit(1))
                .await
                .unwrap();
            assert_eq!(limited.len(), 1);
        });
    }

    #[test]
    fn test_update_status_routes_through_transitions() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let session = store.create(ready_session("u1")).await.unwrap();
            store
                .apply_reply(&session.id, UserReply::confirm("u1"))
                .await
                .unwrap();

            let updated = store
                .update_status(&session.id, StatusUpdate::failed("backend down"))
                .await
                .unwrap();
            assert_eq!(updated.status, SessionStatus::Failed);
            assert_eq!(updated.error.as_deref(), Some("backend down"));

            let err = store
                .update_status("missing", StatusUpdate::succeeded())
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::NotFound(_)));
        });
    }

    #[test]
    fn test_sweep_removes_only_old_terminal_sessions() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let active = store.create(ready_session("u1")).await.unwrap();

            let mut old = ready_session("u1");
            old.apply_reply(UserReply::cancel("u1"));
            old.completed_at = Some(Utc::now() - Duration::days(40));
            let old = store.create(old).await.unwrap();

            let mut fresh = ready_session("u1");
            fresh.apply_reply(UserReply::cancel("u1"));
            let fresh = store.create(fresh).await.unwrap();

            let removed = store.sweep_completed(30).await.unwrap();
            assert_eq!(removed, 1);
            assert!(store.get(&old.id).await.unwrap().is_none());
            assert!(store.get(&active.id).await.unwrap().is_some());
            assert!(store.get(&fresh.id).await.unwrap().is_some());
        });
    }

    #[test]
    fn test_default_queries_filter_by_lifecycle() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let waiting = store.create(ready_session("u1")).await.unwrap();
            let running = store.create(ready_session("u1")).await.unwrap();
            store
                .apply_reply(&running.id, UserReply::confirm("u1"))
                .await
                .unwrap();
            let done = store.create(ready_session("u1")).await.unwrap();
            store
                .apply_reply(&done.id, UserReply::cancel("u1"))
                .await
                .unwrap();

            let active = store.active_for_user("u1").await.unwrap();
            assert_eq!(active.len(), 2);

            let awaiting = store.awaiting_confirm_for_user("u1").await.unwrap();
            assert_eq!(awaiting.len(), 1);
            assert_eq!(awaiting[0].id, waiting.id);

            let in_flight = store.running_for_user("u1").await.unwrap();
            assert_eq!(in_flight.len(), 1);
            assert_eq!(in_flight[0].id, running.id);
        });
    }
}
