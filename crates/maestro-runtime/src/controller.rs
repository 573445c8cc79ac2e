//! Conversation controller
//!
//! One controller instance serves every conversation. It keeps an index
//! from conversation key to the active session, classifies incoming text,
//! drafts sessions for action intents, answers QnA inline and routes
//! replies (confirm/edit/cancel/dryrun/retry/values) to the session state
//! machine. Confirmed plans are executed fire-and-forget; the user gets an
//! immediate acknowledgement and completion is reported into the store.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use maestro_core::classify::classify;
use maestro_core::dispatch::DispatchRouter;
use maestro_core::draft::{DraftError, DraftInput, PlanDrafter};
use maestro_core::engine::{EngineError, ExecutionEngine, RunStatus};
use maestro_core::project;
use maestro_core::store::{SessionStore, StatusUpdate, StoreError};
use maestro_core::types::{
    ExecutionContext, IntentMode, ReplyOutcome, Role, SessionStatus, TaskSession, UserReply,
};

use crate::reply::{extract_values, parse_reply, ParsedReply};

/// Controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("draft error: {0}")]
    Draft(#[from] DraftError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// What the controller did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerAction {
    Answered,
    Dispatched,
    Drafted,
    ValuesApplied,
    Confirmed,
    Cancelled,
    Edited,
    DryRun,
    Retried,
    Rejected,
}

/// Structured response for the chat surface to render
#[derive(Debug, Clone)]
pub struct ControllerResponse {
    pub action: ControllerAction,
    pub message: String,
    pub session: Option<TaskSession>,
}

impl ControllerResponse {
    fn new(action: ControllerAction, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
            session: None,
        }
    }

    fn with_session(mut self, session: TaskSession) -> Self {
        self.session = Some(session);
        self
    }
}

struct ConversationEntry {
    session_id: String,
    touched_at: DateTime<Utc>,
}

/// The conversational front of the pipeline
pub struct ConversationController {
    drafter: PlanDrafter,
    router: Arc<DispatchRouter>,
    engine: Arc<dyn ExecutionEngine>,
    store: Arc<dyn SessionStore>,
    conversations: RwLock<HashMap<String, ConversationEntry>>,
    conversation_ttl: Duration,
}

impl ConversationController {
    pub fn new(
        drafter: PlanDrafter,
        router: Arc<DispatchRouter>,
        engine: Arc<dyn ExecutionEngine>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            drafter,
            router,
            engine,
            store,
            conversations: RwLock::new(HashMap::new()),
            conversation_ttl: Duration::hours(24),
        }
    }

    pub fn with_conversation_ttl(mut self, ttl: Duration) -> Self {
        self.conversation_ttl = ttl;
        self
    }

    /// Handle one incoming chat message.
    pub async fn handle_message(
        &self,
        conversation_key: &str,
        user_id: &str,
        workspace_id: &str,
        role: Role,
        text: &str,
    ) -> Result<ControllerResponse, ControllerError> {
        self.evict_expired().await;

        if let Some(session) = self.active_session(conversation_key).await? {
            return self
                .handle_reply(conversation_key, user_id, workspace_id, role, text, session)
                .await;
        }

        self.handle_new_message(conversation_key, user_id, workspace_id, role, text)
            .await
    }

    /// Remove finished sessions older than the retention window.
    pub async fn sweep(&self, retention_days: i64) -> Result<usize, ControllerError> {
        Ok(self.store.sweep_completed(retention_days).await?)
    }

    async fn handle_new_message(
        &self,
        conversation_key: &str,
        user_id: &str,
        workspace_id: &str,
        role: Role,
        text: &str,
    ) -> Result<ControllerResponse, ControllerError> {
        let intent = classify(text);
        tracing::debug!(
            conversation = conversation_key,
            mode = ?intent.mode,
            intent = intent.intent.as_deref().unwrap_or(""),
            confidence = intent.confidence,
            "message classified"
        );

        if intent.mode == IntentMode::Qna {
            let ctx = ExecutionContext::new(user_id, workspace_id, role);
            let question = intent
                .clone()
                .with_arg("text", Value::String(text.to_string()));
            let outcome = self.router.dispatch(&question, &ctx).await;
            let answer = outcome
                .data
                .as_ref()
                .and_then(|v| v.as_str())
                .unwrap_or("I could not find an answer.")
                .to_string();
            return Ok(ControllerResponse::new(ControllerAction::Answered, answer));
        }

        // slash commands dispatch immediately; no session is created
        if intent.confidence >= 0.95 {
            if let Some(name) = intent.intent.as_deref() {
                let registered = {
                    let registry = self.router.registry();
                    let guard = registry.read().await;
                    guard.get(name).is_some()
                };
                if registered {
                    let ctx = ExecutionContext::new(user_id, workspace_id, role);
                    let outcome = self.router.dispatch(&intent, &ctx).await;
                    let message = if outcome.success {
                        outcome
                            .data
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "done".to_string())
                    } else {
                        outcome
                            .error
                            .unwrap_or_else(|| "dispatch failed".to_string())
                    };
                    return Ok(ControllerResponse::new(
                        ControllerAction::Dispatched,
                        message,
                    ));
                }
            }
        }

        // everything else becomes a drafted session
        let output = self
            .drafter
            .draft(DraftInput {
                text: text.to_string(),
                user_id: user_id.to_string(),
                workspace_id: workspace_id.to_string(),
                role,
                entity_ref: None,
            })
            .await?;
        let session = self.store.create(output.session).await?;
        self.bind(conversation_key, &session.id).await;

        let mut response = ControllerResponse::new(
            ControllerAction::Drafted,
            project::summary(&session),
        )
        .with_session(session);

        // a leading dry-run marker previews instead of waiting for one
        if intent.intent.as_deref() == Some(maestro_core::classify::DRY_RUN_INTENT) {
            if let Some(session) = &response.session {
                response.action = ControllerAction::DryRun;
                response.message = dry_run_text(session);
            }
        }
        Ok(response)
    }

    async fn handle_reply(
        &self,
        conversation_key: &str,
        user_id: &str,
        workspace_id: &str,
        role: Role,
        text: &str,
        session: TaskSession,
    ) -> Result<ControllerResponse, ControllerError> {
        match parse_reply(text) {
            ParsedReply::Confirm => {
                self.confirm(user_id, workspace_id, role, session).await
            }
            ParsedReply::Cancel => self.cancel(user_id, session).await,
            ParsedReply::DryRun => {
                // recorded for the audit trail; no state change
                self.store
                    .apply_reply(&session.id, UserReply::dry_run(user_id))
                    .await?;
                Ok(
                    ControllerResponse::new(ControllerAction::DryRun, dry_run_text(&session))
                        .with_session(session),
                )
            }
            ParsedReply::Edit { key, value } => {
                let reply =
                    UserReply::edit(user_id, serde_json::json!({"key": key, "value": value}));
                match self.store.apply_reply(&session.id, reply).await? {
                    Some((updated, ReplyOutcome::Editing)) => Ok(ControllerResponse::new(
                        ControllerAction::Edited,
                        project::summary(&updated),
                    )
                    .with_session(updated)),
                    Some((updated, ReplyOutcome::Rejected { reason })) => Ok(
                        ControllerResponse::new(ControllerAction::Rejected, reason)
                            .with_session(updated),
                    ),
                    _ => Ok(ControllerResponse::new(
                        ControllerAction::Rejected,
                        "the session is gone; describe the task again",
                    )),
                }
            }
            ParsedReply::Retry { step_id } => {
                self.retry(user_id, workspace_id, role, session, step_id)
                    .await
            }
            ParsedReply::Choice(choice) => self.handle_choice(choice, session).await,
            ParsedReply::FreeText => {
                self.handle_free_text(conversation_key, user_id, workspace_id, role, text, session)
                    .await
            }
        }
    }

    /// A bare digit picks from the numbered prompt of outstanding inputs.
    /// It never becomes a field value by itself; the user is asked for the
    /// value of the chosen input instead.
    async fn handle_choice(
        &self,
        choice: usize,
        session: TaskSession,
    ) -> Result<ControllerResponse, ControllerError> {
        let outstanding = session.plan.unmet_requirements();
        if outstanding.is_empty() {
            return Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                "there is nothing to pick from; reply 'confirm', 'edit' or 'cancel'",
            )
            .with_session(session));
        }

        match outstanding.get(choice - 1) {
            Some(requirement) => {
                let message = format!("Reply with a value for: {}", requirement.description);
                Ok(ControllerResponse::new(ControllerAction::Answered, message)
                    .with_session(session))
            }
            None => {
                let mut lines = vec![format!(
                    "'{}' does not match an open input. Still missing:",
                    choice
                )];
                for (index, requirement) in outstanding.iter().enumerate() {
                    lines.push(format!("  {}. {}", index + 1, requirement.description));
                }
                Ok(
                    ControllerResponse::new(ControllerAction::Rejected, lines.join("\n"))
                        .with_session(session),
                )
            }
        }
    }

    /// Free text while a session is active: first try to fill requirements,
    /// otherwise treat it as a brand-new message.
    async fn handle_free_text(
        &self,
        conversation_key: &str,
        user_id: &str,
        workspace_id: &str,
        role: Role,
        text: &str,
        session: TaskSession,
    ) -> Result<ControllerResponse, ControllerError> {
        if session.status == SessionStatus::Collecting
            || session.status == SessionStatus::AwaitingConfirm
        {
            let requirements: Vec<_> = session
                .plan
                .unmet_requirements()
                .into_iter()
                .cloned()
                .collect();
            let values = extract_values(text, &requirements);
            if !values.is_empty() {
                let reply = UserReply::provide_value(user_id, Value::Object(values));
                if let Some((updated, outcome)) =
                    self.store.apply_reply(&session.id, reply).await?
                {
                    let message = match outcome {
                        ReplyOutcome::ValuesApplied { ready: true } => {
                            format!("Thanks, all set.\n{}", project::summary(&updated))
                        }
                        _ => project::summary(&updated),
                    };
                    return Ok(ControllerResponse::new(
                        ControllerAction::ValuesApplied,
                        message,
                    )
                    .with_session(updated));
                }
            }
        }

        self.handle_new_message(conversation_key, user_id, workspace_id, role, text)
            .await
    }

    async fn confirm(
        &self,
        user_id: &str,
        workspace_id: &str,
        role: Role,
        session: TaskSession,
    ) -> Result<ControllerResponse, ControllerError> {
        if session.status == SessionStatus::Running {
            return Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                "the plan is already running",
            )
            .with_session(session));
        }

        if session.status == SessionStatus::Failed {
            return Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                "the plan already failed; reply 'retry' or describe a new task",
            )
            .with_session(session));
        }

        // re-validate right before execution; registered capabilities may
        // have changed since drafting
        let validation = self.drafter.validate_plan(&session.plan).await;
        if !validation.ready {
            let mut lines = vec!["The plan is not ready to run yet.".to_string()];
            for requirement in &validation.missing {
                lines.push(format!("  - {}", requirement.description));
            }
            for error in &validation.errors {
                lines.push(format!("  - {}", error));
            }
            return Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                lines.join("\n"),
            )
            .with_session(session));
        }

        // an edit drops the session back to collecting; a plan that is
        // ready again is promoted before the confirm is applied
        let session = if session.status == SessionStatus::Collecting {
            match self
                .store
                .apply_reply(
                    &session.id,
                    UserReply::provide_value(user_id, Value::Object(serde_json::Map::new())),
                )
                .await?
            {
                Some((updated, _)) => updated,
                None => {
                    return Ok(ControllerResponse::new(
                        ControllerAction::Rejected,
                        "the session is gone; describe the task again",
                    ));
                }
            }
        } else {
            session
        };

        let Some((updated, outcome)) = self
            .store
            .apply_reply(&session.id, UserReply::confirm(user_id))
            .await?
        else {
            return Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                "the session is gone; describe the task again",
            ));
        };

        match outcome {
            ReplyOutcome::Confirmed => {
                self.spawn_execution(&updated, user_id, workspace_id, role);
                Ok(ControllerResponse::new(
                    ControllerAction::Confirmed,
                    format!(
                        "Confirmed. Running {} step(s), estimated ~{} min. I will report back here.",
                        updated.plan.steps.len(),
                        updated.plan.estimated_duration_minutes
                    ),
                )
                .with_session(updated))
            }
            ReplyOutcome::Rejected { reason } => Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                reason,
            )
            .with_session(updated)),
            _ => Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                "confirm had no effect in the current state",
            )
            .with_session(updated)),
        }
    }

    fn spawn_execution(&self, session: &TaskSession, user_id: &str, workspace_id: &str, role: Role) {
        let engine = self.engine.clone();
        let store = self.store.clone();
        let session_id = session.id.clone();
        let plan = session.plan.clone();
        let ctx = ExecutionContext::new(user_id, workspace_id, role)
            .with_session(session_id.clone(), plan.id.clone());

        tokio::spawn(async move {
            let run = match engine.execute_plan(&session_id, &plan, &ctx).await {
                Ok(run) => run,
                Err(err) => {
                    tracing::error!(session_id = %session_id, error = %err, "execution crashed");
                    let _ = store
                        .update_status(&session_id, StatusUpdate::failed(err.to_string()))
                        .await;
                    return;
                }
            };
            let update = match run.status {
                RunStatus::Succeeded => StatusUpdate::succeeded(),
                RunStatus::Failed => StatusUpdate::failed(
                    run.error.unwrap_or_else(|| "execution failed".to_string()),
                ),
                RunStatus::Cancelled | RunStatus::Running => return,
            };
            if let Err(err) = store.update_status(&session_id, update).await {
                tracing::error!(session_id = %session_id, error = %err, "failed to record completion");
            }
        });
    }

    async fn cancel(
        &self,
        user_id: &str,
        session: TaskSession,
    ) -> Result<ControllerResponse, ControllerError> {
        // stop the engine first when a run is in flight
        if session.status == SessionStatus::Running {
            let outcome = self.engine.cancel_execution(&session.id).await?;
            tracing::info!(session_id = %session.id, engine_cancelled = outcome.success, "cancel requested");
        }

        match self
            .store
            .apply_reply(&session.id, UserReply::cancel(user_id))
            .await?
        {
            Some((updated, ReplyOutcome::Cancelled)) => Ok(ControllerResponse::new(
                ControllerAction::Cancelled,
                "Cancelled. Describe a new task whenever you like.",
            )
            .with_session(updated)),
            Some((updated, ReplyOutcome::Rejected { reason })) => Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                reason,
            )
            .with_session(updated)),
            _ => Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                "nothing to cancel",
            )),
        }
    }

    async fn retry(
        &self,
        user_id: &str,
        workspace_id: &str,
        role: Role,
        session: TaskSession,
        step_id: Option<String>,
    ) -> Result<ControllerResponse, ControllerError> {
        if session.status != SessionStatus::Failed {
            return Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                "only a failed plan can be retried",
            )
            .with_session(session));
        }

        // eligibility is checked against the last run before the session is
        // touched; an ineligible retry must leave the recorded failure intact
        let failed_step = self
            .engine
            .get_progress(&session.id)
            .await
            .ok()
            .and_then(|p| p.failed_step);
        let Some(failed_step) = failed_step else {
            return Ok(ControllerResponse::new(
                ControllerAction::Rejected,
                "no failed step is recorded for this plan; describe a new task instead",
            )
            .with_session(session));
        };
        let step_id = match step_id {
            Some(id) if id == failed_step => id,
            Some(id) => {
                return Ok(ControllerResponse::new(
                    ControllerAction::Rejected,
                    format!(
                        "step '{}' is not in a retryable state; only step '{}' failed",
                        id, failed_step
                    ),
                )
                .with_session(session));
            }
            None => failed_step,
        };

        let ctx = ExecutionContext::new(user_id, workspace_id, role)
            .with_session(session.id.clone(), session.plan.id.clone());
        self.store
            .update_status(&session.id, StatusUpdate::running_at_step(0))
            .await?;
        let outcome = match self.engine.retry_step(&session.id, &step_id, &ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // the session was already moved to running; record the failure
                // instead of leaving it stuck there
                let updated = self
                    .store
                    .update_status(&session.id, StatusUpdate::failed(err.to_string()))
                    .await?;
                return Ok(ControllerResponse::new(
                    ControllerAction::Rejected,
                    format!("retry could not start: {}", err),
                )
                .with_session(updated));
            }
        };

        let (update, message) = if outcome.success {
            let recovered = self
                .engine
                .get_progress(&session.id)
                .await
                .map(|p| p.status == RunStatus::Succeeded)
                .unwrap_or(false);
            if recovered {
                (StatusUpdate::succeeded(), "Retry succeeded; the plan is complete.".to_string())
            } else {
                (
                    StatusUpdate::failed("other steps still failed"),
                    "Retried step succeeded, but the plan has other failed steps.".to_string(),
                )
            }
        } else {
            let error = outcome.error.unwrap_or_else(|| "retry failed".to_string());
            (StatusUpdate::failed(error.clone()), format!("Retry failed: {}", error))
        };
        let updated = self.store.update_status(&session.id, update).await?;
        Ok(ControllerResponse::new(ControllerAction::Retried, message).with_session(updated))
    }

    async fn active_session(
        &self,
        conversation_key: &str,
    ) -> Result<Option<TaskSession>, ControllerError> {
        let session_id = {
            let conversations = self.conversations.read().await;
            conversations
                .get(conversation_key)
                .map(|e| e.session_id.clone())
        };
        let Some(session_id) = session_id else {
            return Ok(None);
        };

        match self.store.get(&session_id).await? {
            // failed sessions stay bound so a retry can follow
            Some(session)
                if session.status.is_active() || session.status == SessionStatus::Failed =>
            {
                self.bind(conversation_key, &session_id).await;
                Ok(Some(session))
            }
            _ => {
                // index only; the session itself is kept for the audit trail
                self.conversations.write().await.remove(conversation_key);
                Ok(None)
            }
        }
    }

    async fn bind(&self, conversation_key: &str, session_id: &str) {
        self.conversations.write().await.insert(
            conversation_key.to_string(),
            ConversationEntry {
                session_id: session_id.to_string(),
                touched_at: Utc::now(),
            },
        );
    }

    async fn evict_expired(&self) {
        let cutoff = Utc::now() - self.conversation_ttl;
        self.conversations
            .write()
            .await
            .retain(|_, entry| entry.touched_at >= cutoff);
    }
}

/// Simulation text: what confirming would do, without side effects.
fn dry_run_text(session: &TaskSession) -> String {
    let mut lines = vec![format!(
        "Dry run of '{}' ({} step(s), ~{} min):",
        session.plan.title,
        session.plan.steps.len(),
        session.plan.estimated_duration_minutes
    )];
    for step in session.plan.ordered_steps() {
        lines.push(format!(
            "  {}. would dispatch {}/{} with {}",
            step.order,
            step.capability,
            step.action,
            Value::Object(step.args.clone())
        ));
    }
    if !session.plan.requirements_met() {
        lines.push("Some required inputs are still missing; the run would not start.".to_string());
    }
    lines.push("No side effects were produced.".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DispatchEngine, TracingProgressSink};
    use async_trait::async_trait;
    use maestro_capabilities::{register_builtins, StaticQnaProvider};
    use maestro_core::draft::EntityResolver;
    use maestro_core::registry::CapabilityRegistry;
    use maestro_stores::InMemorySessionStore;
    use serde_json::Map;
    use std::collections::HashMap as StdHashMap;

    struct TestResolver {
        aliases: StdHashMap<String, String>,
    }

    #[async_trait]
    impl EntityResolver for TestResolver {
        async fn resolve_alias(&self, alias: &str) -> Option<String> {
            self.aliases.get(alias).cloned()
        }

        async fn load_defaults(&self, _entity_ref: &str) -> Map<String, Value> {
            Map::new()
        }
    }

    fn controller_with_alias(alias: &str, entity: &str) -> ConversationController {
        let mut registry = CapabilityRegistry::new();
        register_builtins(&mut registry).unwrap();
        let registry = Arc::new(RwLock::new(registry));

        let router = Arc::new(DispatchRouter::new(
            registry.clone(),
            Arc::new(StaticQnaProvider::new()),
        ));
        let engine = Arc::new(DispatchEngine::new(
            router.clone(),
            Arc::new(TracingProgressSink),
        ));
        let mut aliases = StdHashMap::new();
        aliases.insert(alias.to_string(), entity.to_string());
        let drafter = PlanDrafter::new(registry, Arc::new(TestResolver { aliases }));
        ConversationController::new(
            drafter,
            router,
            engine,
            Arc::new(InMemorySessionStore::new()),
        )
    }

    async fn send(
        controller: &ConversationController,
        text: &str,
    ) -> ControllerResponse {
        controller
            .handle_message("conv-1", "u1", "w1", Role::Operator, text)
            .await
            .unwrap()
    }

    #[test]
    fn test_qna_is_answered_inline_without_a_session() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");
            let response = send(&controller, "quanto costa in media un impianto fotovoltaico?").await;
            assert_eq!(response.action, ControllerAction::Answered);
            assert!(response.session.is_none());
        });
    }

    #[test]
    fn test_slash_command_dispatches_immediately() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");
            let response = send(&controller, "/echo text:ciao repeat:2").await;
            assert_eq!(response.action, ControllerAction::Dispatched);
            assert!(response.message.contains("ciao ciao"));
            assert!(response.session.is_none());
        });
    }

    #[test]
    fn test_draft_confirm_and_complete_flow() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");

            let drafted = send(&controller, "Fai una sensitivity analysis sul Progetto A").await;
            assert_eq!(drafted.action, ControllerAction::Drafted);
            let session = drafted.session.unwrap();
            assert_eq!(session.status, SessionStatus::AwaitingConfirm);

            let confirmed = send(&controller, "confirm").await;
            assert_eq!(confirmed.action, ControllerAction::Confirmed);
            assert_eq!(
                confirmed.session.as_ref().unwrap().status,
                SessionStatus::Running
            );

            // wait for the fire-and-forget execution to report completion
            for _ in 0..50 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                let stored = controller.store.get(&session.id).await.unwrap().unwrap();
                if stored.status.is_terminal() {
                    assert_eq!(stored.status, SessionStatus::Succeeded);
                    return;
                }
            }
            panic!("execution never completed");
        });
    }

    #[test]
    fn test_missing_entity_collects_then_confirms() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");

            let drafted = send(&controller, "fai una sensitivity analysis al 5%").await;
            let session = drafted.session.unwrap();
            assert_eq!(session.status, SessionStatus::Collecting);

            // premature confirm is rejected with the missing prompts
            let rejected = send(&controller, "confirm").await;
            assert_eq!(rejected.action, ControllerAction::Rejected);
            assert!(rejected.message.contains("not ready"));

            // free text fills the single outstanding requirement
            let filled = send(&controller, "proj-a").await;
            assert_eq!(filled.action, ControllerAction::ValuesApplied);
            assert_eq!(
                filled.session.unwrap().status,
                SessionStatus::AwaitingConfirm
            );
        });
    }

    #[test]
    fn test_cancel_releases_the_conversation() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");

            send(&controller, "Fai una sensitivity analysis sul Progetto A").await;
            let cancelled = send(&controller, "annulla").await;
            assert_eq!(cancelled.action, ControllerAction::Cancelled);

            // next message starts fresh instead of hitting the dead session
            let fresh = send(&controller, "Fai una sensitivity analysis sul Progetto A").await;
            assert_eq!(fresh.action, ControllerAction::Drafted);
        });
    }

    #[test]
    fn test_dry_run_does_not_change_state() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");

            let drafted = send(&controller, "Fai una sensitivity analysis sul Progetto A").await;
            let session_id = drafted.session.unwrap().id;

            let simulated = send(&controller, "/plan dryrun").await;
            assert_eq!(simulated.action, ControllerAction::DryRun);
            assert!(simulated.message.contains("would dispatch feasibility/run_sensitivity"));

            let stored = controller.store.get(&session_id).await.unwrap().unwrap();
            assert_eq!(stored.status, SessionStatus::AwaitingConfirm);
            // the dry-run reply is still recorded
            assert_eq!(stored.replies.len(), 1);
        });
    }

    #[test]
    fn test_digit_reply_prompts_instead_of_becoming_a_value() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");

            let drafted = send(&controller, "fai una sensitivity analysis al 5%").await;
            let session = drafted.session.unwrap();
            assert_eq!(session.status, SessionStatus::Collecting);

            // picking the first open input asks for its value
            let picked = send(&controller, "1").await;
            assert_eq!(picked.action, ControllerAction::Answered);
            assert!(picked.message.contains("Reply with a value for"));

            // out of range shows the numbered list instead
            let out_of_range = send(&controller, "9").await;
            assert_eq!(out_of_range.action, ControllerAction::Rejected);
            assert!(out_of_range.message.contains("1."));

            // neither digit leaked into the plan as a field value
            let stored = controller.store.get(&session.id).await.unwrap().unwrap();
            assert_eq!(stored.status, SessionStatus::Collecting);
            assert!(stored.plan.steps[0].args.get("projectId").is_none());
        });
    }

    #[test]
    fn test_retry_of_a_non_failed_step_preserves_the_failure() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");

            send(&controller, "Scansiona i documenti del Progetto A").await;
            send(&controller, "/plan edit key:link value:\"ftp://archive/docs\"").await;
            let confirmed = send(&controller, "confirm").await;
            let session_id = confirmed.session.unwrap().id;

            for _ in 0..50 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                let stored = controller.store.get(&session_id).await.unwrap().unwrap();
                if stored.status.is_terminal() {
                    break;
                }
            }

            // naming a step that did not fail never reaches the engine and
            // never touches the recorded failure
            let rejected = send(&controller, "/plan retry step:nope").await;
            assert_eq!(rejected.action, ControllerAction::Rejected);
            assert!(rejected.message.contains("not in a retryable state"));

            let stored = controller.store.get(&session_id).await.unwrap().unwrap();
            assert_eq!(stored.status, SessionStatus::Failed);
            assert!(stored.error.as_deref().unwrap().contains("not a fetchable link"));
        });
    }

    #[test]
    fn test_failed_run_can_be_retried_from_the_conversation() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");

            let drafted = send(&controller, "Scansiona i documenti del Progetto A").await;
            let session = drafted.session.unwrap();
            assert_eq!(session.status, SessionStatus::Collecting);

            // a link that passes schema validation but cannot be fetched
            send(&controller, "/plan edit key:link value:\"ftp://archive/docs\"").await;
            let confirmed = send(&controller, "confirm").await;
            assert_eq!(confirmed.action, ControllerAction::Confirmed);

            for _ in 0..50 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                let stored = controller.store.get(&session.id).await.unwrap().unwrap();
                if stored.status.is_terminal() {
                    assert_eq!(stored.status, SessionStatus::Failed);
                    break;
                }
            }

            // the failed session stays bound, so a bare retry reaches it
            let retried = send(&controller, "riprova").await;
            assert_eq!(retried.action, ControllerAction::Retried);
            assert!(retried.message.contains("Retry failed"));
            assert_eq!(
                retried.session.unwrap().status,
                SessionStatus::Failed
            );
        });
    }

    #[test]
    fn test_edit_returns_to_collecting() {
        tokio_test::block_on(async {
            let controller = controller_with_alias("A", "proj-a");

            send(&controller, "Fai una sensitivity analysis sul Progetto A").await;
            let edited = send(&controller, "/plan edit key:projectId value:\"proj-b\"").await;
            assert_eq!(edited.action, ControllerAction::Edited);
            assert_eq!(
                edited.session.unwrap().status,
                SessionStatus::Collecting
            );
        });
    }
}
