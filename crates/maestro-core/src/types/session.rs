//! TaskSession type definitions and the session state machine
//!
//! TaskSession wraps a drafted Plan and tracks its conversation lifecycle:
//! `collecting -> awaiting_confirm -> running -> {succeeded|failed|cancelled}`.
//! The status only changes through the transition operations defined here;
//! replies are append-only and preserved as the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Plan, Role};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Gathering required inputs
    Collecting,
    /// Ready, waiting for the user to confirm
    AwaitingConfirm,
    /// Execution in flight
    Running,
    /// Execution finished successfully
    Succeeded,
    /// Execution failed
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl SessionStatus {
    /// Check if the session is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Succeeded | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Check if the session still reacts to replies
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Collecting => "collecting",
            SessionStatus::AwaitingConfirm => "awaiting_confirm",
            SessionStatus::Running => "running",
            SessionStatus::Succeeded => "succeeded",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Kind of user reply applied to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Confirm,
    Edit,
    DryRun,
    Cancel,
    ProvideValue,
}

/// Append-only log entry on a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReply {
    pub id: String,
    pub kind: ReplyKind,
    pub user_id: String,
    /// Structured payload (field values for provide_value, key/value for edit)
    #[serde(default)]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl UserReply {
    pub fn new(kind: ReplyKind, user_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            user_id: user_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn confirm(user_id: impl Into<String>) -> Self {
        Self::new(ReplyKind::Confirm, user_id, None)
    }

    pub fn cancel(user_id: impl Into<String>) -> Self {
        Self::new(ReplyKind::Cancel, user_id, None)
    }

    pub fn dry_run(user_id: impl Into<String>) -> Self {
        Self::new(ReplyKind::DryRun, user_id, None)
    }

    pub fn edit(user_id: impl Into<String>, data: Value) -> Self {
        Self::new(ReplyKind::Edit, user_id, Some(data))
    }

    pub fn provide_value(user_id: impl Into<String>, data: Value) -> Self {
        Self::new(ReplyKind::ProvideValue, user_id, Some(data))
    }
}

/// Effect of applying a reply to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Session moved to running
    Confirmed,
    /// Session moved to cancelled
    Cancelled,
    /// Session moved back to collecting
    Editing,
    /// No state change; the caller runs a simulation instead
    DryRunRequested,
    /// Field values applied; `ready` is true when all required inputs are met
    ValuesApplied { ready: bool },
    /// The reply was recorded but had no effect in the current state
    Rejected { reason: String },
}

/// The stateful wrapper around a Plan, the single source of truth for
/// conversation state. Mutated only through the transition operations below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSession {
    pub id: String,
    #[serde(default)]
    pub entity_ref: Option<String>,
    pub user_id: String,
    pub user_role: Role,
    pub status: SessionStatus,
    pub plan: Plan,
    #[serde(default)]
    pub replies: Vec<UserReply>,
    #[serde(default)]
    pub current_step_index: usize,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSession {
    /// Create a session for a drafted plan. Starts in `collecting` when
    /// required inputs are missing, otherwise directly in `awaiting_confirm`.
    pub fn new(
        plan: Plan,
        user_id: impl Into<String>,
        user_role: Role,
        entity_ref: Option<String>,
    ) -> Self {
        let status = if plan.requirements_met() {
            SessionStatus::AwaitingConfirm
        } else {
            SessionStatus::Collecting
        };
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_ref,
            user_id: user_id.into(),
            user_role,
            status,
            plan,
            replies: Vec::new(),
            current_step_index: 0,
            started_at: None,
            completed_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Apply a user reply, appending it to the audit trail and performing
    /// the corresponding state transition.
    pub fn apply_reply(&mut self, reply: UserReply) -> ReplyOutcome {
        let kind = reply.kind;
        let data = reply.data.clone();
        self.replies.push(reply);
        self.updated_at = Utc::now();

        match kind {
            ReplyKind::Confirm => self.on_confirm(),
            ReplyKind::Cancel => self.on_cancel(),
            ReplyKind::Edit => self.on_edit(data),
            ReplyKind::DryRun => ReplyOutcome::DryRunRequested,
            ReplyKind::ProvideValue => self.on_provide_value(data),
        }
    }

    fn on_confirm(&mut self) -> ReplyOutcome {
        if self.status != SessionStatus::AwaitingConfirm {
            return ReplyOutcome::Rejected {
                reason: format!(
                    "confirm is only valid while awaiting confirmation (current: {})",
                    self.status.as_str()
                ),
            };
        }
        self.set_status(SessionStatus::Running);
        self.started_at = Some(Utc::now());
        ReplyOutcome::Confirmed
    }

    fn on_cancel(&mut self) -> ReplyOutcome {
        if self.status.is_terminal() {
            return ReplyOutcome::Rejected {
                reason: format!("session already finished ({})", self.status.as_str()),
            };
        }
        self.set_status(SessionStatus::Cancelled);
        self.completed_at = Some(Utc::now());
        ReplyOutcome::Cancelled
    }

    fn on_edit(&mut self, data: Option<Value>) -> ReplyOutcome {
        if !matches!(
            self.status,
            SessionStatus::Collecting | SessionStatus::AwaitingConfirm
        ) {
            return ReplyOutcome::Rejected {
                reason: format!("plan can no longer be edited ({})", self.status.as_str()),
            };
        }
        if let Some(Value::Object(fields)) = data {
            if let (Some(key), Some(value)) = (
                fields.get("key").and_then(|v| v.as_str()),
                fields.get("value"),
            ) {
                self.plan.set_arg(key, value.clone());
            }
        }
        self.set_status(SessionStatus::Collecting);
        ReplyOutcome::Editing
    }

    fn on_provide_value(&mut self, data: Option<Value>) -> ReplyOutcome {
        if !matches!(
            self.status,
            SessionStatus::Collecting | SessionStatus::AwaitingConfirm
        ) {
            return ReplyOutcome::Rejected {
                reason: format!(
                    "values can no longer be supplied ({})",
                    self.status.as_str()
                ),
            };
        }
        if let Some(Value::Object(fields)) = data {
            for (field, value) in fields {
                self.plan.apply_value(&field, value);
            }
        }
        let ready = self.plan.requirements_met();
        if ready && self.status == SessionStatus::Collecting {
            self.set_status(SessionStatus::AwaitingConfirm);
        }
        ReplyOutcome::ValuesApplied { ready }
    }

    /// External completion transition: the execution subsystem reports success.
    pub fn mark_succeeded(&mut self) -> bool {
        if self.status != SessionStatus::Running {
            return false;
        }
        self.set_status(SessionStatus::Succeeded);
        self.completed_at = Some(Utc::now());
        true
    }

    /// External completion transition: the execution subsystem reports failure.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if self.status != SessionStatus::Running {
            return false;
        }
        self.set_status(SessionStatus::Failed);
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        true
    }
}
