//! Execution engine contract
//!
//! The engine runs a confirmed plan's steps in order, records per-step
//! outcomes, reports progress through a sink and supports cooperative
//! cancellation and per-step retry. This module defines the contract and
//! its record types only; the runtime crate provides the implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{ExecutionContext, Plan};

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run '{0}' not found")]
    RunNotFound(String),

    #[error("step '{0}' not found in run")]
    StepNotFound(String),

    #[error("step '{0}' is not in a retryable state")]
    StepNotRetryable(String),

    #[error("run '{0}' is not active")]
    RunNotActive(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Status of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Pending,
    Started,
    Completed,
    Failed,
}

/// Status of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Outcome record for one step of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRunRecord {
    /// Plan step id this record belongs to
    pub step_id: String,
    pub capability: String,
    pub action: String,
    pub status: StepRunStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRunRecord {
    pub fn pending(step_id: impl Into<String>, capability: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            capability: capability.into(),
            action: action.into(),
            status: StepRunStatus::Pending,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// A plan execution in flight or finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: String,
    pub session_id: String,
    pub plan_id: String,
    pub status: RunStatus,
    pub steps: Vec<StepRunRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionRun {
    /// Look up a step record by plan step id
    pub fn step(&self, step_id: &str) -> Option<&StepRunRecord> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Aggregate progress over the run's steps
    pub fn progress(&self) -> ExecutionProgress {
        let total = self.steps.len();
        let completed = self
            .steps
            .iter()
            .filter(|s| s.status == StepRunStatus::Completed)
            .count();
        let percentage = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        let current_step = self
            .steps
            .iter()
            .find(|s| s.status == StepRunStatus::Started)
            .map(|s| s.step_id.clone());
        let failed_step = self
            .steps
            .iter()
            .find(|s| s.status == StepRunStatus::Failed)
            .map(|s| s.step_id.clone());
        ExecutionProgress {
            completed,
            total,
            percentage,
            current_step,
            failed_step,
            status: self.status,
        }
    }
}

/// Progress snapshot of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
    #[serde(default)]
    pub current_step: Option<String>,
    /// First failed step, the default retry target
    #[serde(default)]
    pub failed_step: Option<String>,
    pub status: RunStatus,
}

/// What a progress event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    StepStarted,
    StepCompleted,
    StepFailed,
    RunCompleted,
    RunFailed,
    RunCancelled,
}

/// One progress notification emitted during execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: String,
    pub session_id: String,
    pub status: ProgressStatus,
    #[serde(default)]
    pub step_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        status: ProgressStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            status,
            step_id: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }
}

/// Receiver of progress notifications. Delivery is best effort; a failed
/// sink never fails the run.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn notify(&self, event: ProgressEvent);
}

/// Outcome of a retry request
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome of a cancel request
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub success: bool,
    pub message: String,
}

/// Runs confirmed plans. One active run per session.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Execute a plan's steps in order. Returns the finished run.
    async fn execute_plan(
        &self,
        session_id: &str,
        plan: &Plan,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionRun, EngineError>;

    /// Re-run a single failed step of a finished run.
    async fn retry_step(
        &self,
        session_id: &str,
        step_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<RetryOutcome, EngineError>;

    /// Request cooperative cancellation of the session's active run.
    async fn cancel_execution(&self, session_id: &str) -> Result<CancelOutcome, EngineError>;

    /// Progress snapshot of the session's most recent run.
    async fn get_progress(&self, session_id: &str) -> Result<ExecutionProgress, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_steps(statuses: &[StepRunStatus]) -> ExecutionRun {
        let steps = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut record = StepRunRecord::pending(format!("s{}", i), "cap", "act");
                record.status = *status;
                record
            })
            .collect();
        ExecutionRun {
            id: "r1".to_string(),
            session_id: "sess1".to_string(),
            plan_id: "p1".to_string(),
            status: RunStatus::Running,
            steps,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    #[test]
    fn test_progress_counts_completed_and_current_step() {
        let run = run_with_steps(&[
            StepRunStatus::Completed,
            StepRunStatus::Started,
            StepRunStatus::Pending,
        ]);
        let progress = run.progress();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, 3);
        assert!((progress.percentage - 33.33).abs() < 0.34);
        assert_eq!(progress.current_step.as_deref(), Some("s1"));
    }

    #[test]
    fn test_progress_of_empty_run_is_zero() {
        let run = run_with_steps(&[]);
        let progress = run.progress();
        assert_eq!(progress.total, 0);
        assert_eq!(progress.percentage, 0.0);
        assert!(progress.current_step.is_none());
    }

    #[test]
    fn test_run_status_terminality() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }
}
