//! Dispatch-backed execution engine
//!
//! Runs a confirmed plan's steps in order through the `DispatchRouter`,
//! fail-fast: the first failed step ends the run. Cancellation is
//! cooperative and takes effect between steps. The latest run of each
//! session is kept in memory for progress queries and per-step retry.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use maestro_core::dispatch::DispatchRouter;
use maestro_core::engine::{
    CancelOutcome, EngineError, ExecutionEngine, ExecutionProgress, ExecutionRun, ProgressEvent,
    ProgressSink, ProgressStatus, RetryOutcome, RunStatus, StepRunRecord, StepRunStatus,
};
use maestro_core::types::{ClassifiedIntent, ExecutionContext, Plan, PlanStep};

/// Sink that forwards progress to the tracing subscriber
pub struct TracingProgressSink;

#[async_trait]
impl ProgressSink for TracingProgressSink {
    async fn notify(&self, event: ProgressEvent) {
        tracing::info!(
            run_id = %event.run_id,
            session_id = %event.session_id,
            status = ?event.status,
            step_id = event.step_id.as_deref().unwrap_or(""),
            "{}",
            event.message
        );
    }
}

struct SessionRun {
    run: ExecutionRun,
    plan: Plan,
}

/// ExecutionEngine over a DispatchRouter
pub struct DispatchEngine {
    router: Arc<DispatchRouter>,
    sink: Arc<dyn ProgressSink>,
    step_timeout: Duration,
    runs: RwLock<HashMap<String, SessionRun>>,
    cancels: RwLock<HashMap<String, CancellationToken>>,
}

impl DispatchEngine {
    pub fn new(router: Arc<DispatchRouter>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            router,
            sink,
            step_timeout: Duration::from_secs(300),
            runs: RwLock::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Dispatch one step, mapping timeouts and failure envelopes to an error
    /// string. Success returns the handler output.
    async fn run_step(
        &self,
        step: &PlanStep,
        ctx: &ExecutionContext,
    ) -> Result<Value, String> {
        let intent = ClassifiedIntent::action(&step.capability, 1.0)
            .with_args(step.args.clone())
            .with_arg("action", Value::String(step.action.clone()));

        let outcome = match tokio::time::timeout(
            self.step_timeout,
            self.router.dispatch(&intent, ctx),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(format!(
                    "step timed out after {}s",
                    self.step_timeout.as_secs()
                ))
            }
        };

        if outcome.success {
            Ok(outcome.data.unwrap_or(Value::Null))
        } else {
            Err(outcome
                .error
                .unwrap_or_else(|| "dispatch failed".to_string()))
        }
    }

    async fn emit(&self, event: ProgressEvent) {
        self.sink.notify(event).await;
    }

    async fn store_run(&self, session_id: &str, run: ExecutionRun, plan: Plan) {
        self.runs
            .write()
            .await
            .insert(session_id.to_string(), SessionRun { run, plan });
    }
}

#[async_trait]
impl ExecutionEngine for DispatchEngine {
    async fn execute_plan(
        &self,
        session_id: &str,
        plan: &Plan,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionRun, EngineError> {
        let steps: Vec<PlanStep> = plan.ordered_steps().into_iter().cloned().collect();
        let mut run = ExecutionRun {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            plan_id: plan.id.clone(),
            status: RunStatus::Running,
            steps: steps
                .iter()
                .map(|s| StepRunRecord::pending(&s.id, &s.capability, &s.action))
                .collect(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };

        let token = CancellationToken::new();
        self.cancels
            .write()
            .await
            .insert(session_id.to_string(), token.clone());
        self.store_run(session_id, run.clone(), plan.clone()).await;

        for (idx, step) in steps.iter().enumerate() {
            if token.is_cancelled() {
                run.status = RunStatus::Cancelled;
                run.finished_at = Some(Utc::now());
                self.emit(
                    ProgressEvent::new(
                        &run.id,
                        session_id,
                        ProgressStatus::RunCancelled,
                        "execution cancelled",
                    )
                    .with_step(&step.id),
                )
                .await;
                break;
            }

            run.steps[idx].status = StepRunStatus::Started;
            run.steps[idx].started_at = Some(Utc::now());
            self.store_run(session_id, run.clone(), plan.clone()).await;
            self.emit(
                ProgressEvent::new(
                    &run.id,
                    session_id,
                    ProgressStatus::StepStarted,
                    format!("step {} started: {}", step.order, step.description),
                )
                .with_step(&step.id),
            )
            .await;

            match self.run_step(step, ctx).await {
                Ok(output) => {
                    run.steps[idx].status = StepRunStatus::Completed;
                    run.steps[idx].output = Some(output);
                    run.steps[idx].finished_at = Some(Utc::now());
                    self.emit(
                        ProgressEvent::new(
                            &run.id,
                            session_id,
                            ProgressStatus::StepCompleted,
                            format!("step {} completed", step.order),
                        )
                        .with_step(&step.id),
                    )
                    .await;
                }
                Err(error) => {
                    run.steps[idx].status = StepRunStatus::Failed;
                    run.steps[idx].error = Some(error.clone());
                    run.steps[idx].finished_at = Some(Utc::now());
                    run.status = RunStatus::Failed;
                    run.error = Some(error.clone());
                    run.finished_at = Some(Utc::now());
                    self.emit(
                        ProgressEvent::new(
                            &run.id,
                            session_id,
                            ProgressStatus::StepFailed,
                            format!("step {} failed: {}", step.order, error),
                        )
                        .with_step(&step.id),
                    )
                    .await;
                    self.emit(ProgressEvent::new(
                        &run.id,
                        session_id,
                        ProgressStatus::RunFailed,
                        error,
                    ))
                    .await;
                    break;
                }
            }
        }

        if run.status == RunStatus::Running {
            run.status = RunStatus::Succeeded;
            run.finished_at = Some(Utc::now());
            self.emit(ProgressEvent::new(
                &run.id,
                session_id,
                ProgressStatus::RunCompleted,
                "all steps completed",
            ))
            .await;
        }

        self.cancels.write().await.remove(session_id);
        self.store_run(session_id, run.clone(), plan.clone()).await;
        Ok(run)
    }

    async fn retry_step(
        &self,
        session_id: &str,
        step_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<RetryOutcome, EngineError> {
        let (step, run_id) = {
            let runs = self.runs.read().await;
            let entry = runs
                .get(session_id)
                .ok_or_else(|| EngineError::RunNotFound(session_id.to_string()))?;
            let record = entry
                .run
                .step(step_id)
                .ok_or_else(|| EngineError::StepNotFound(step_id.to_string()))?;
            if record.status != StepRunStatus::Failed {
                return Err(EngineError::StepNotRetryable(step_id.to_string()));
            }
            let step = entry
                .plan
                .step(step_id)
                .ok_or_else(|| EngineError::StepNotFound(step_id.to_string()))?
                .clone();
            (step, entry.run.id.clone())
        };

        tracing::info!(session_id, step_id, "retrying failed step");
        let result = self.run_step(&step, ctx).await;

        let mut runs = self.runs.write().await;
        let entry = runs
            .get_mut(session_id)
            .ok_or_else(|| EngineError::RunNotFound(session_id.to_string()))?;
        let record = entry
            .run
            .steps
            .iter_mut()
            .find(|s| s.step_id == step_id)
            .ok_or_else(|| EngineError::StepNotFound(step_id.to_string()))?;

        match result {
            Ok(output) => {
                record.status = StepRunStatus::Completed;
                record.output = Some(output);
                record.error = None;
                record.finished_at = Some(Utc::now());
                // the run recovers when nothing is failed or pending anymore
                if entry
                    .run
                    .steps
                    .iter()
                    .all(|s| s.status == StepRunStatus::Completed)
                {
                    entry.run.status = RunStatus::Succeeded;
                    entry.run.error = None;
                    entry.run.finished_at = Some(Utc::now());
                }
                self.emit(
                    ProgressEvent::new(
                        &run_id,
                        session_id,
                        ProgressStatus::StepCompleted,
                        "retried step completed",
                    )
                    .with_step(step_id),
                )
                .await;
                Ok(RetryOutcome {
                    success: true,
                    error: None,
                })
            }
            Err(error) => {
                record.error = Some(error.clone());
                record.finished_at = Some(Utc::now());
                entry.run.error = Some(error.clone());
                Ok(RetryOutcome {
                    success: false,
                    error: Some(error),
                })
            }
        }
    }

    async fn cancel_execution(&self, session_id: &str) -> Result<CancelOutcome, EngineError> {
        if let Some(token) = self.cancels.read().await.get(session_id) {
            token.cancel();
            return Ok(CancelOutcome {
                success: true,
                message: "cancellation requested; stops after the current step".to_string(),
            });
        }
        Ok(CancelOutcome {
            success: false,
            message: "no execution in flight for this session".to_string(),
        })
    }

    async fn get_progress(&self, session_id: &str) -> Result<ExecutionProgress, EngineError> {
        let runs = self.runs.read().await;
        let entry = runs
            .get(session_id)
            .ok_or_else(|| EngineError::RunNotFound(session_id.to_string()))?;
        Ok(entry.run.progress())
    }
}
