//! Dispatch router
//!
//! Dispatch is the act of validating arguments against a capability's
//! schema and invoking its handler. The router normalizes every outcome
//! into a `DispatchOutcome` envelope: unknown capabilities, validation
//! failures and handler errors are reported, never propagated as raw
//! errors to the caller.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::registry::CapabilityRegistry;
use crate::types::{ClassifiedIntent, ExecutionContext, IntentMode};

/// Result envelope for one dispatch call. Transient; optionally folded
/// into session completion data by the caller.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub capability: String,
    /// The arguments the handler was (or would have been) invoked with
    pub args: Map<String, Value>,
}

impl DispatchOutcome {
    fn ok(capability: &str, data: Value, args: Map<String, Value>, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms: elapsed_ms,
            capability: capability.to_string(),
            args,
        }
    }

    fn failure(capability: &str, error: impl Into<String>, args: Map<String, Value>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time_ms: elapsed_ms,
            capability: capability.to_string(),
            args,
        }
    }
}

/// External QnA collaborator. Its answer is always wrapped as a success;
/// the answer text itself may say "not found".
#[async_trait]
pub trait QnaProvider: Send + Sync {
    async fn answer(&self, question: &str, ctx: &ExecutionContext) -> String;
}

/// Routes classified intents to capability handlers or the QnA collaborator.
pub struct DispatchRouter {
    registry: Arc<RwLock<CapabilityRegistry>>,
    qna: Arc<dyn QnaProvider>,
}

impl DispatchRouter {
    pub fn new(registry: Arc<RwLock<CapabilityRegistry>>, qna: Arc<dyn QnaProvider>) -> Self {
        Self { registry, qna }
    }

    /// Shared registry handle
    pub fn registry(&self) -> Arc<RwLock<CapabilityRegistry>> {
        self.registry.clone()
    }

    /// Dispatch a classified intent in the given context.
    pub async fn dispatch(
        &self,
        intent: &ClassifiedIntent,
        ctx: &ExecutionContext,
    ) -> DispatchOutcome {
        let started = Instant::now();

        if intent.mode == IntentMode::Qna {
            let question = intent
                .args
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let answer = self.qna.answer(&question, ctx).await;
            return DispatchOutcome::ok(
                "qna",
                Value::String(answer),
                intent.args.clone(),
                elapsed_ms(started),
            );
        }

        let Some(capability_name) = intent.intent.as_deref() else {
            return DispatchOutcome::failure(
                "",
                "action intent carries no capability name",
                intent.args.clone(),
                elapsed_ms(started),
            );
        };

        // Resolve capability + action and validate under a read lock, then
        // release it before invoking the handler.
        let resolved = {
            let registry = self.registry.read().await;
            let Some(spec) = registry.get(capability_name) else {
                return DispatchOutcome::failure(
                    capability_name,
                    format!("capability '{}' not found", capability_name),
                    intent.args.clone(),
                    elapsed_ms(started),
                );
            };

            let requested_action = intent.args.get("action").and_then(|v| v.as_str());
            let action = match requested_action {
                Some(name) => spec.action(name),
                None => spec.default_action(),
            };
            let Some(action) = action else {
                return DispatchOutcome::failure(
                    capability_name,
                    format!(
                        "capability '{}' has no action '{}'",
                        capability_name,
                        requested_action.unwrap_or("<default>")
                    ),
                    intent.args.clone(),
                    elapsed_ms(started),
                );
            };

            let mut args = intent.args.clone();
            args.remove("action");
            if let Err(violation) = action.args.validate(&args) {
                tracing::debug!(
                    capability = capability_name,
                    action = %action.name,
                    error = %violation,
                    "argument validation failed"
                );
                return DispatchOutcome::failure(
                    capability_name,
                    format!("argument validation failed: {}", violation),
                    args,
                    elapsed_ms(started),
                );
            }

            let Some(handler) = registry.handler(capability_name) else {
                return DispatchOutcome::failure(
                    capability_name,
                    format!("capability '{}' not found", capability_name),
                    args,
                    elapsed_ms(started),
                );
            };
            (handler, action.name.clone(), args)
        };

        let (handler, action_name, args) = resolved;
        tracing::info!(
            capability = capability_name,
            action = %action_name,
            user_id = %ctx.user_id,
            "dispatching capability"
        );

        match handler.run(&action_name, ctx, &args).await {
            Ok(data) => DispatchOutcome::ok(capability_name, data, args, elapsed_ms(started)),
            Err(err) => {
                tracing::warn!(
                    capability = capability_name,
                    action = %action_name,
                    error = %err,
                    "capability handler failed"
                );
                DispatchOutcome::failure(capability_name, err.to_string(), args, elapsed_ms(started))
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ActionSpec, CapabilityError, CapabilityHandler, CapabilitySpec};
    use crate::schema::ArgumentSchema;
    use crate::types::Role;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CapabilityHandler for EchoHandler {
        async fn run(
            &self,
            _action: &str,
            _ctx: &ExecutionContext,
            args: &Map<String, Value>,
        ) -> Result<Value, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            let repeat = args.get("repeat").and_then(|v| v.as_u64()).unwrap_or(1);
            Ok(json!({ "echo": vec![text; repeat as usize].join(" ") }))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl CapabilityHandler for FailingHandler {
        async fn run(
            &self,
            _action: &str,
            _ctx: &ExecutionContext,
            _args: &Map<String, Value>,
        ) -> Result<Value, CapabilityError> {
            Err(CapabilityError::Failed("backend unavailable".to_string()))
        }
    }

    struct StaticQna;

    #[async_trait]
    impl QnaProvider for StaticQna {
        async fn answer(&self, question: &str, _ctx: &ExecutionContext) -> String {
            format!("best-effort answer to: {}", question)
        }
    }

    fn echo_registry(handler: Arc<dyn CapabilityHandler>) -> Arc<RwLock<CapabilityRegistry>> {
        let mut registry = CapabilityRegistry::new();
        let spec = CapabilitySpec::new("echo", "echo back text").with_action(
            ActionSpec::new("echo", "echo back text").with_args(ArgumentSchema::object(
                json!({
                    "text": {"type": "string"},
                    "repeat": {"type": "integer"}
                }),
                &["text"],
            )),
        );
        registry.register(spec, handler).unwrap();
        Arc::new(RwLock::new(registry))
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u1", "w1", Role::Operator)
    }

    #[test]
    fn test_dispatch_invokes_handler_with_validated_args() {
        tokio_test::block_on(async {
            let handler = Arc::new(EchoHandler {
                calls: AtomicUsize::new(0),
            });
            let router = DispatchRouter::new(echo_registry(handler.clone()), Arc::new(StaticQna));

            let intent = ClassifiedIntent::action("echo", 0.95)
                .with_arg("text", json!("ciao"))
                .with_arg("repeat", json!(3));
            let outcome = router.dispatch(&intent, &ctx()).await;

            assert!(outcome.success);
            assert_eq!(outcome.capability, "echo");
            assert_eq!(outcome.data, Some(json!({"echo": "ciao ciao ciao"})));
            assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn test_validation_failure_never_invokes_handler() {
        tokio_test::block_on(async {
            let handler = Arc::new(EchoHandler {
                calls: AtomicUsize::new(0),
            });
            let router = DispatchRouter::new(echo_registry(handler.clone()), Arc::new(StaticQna));

            let intent = ClassifiedIntent::action("echo", 0.95).with_arg("repeat", json!(2));
            let outcome = router.dispatch(&intent, &ctx()).await;

            assert!(!outcome.success);
            assert!(outcome.error.as_deref().unwrap().contains("validation"));
            assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn test_unknown_capability_is_reported_not_thrown() {
        tokio_test::block_on(async {
            let handler = Arc::new(EchoHandler {
                calls: AtomicUsize::new(0),
            });
            let router = DispatchRouter::new(echo_registry(handler), Arc::new(StaticQna));

            let intent = ClassifiedIntent::action("teleport", 0.95);
            let outcome = router.dispatch(&intent, &ctx()).await;

            assert!(!outcome.success);
            assert!(outcome.error.as_deref().unwrap().contains("not found"));
        });
    }

    #[test]
    fn test_handler_error_is_folded_into_envelope() {
        tokio_test::block_on(async {
            let mut registry = CapabilityRegistry::new();
            registry
                .register(
                    CapabilitySpec::new("flaky", "always fails")
                        .with_action(ActionSpec::new("run", "fails")),
                    Arc::new(FailingHandler),
                )
                .unwrap();
            let router =
                DispatchRouter::new(Arc::new(RwLock::new(registry)), Arc::new(StaticQna));

            let intent = ClassifiedIntent::action("flaky", 0.95);
            let outcome = router.dispatch(&intent, &ctx()).await;

            assert!(!outcome.success);
            assert_eq!(outcome.error.as_deref(), Some("backend unavailable"));
        });
    }

    #[test]
    fn test_qna_mode_always_wraps_as_success() {
        tokio_test::block_on(async {
            let handler = Arc::new(EchoHandler {
                calls: AtomicUsize::new(0),
            });
            let router = DispatchRouter::new(echo_registry(handler), Arc::new(StaticQna));

            let intent = ClassifiedIntent::qna(0.6).with_arg("text", json!("quanto costa?"));
            let outcome = router.dispatch(&intent, &ctx()).await;

            assert!(outcome.success);
            assert_eq!(outcome.capability, "qna");
            assert!(outcome
                .data
                .as_ref()
                .and_then(|v| v.as_str())
                .unwrap()
                .contains("quanto costa?"));
        });
    }
}
