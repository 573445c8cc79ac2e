use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use maestro_core::registry::{
    ActionSpec, CapabilityError, CapabilityHandler, CapabilityRegistry, CapabilitySpec,
    RegistryError,
};
use maestro_core::schema::ArgumentSchema;
use maestro_core::types::{ExecutionContext, Role};

fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn arg_f64_array(args: &Map<String, Value>, key: &str) -> Option<Vec<f64>> {
    args.get(key).and_then(|v| {
        v.as_array()
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
    })
}

fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, CapabilityError> {
    arg_str(args, key).ok_or_else(|| CapabilityError::Failed(format!("missing '{}'", key)))
}

/// Feasibility capability: sensitivity and baseline feasibility runs.
///
/// The handler simulates the financial model with a fixed baseline so the
/// output shape matches the real service.
pub struct FeasibilityHandler;

const BASELINE_MARGIN: f64 = 0.18;

#[async_trait]
impl CapabilityHandler for FeasibilityHandler {
    async fn run(
        &self,
        action: &str,
        _ctx: &ExecutionContext,
        args: &Map<String, Value>,
    ) -> Result<Value, CapabilityError> {
        let project_id = require_str(args, "projectId")?;
        match action {
            "run_sensitivity" => {
                let deltas = arg_f64_array(args, "deltas")
                    .unwrap_or_else(|| vec![-0.10, -0.05, 0.05, 0.10]);
                let scenarios: Vec<Value> = deltas
                    .iter()
                    .map(|delta| {
                        json!({
                            "delta": delta,
                            "margin": BASELINE_MARGIN + delta,
                            "viable": BASELINE_MARGIN + delta > 0.0,
                        })
                    })
                    .collect();
                Ok(json!({
                    "projectId": project_id,
                    "baselineMargin": BASELINE_MARGIN,
                    "scenarios": scenarios,
                }))
            }
            "run_feasibility" => {
                let horizon = args
                    .get("horizonYears")
                    .and_then(Value::as_u64)
                    .unwrap_or(20);
                Ok(json!({
                    "projectId": project_id,
                    "horizonYears": horizon,
                    "margin": BASELINE_MARGIN,
                    "viable": true,
                }))
            }
            other => Err(CapabilityError::UnsupportedAction(other.to_string())),
        }
    }
}

/// Project capability: read-only overviews
pub struct ProjectHandler;

#[async_trait]
impl CapabilityHandler for ProjectHandler {
    async fn run(
        &self,
        action: &str,
        _ctx: &ExecutionContext,
        args: &Map<String, Value>,
    ) -> Result<Value, CapabilityError> {
        let project_id = require_str(args, "projectId")?;
        match action {
            "summary" => Ok(json!({
                "projectId": project_id,
                "summary": format!("Project {} is in planning; no blocking issues recorded.", project_id),
                "openTasks": 0,
            })),
            other => Err(CapabilityError::UnsupportedAction(other.to_string())),
        }
    }
}

/// Documents capability: link scanning and verification
pub struct DocumentsHandler;

#[async_trait]
impl CapabilityHandler for DocumentsHandler {
    async fn run(
        &self,
        action: &str,
        _ctx: &ExecutionContext,
        args: &Map<String, Value>,
    ) -> Result<Value, CapabilityError> {
        let project_id = require_str(args, "projectId")?;
        match action {
            "scan_by_link" => {
                let link = require_str(args, "link")?;
                if !link.starts_with("http://") && !link.starts_with("https://") {
                    return Err(CapabilityError::Failed(format!(
                        "'{}' is not a fetchable link",
                        link
                    )));
                }
                Ok(json!({
                    "projectId": project_id,
                    "link": link,
                    "pages": 12,
                    "extracted": true,
                }))
            }
            "verify" => Ok(json!({
                "projectId": project_id,
                "verified": true,
                "issues": [],
            })),
            other => Err(CapabilityError::UnsupportedAction(other.to_string())),
        }
    }
}

/// Report capability: document generation
pub struct ReportHandler;

#[async_trait]
impl CapabilityHandler for ReportHandler {
    async fn run(
        &self,
        action: &str,
        ctx: &ExecutionContext,
        args: &Map<String, Value>,
    ) -> Result<Value, CapabilityError> {
        let project_id = require_str(args, "projectId")?;
        match action {
            "generate_pdf" => Ok(json!({
                "projectId": project_id,
                "path": format!("reports/{}/{}.pdf", ctx.workspace_id, project_id),
            })),
            "send_email" => {
                let recipient = require_str(args, "recipient")?;
                if !recipient.contains('@') {
                    return Err(CapabilityError::Failed(format!(
                        "'{}' is not an email address",
                        recipient
                    )));
                }
                Ok(json!({
                    "projectId": project_id,
                    "recipient": recipient,
                    "sent": true,
                }))
            }
            other => Err(CapabilityError::UnsupportedAction(other.to_string())),
        }
    }
}

/// Echo capability, kept for diagnostics and examples
pub struct EchoHandler;

#[async_trait]
impl CapabilityHandler for EchoHandler {
    async fn run(
        &self,
        action: &str,
        _ctx: &ExecutionContext,
        args: &Map<String, Value>,
    ) -> Result<Value, CapabilityError> {
        match action {
            "echo" => {
                let text = require_str(args, "text")?;
                let repeat = args.get("repeat").and_then(Value::as_u64).unwrap_or(1).max(1);
                let loud = args.get("loud").and_then(Value::as_bool).unwrap_or(false);
                let mut out = vec![text.to_string(); repeat as usize].join(" ");
                if loud {
                    out = out.to_uppercase();
                }
                Ok(json!({ "echo": out }))
            }
            other => Err(CapabilityError::UnsupportedAction(other.to_string())),
        }
    }
}

fn project_id_property() -> Value {
    json!({"type": "string"})
}

fn feasibility_spec() -> CapabilitySpec {
    CapabilitySpec::new("feasibility", "Financial feasibility and sensitivity analyses")
        .with_action(
            ActionSpec::new("run_sensitivity", "Run a sensitivity analysis over margin deltas")
                .with_args(ArgumentSchema::object(
                    json!({
                        "projectId": project_id_property(),
                        "deltas": {"type": "array", "items": {"type": "number"}}
                    }),
                    &["projectId"],
                ))
                .with_required_role(Role::Operator)
                .with_long_running(true),
        )
        .with_action(
            ActionSpec::new("run_feasibility", "Run a baseline feasibility analysis")
                .with_args(ArgumentSchema::object(
                    json!({
                        "projectId": project_id_property(),
                        "horizonYears": {"type": "integer"}
                    }),
                    &["projectId"],
                ))
                .with_required_role(Role::Operator)
                .with_long_running(true),
        )
}

fn project_spec() -> CapabilitySpec {
    CapabilitySpec::new("project", "Project overviews").with_action(
        ActionSpec::new("summary", "Summarize the current state of a project")
            .with_args(ArgumentSchema::object(
                json!({"projectId": project_id_property()}),
                &["projectId"],
            ))
            .with_requires_confirmation(false),
    )
}

fn documents_spec() -> CapabilitySpec {
    CapabilitySpec::new("documents", "Document scanning and verification")
        .with_action(
            ActionSpec::new("scan_by_link", "Scan a document set reachable through a link")
                .with_args(ArgumentSchema::object(
                    json!({
                        "projectId": project_id_property(),
                        "link": {"type": "string"}
                    }),
                    &["projectId", "link"],
                ))
                .with_required_role(Role::Operator)
                .with_long_running(true),
        )
        .with_action(
            ActionSpec::new("verify", "Verify a project's document set").with_args(
                ArgumentSchema::object(
                    json!({"projectId": project_id_property()}),
                    &["projectId"],
                ),
            ),
        )
}

fn report_spec() -> CapabilitySpec {
    CapabilitySpec::new("report", "Report generation and delivery")
        .with_action(
            ActionSpec::new("generate_pdf", "Generate a PDF report for a project")
                .with_args(ArgumentSchema::object(
                    json!({"projectId": project_id_property()}),
                    &["projectId"],
                ))
                .with_required_role(Role::Operator),
        )
        .with_action(
            ActionSpec::new("send_email", "Email a project report to a recipient")
                .with_args(ArgumentSchema::object(
                    json!({
                        "projectId": project_id_property(),
                        "recipient": {"type": "string"}
                    }),
                    &["projectId", "recipient"],
                ))
                .with_required_role(Role::Operator),
        )
}

fn echo_spec() -> CapabilitySpec {
    CapabilitySpec::new("echo", "Echo back text").with_action(
        ActionSpec::new("echo", "Echo back text")
            .with_args(ArgumentSchema::object(
                json!({
                    "text": {"type": "string"},
                    "repeat": {"type": "integer"},
                    "loud": {"type": "boolean"}
                }),
                &["text"],
            ))
            .with_requires_confirmation(false),
    )
}

/// Register every built-in capability
pub fn register_builtins(registry: &mut CapabilityRegistry) -> Result<(), RegistryError> {
    registry.register(feasibility_spec(), Arc::new(FeasibilityHandler))?;
    registry.register(project_spec(), Arc::new(ProjectHandler))?;
    registry.register(documents_spec(), Arc::new(DocumentsHandler))?;
    registry.register(report_spec(), Arc::new(ReportHandler))?;
    registry.register(echo_spec(), Arc::new(EchoHandler))?;
    tracing::info!(total = registry.stats().total, "built-in capabilities registered");
    Ok(())
}
