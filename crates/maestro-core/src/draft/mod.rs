//! Plan drafting and validation
//!
//! Turns free text plus a resolution context into a Plan wrapped in a
//! TaskSession: a coarse intent category is inferred from fixed keyword
//! tables, mapped to one or more capability invocations through the
//! category table below, and annotated with requirements, assumptions,
//! risks and a duration estimate. `validate_plan` re-checks a (partially)
//! filled plan against the registry's schemas.

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::classify::{extract_deltas, extract_entity_alias};
use crate::registry::CapabilityRegistry;
use crate::types::{
    Assumption, Plan, PlanStep, Requirement, RequirementKind, Risk, RiskSeverity, Role,
    TaskSession,
};

/// Default analysis horizon (years) implied by feasibility phrasing
const DEFAULT_HORIZON_YEARS: u32 = 20;

/// Drafting errors
#[derive(Debug, Error)]
pub enum DraftError {
    #[error("cannot draft a plan from empty text")]
    EmptyInput,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse intent category, the key of the drafting table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentCategory {
    Feasibility,
    Scanning,
    Design,
    Market,
    Documents,
    General,
}

impl IntentCategory {
    /// Infer the category from fixed keyword tables. This table (plus
    /// `templates`) is the single place new categories are added.
    pub fn infer(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

        if has(&["sensitivity", "sensibilità", "fattibilità", "feasibility"]) {
            Self::Feasibility
        } else if has(&["scansiona", "scan", "sopralluogo"]) {
            Self::Scanning
        } else if has(&["design", "progettazione", "layout"]) {
            Self::Design
        } else if has(&["mercato", "market", "concorrenza"]) {
            Self::Market
        } else if has(&["documento", "documenti", "document", "verifica"]) {
            Self::Documents
        } else {
            Self::General
        }
    }

    /// Capability/action templates for this category, ordered.
    fn templates(&self) -> Vec<StepTemplate> {
        match self {
            Self::Feasibility => vec![StepTemplate {
                capability: "feasibility",
                action: "run_sensitivity",
                description: "Run a sensitivity analysis on the project's financial model",
                required_role: Role::Operator,
                requires_confirmation: true,
                long_running: true,
            }],
            Self::Scanning => vec![StepTemplate {
                capability: "documents",
                action: "scan_by_link",
                description: "Scan the linked document set",
                required_role: Role::Operator,
                requires_confirmation: true,
                long_running: true,
            }],
            Self::Design => vec![StepTemplate {
                capability: "design",
                action: "create_layout",
                description: "Generate a draft layout for the project",
                required_role: Role::Operator,
                requires_confirmation: true,
                long_running: true,
            }],
            Self::Market => vec![StepTemplate {
                capability: "market",
                action: "analyze",
                description: "Analyze the local market for the project",
                required_role: Role::Operator,
                requires_confirmation: true,
                long_running: true,
            }],
            Self::Documents => vec![StepTemplate {
                capability: "documents",
                action: "verify",
                description: "Verify the project's document set",
                required_role: Role::Operator,
                requires_confirmation: true,
                long_running: false,
            }],
            // the general fallback proposes more than one step
            Self::General => vec![
                StepTemplate {
                    capability: "project",
                    action: "summary",
                    description: "Summarize the current state of the project",
                    required_role: Role::Viewer,
                    requires_confirmation: false,
                    long_running: false,
                },
                StepTemplate {
                    capability: "feasibility",
                    action: "run_feasibility",
                    description: "Run a baseline feasibility analysis",
                    required_role: Role::Operator,
                    requires_confirmation: true,
                    long_running: true,
                },
            ],
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Feasibility => "Sensitivity analysis",
            Self::Scanning => "Document scan",
            Self::Design => "Design draft",
            Self::Market => "Market analysis",
            Self::Documents => "Document verification",
            Self::General => "Project review",
        }
    }
}

struct StepTemplate {
    capability: &'static str,
    action: &'static str,
    description: &'static str,
    required_role: Role,
    requires_confirmation: bool,
    long_running: bool,
}

/// Per-action completeness checks: fields a step must carry beyond the
/// entity reference before the plan is executable.
const COMPLETENESS_CHECKS: &[(&str, &str, &str, RequirementKind)] = &[
    (
        "documents",
        "scan_by_link",
        "link",
        RequirementKind::Link,
    ),
    (
        "report",
        "send_email",
        "recipient",
        RequirementKind::Text,
    ),
];

/// External collaborator that resolves entity aliases to canonical
/// references and loads prior domain defaults for an entity.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Resolve an alias (e.g. "A") to a canonical entity reference
    async fn resolve_alias(&self, alias: &str) -> Option<String>;

    /// Load prior domain defaults recorded for an entity
    async fn load_defaults(&self, entity_ref: &str) -> Map<String, Value>;
}

/// Context a plan is drafted in
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub user_id: String,
    pub workspace_id: String,
    pub role: Role,
    pub entity_ref: Option<String>,
    /// Keyword-implied defaults merged with entity defaults (entity wins)
    pub defaults: Map<String, Value>,
}

/// Input to `draft`
#[derive(Debug, Clone)]
pub struct DraftInput {
    pub text: String,
    pub user_id: String,
    pub workspace_id: String,
    pub role: Role,
    /// Entity reference already known to the caller, if any
    pub entity_ref: Option<String>,
}

/// Output of `draft`
#[derive(Debug, Clone)]
pub struct DraftOutput {
    pub plan: Plan,
    pub session: TaskSession,
}

/// Result of validating a plan against the registry
#[derive(Debug, Clone, Default)]
pub struct PlanValidation {
    /// True iff no missing requirements and no errors remain
    pub ready: bool,
    pub missing: Vec<Requirement>,
    /// Advisory only, never block readiness
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Drafts plans from free text and validates them against the registry.
pub struct PlanDrafter {
    registry: Arc<RwLock<CapabilityRegistry>>,
    resolver: Arc<dyn EntityResolver>,
}

impl PlanDrafter {
    pub fn new(
        registry: Arc<RwLock<CapabilityRegistry>>,
        resolver: Arc<dyn EntityResolver>,
    ) -> Self {
        Self { registry, resolver }
    }

    /// Resolve the drafting context for a message.
    ///
    /// A known entity reference is used directly; otherwise the text is
    /// probed for an alias which the resolver may turn into a canonical
    /// reference. Keyword-implied defaults are merged first, entity
    /// defaults last so they take precedence.
    pub async fn resolve_context(
        &self,
        text: &str,
        user_id: &str,
        workspace_id: &str,
        role: Role,
        existing_entity_ref: Option<String>,
    ) -> ResolvedContext {
        let entity_ref = match existing_entity_ref {
            Some(known) => Some(known),
            None => match extract_entity_alias(text) {
                Some(alias) => self.resolver.resolve_alias(&alias).await,
                None => None,
            },
        };

        let mut defaults = keyword_defaults(text);
        if let Some(entity) = &entity_ref {
            for (key, value) in self.resolver.load_defaults(entity).await {
                defaults.insert(key, value);
            }
        }

        ResolvedContext {
            user_id: user_id.to_string(),
            workspace_id: workspace_id.to_string(),
            role,
            entity_ref,
            defaults,
        }
    }

    /// Draft a plan and wrap it in a new session.
    pub async fn draft(&self, input: DraftInput) -> Result<DraftOutput, DraftError> {
        if input.text.trim().is_empty() {
            return Err(DraftError::EmptyInput);
        }

        let ctx = self
            .resolve_context(
                &input.text,
                &input.user_id,
                &input.workspace_id,
                input.role,
                input.entity_ref,
            )
            .await;

        let category = IntentCategory::infer(&input.text);
        let registry = self.registry.read().await;

        let mut steps = Vec::new();
        let mut requirements: Vec<Requirement> = Vec::new();
        let mut warnings = Vec::new();

        for (idx, template) in category.templates().iter().enumerate() {
            let mut args = ctx.defaults.clone();
            if let Some(entity) = &ctx.entity_ref {
                args.insert("projectId".to_string(), Value::String(entity.clone()));
            }

            // refine flags from the registry when the action is known there
            let (required_role, requires_confirmation, long_running) = registry
                .get(template.capability)
                .and_then(|spec| spec.action(template.action))
                .map(|action| {
                    (
                        action.required_role,
                        action.requires_confirmation,
                        action.long_running,
                    )
                })
                .unwrap_or((
                    template.required_role,
                    template.requires_confirmation,
                    template.long_running,
                ));
            if registry.get(template.capability).is_none() {
                warnings.push(format!(
                    "capability '{}' is not registered yet",
                    template.capability
                ));
            }

            let step = PlanStep::new(
                (idx + 1) as u32,
                template.capability,
                template.action,
                template.description,
            )
            .with_args(args)
            .with_required_role(required_role)
            .with_long_running(long_running);
            let step = PlanStep {
                requires_confirmation,
                ..step
            };

            for requirement in completeness_requirements(&step) {
                if !requirements.iter().any(|r| r.field == requirement.field) {
                    requirements.push(requirement);
                }
            }
            steps.push(step);
        }

        if ctx.entity_ref.is_none() {
            requirements.insert(
                0,
                Requirement::new(
                    "projectId",
                    "Which project should this run against?",
                    RequirementKind::EntityRef,
                ),
            );
        }

        let mut assumptions = vec![Assumption::new(
            format!("caller role '{}' is sufficient for every step", ctx.role),
            0.7,
            "drafter",
        )];
        if let Some(entity) = &ctx.entity_ref {
            assumptions.push(Assumption::new(
                format!("project '{}' exists and is accessible", entity),
                0.8,
                "drafter",
            ));
        }

        let mut risks = vec![Risk::new(
            "an external service involved in execution may be unavailable",
            RiskSeverity::Medium,
        )
        .with_mitigation("failed steps can be retried individually")];
        if steps.iter().any(|s| s.action == "scan_by_link") {
            risks.push(Risk::new(
                "the linked source may block scraping or change format",
                RiskSeverity::Medium,
            ));
        }
        if steps.iter().any(|s| s.capability == "design") {
            risks.push(Risk::new(
                "generated designs are drafts and need professional review",
                RiskSeverity::High,
            ));
        }

        let plan = Plan::new(category.title(), input.text.trim(), steps)
            .with_requirements(requirements)
            .with_assumptions(assumptions)
            .with_risks(risks);

        tracing::info!(
            plan_id = %plan.id,
            category = ?category,
            steps = plan.steps.len(),
            missing = plan.requirements.len(),
            warnings = warnings.len(),
            "plan drafted"
        );

        let session = TaskSession::new(
            plan.clone(),
            input.user_id,
            input.role,
            ctx.entity_ref.clone(),
        );
        Ok(DraftOutput { plan, session })
    }

    /// Validate a (partially) filled plan against the registry.
    pub async fn validate_plan(&self, plan: &Plan) -> PlanValidation {
        let registry = self.registry.read().await;
        let mut validation = PlanValidation::default();
        let mut needs_entity = false;

        for step in plan.ordered_steps() {
            let Some(spec) = registry.get(&step.capability) else {
                validation.errors.push(format!(
                    "step {}: capability '{}' not found",
                    step.order, step.capability
                ));
                continue;
            };
            let Some(action) = spec.action(&step.action) else {
                validation.errors.push(format!(
                    "step {}: capability '{}' has no action '{}'",
                    step.order, step.capability, step.action
                ));
                continue;
            };

            for field in action.args.missing_fields(&step.args) {
                push_missing(
                    &mut validation.missing,
                    Requirement::new(
                        field.clone(),
                        format!("step {} requires '{}'", step.order, field),
                        RequirementKind::Text,
                    ),
                );
            }
            for requirement in completeness_requirements(step) {
                push_missing(&mut validation.missing, requirement);
            }
            if action.args.required_fields().iter().any(|f| f == "projectId") {
                needs_entity = true;
            }
        }

        // only demanded when some step's schema actually names the entity ref
        if needs_entity
            && !plan
                .steps
                .iter()
                .any(|s| s.args.contains_key("projectId"))
        {
            push_missing(
                &mut validation.missing,
                Requirement::new(
                    "projectId",
                    "Which project should this run against?",
                    RequirementKind::EntityRef,
                ),
            );
        }

        for requirement in plan.unmet_requirements() {
            push_missing(&mut validation.missing, requirement.clone());
        }

        validation.ready = validation.missing.is_empty() && validation.errors.is_empty();
        validation
    }
}

fn push_missing(missing: &mut Vec<Requirement>, requirement: Requirement) {
    if !missing.iter().any(|r| r.field == requirement.field) {
        missing.push(requirement);
    }
}

/// Hard-coded per-action completeness checks (see `COMPLETENESS_CHECKS`).
fn completeness_requirements(step: &PlanStep) -> Vec<Requirement> {
    COMPLETENESS_CHECKS
        .iter()
        .filter(|(capability, action, field, _)| {
            step.capability == *capability && step.action == *action && !step.args.contains_key(*field)
        })
        .map(|(_, _, field, kind)| {
            Requirement::new(
                *field,
                format!("'{}' is required for {}/{}", field, step.capability, step.action),
                *kind,
            )
        })
        .collect()
}

/// Default argument values implied by recognized keywords in the text.
fn keyword_defaults(text: &str) -> Map<String, Value> {
    let lowered = text.to_lowercase();
    let mut defaults = Map::new();

    if lowered.contains("sensitivity") || lowered.contains("sensibilità") {
        let deltas: Vec<Value> = extract_deltas(&lowered)
            .into_iter()
            .filter_map(Number::from_f64)
            .map(Value::Number)
            .collect();
        defaults.insert("deltas".to_string(), Value::Array(deltas));
    }
    if lowered.contains("fattibilità") || lowered.contains("feasibility") {
        defaults.insert(
            "horizonYears".to_string(),
            Value::Number(DEFAULT_HORIZON_YEARS.into()),
        );
    }

    defaults
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ActionSpec, CapabilityError, CapabilityHandler, CapabilitySpec};
    use crate::schema::ArgumentSchema;
    use crate::types::{ExecutionContext, SessionStatus, UserReply};
    use serde_json::json;
    use std::collections::HashMap;

    struct NoopHandler;

    #[async_trait]
    impl CapabilityHandler for NoopHandler {
        async fn run(
            &self,
            _action: &str,
            _ctx: &ExecutionContext,
            _args: &Map<String, Value>,
        ) -> Result<Value, CapabilityError> {
            Ok(Value::Null)
        }
    }

    struct StaticResolver {
        aliases: HashMap<String, String>,
        defaults: Map<String, Value>,
    }

    impl StaticResolver {
        fn empty() -> Self {
            Self {
                aliases: HashMap::new(),
                defaults: Map::new(),
            }
        }

        fn with_alias(alias: &str, entity: &str) -> Self {
            let mut aliases = HashMap::new();
            aliases.insert(alias.to_string(), entity.to_string());
            Self {
                aliases,
                defaults: Map::new(),
            }
        }
    }

    #[async_trait]
    impl EntityResolver for StaticResolver {
        async fn resolve_alias(&self, alias: &str) -> Option<String> {
            self.aliases.get(alias).cloned()
        }

        async fn load_defaults(&self, _entity_ref: &str) -> Map<String, Value> {
            self.defaults.clone()
        }
    }

    fn registry_with_capabilities() -> Arc<RwLock<CapabilityRegistry>> {
        let mut registry = CapabilityRegistry::new();
        let feasibility = CapabilitySpec::new("feasibility", "financial feasibility analyses")
            .with_action(
                ActionSpec::new("run_sensitivity", "sensitivity analysis")
                    .with_args(ArgumentSchema::object(
                        json!({
                            "projectId": {"type": "string"},
                            "deltas": {"type": "array", "items": {"type": "number"}}
                        }),
                        &["projectId"],
                    ))
                    .with_required_role(Role::Operator)
                    .with_long_running(true),
            )
            .with_action(
                ActionSpec::new("run_feasibility", "baseline feasibility").with_args(
                    ArgumentSchema::object(
                        json!({"projectId": {"type": "string"}}),
                        &["projectId"],
                    ),
                ),
            );
        let project = CapabilitySpec::new("project", "project overview").with_action(
            ActionSpec::new("summary", "project summary")
                .with_args(ArgumentSchema::object(
                    json!({"projectId": {"type": "string"}}),
                    &["projectId"],
                ))
                .with_requires_confirmation(false),
        );
        let documents = CapabilitySpec::new("documents", "document handling")
            .with_action(
                ActionSpec::new("scan_by_link", "scan a linked document")
                    .with_args(ArgumentSchema::object(
                        json!({
                            "projectId": {"type": "string"},
                            "link": {"type": "string"}
                        }),
                        &["projectId", "link"],
                    ))
                    .with_long_running(true),
            )
            .with_action(ActionSpec::new("verify", "verify documents").with_args(
                ArgumentSchema::object(json!({"projectId": {"type": "string"}}), &["projectId"]),
            ));
        registry.register(feasibility, Arc::new(NoopHandler)).unwrap();
        registry.register(project, Arc::new(NoopHandler)).unwrap();
        registry.register(documents, Arc::new(NoopHandler)).unwrap();
        Arc::new(RwLock::new(registry))
    }

    fn input(text: &str) -> DraftInput {
        DraftInput {
            text: text.to_string(),
            user_id: "u1".to_string(),
            workspace_id: "w1".to_string(),
            role: Role::Operator,
            entity_ref: None,
        }
    }

    #[test]
    fn test_sensitivity_draft_without_entity_is_not_ready() {
        tokio_test::block_on(async {
            let drafter = PlanDrafter::new(
                registry_with_capabilities(),
                Arc::new(StaticResolver::empty()),
            );
            let output = drafter
                .draft(input("Fai una sensitivity analysis sul Progetto A"))
                .await
                .unwrap();

            assert_eq!(output.plan.steps.len(), 1);
            assert_eq!(output.plan.steps[0].capability, "feasibility");
            assert_eq!(output.plan.steps[0].action, "run_sensitivity");
            assert_eq!(output.session.status, SessionStatus::Collecting);

            let validation = drafter.validate_plan(&output.plan).await;
            assert!(!validation.ready);
            assert_eq!(validation.missing.len(), 1);
            assert_eq!(validation.missing[0].field, "projectId");
        });
    }

    #[test]
    fn test_sensitivity_draft_with_resolved_alias_is_ready() {
        tokio_test::block_on(async {
            let drafter = PlanDrafter::new(
                registry_with_capabilities(),
                Arc::new(StaticResolver::with_alias("A", "proj-a")),
            );
            let output = drafter
                .draft(input("Fai una sensitivity analysis sul Progetto A"))
                .await
                .unwrap();

            assert_eq!(output.session.entity_ref.as_deref(), Some("proj-a"));
            assert_eq!(
                output.plan.steps[0].args.get("projectId"),
                Some(&json!("proj-a"))
            );
            assert_eq!(output.session.status, SessionStatus::AwaitingConfirm);

            let validation = drafter.validate_plan(&output.plan).await;
            assert!(validation.ready, "errors: {:?}", validation.errors);
        });
    }

    #[test]
    fn test_provide_value_round_trip_makes_plan_ready() {
        tokio_test::block_on(async {
            let drafter = PlanDrafter::new(
                registry_with_capabilities(),
                Arc::new(StaticResolver::empty()),
            );
            let output = drafter
                .draft(input("sensitivity analysis al 5%"))
                .await
                .unwrap();
            let mut session = output.session;
            assert_eq!(session.status, SessionStatus::Collecting);

            session.apply_reply(UserReply::provide_value(
                "u1",
                json!({"projectId": "proj-9"}),
            ));
            assert_eq!(session.status, SessionStatus::AwaitingConfirm);

            let validation = drafter.validate_plan(&session.plan).await;
            assert!(validation.ready, "missing: {:?}", validation.missing);
        });
    }

    #[test]
    fn test_scan_plan_requires_link() {
        tokio_test::block_on(async {
            let drafter = PlanDrafter::new(
                registry_with_capabilities(),
                Arc::new(StaticResolver::with_alias("Borgo", "proj-borgo")),
            );
            let output = drafter
                .draft(input("Scansiona i documenti del progetto Borgo"))
                .await
                .unwrap();

            assert_eq!(output.plan.steps[0].action, "scan_by_link");
            let validation = drafter.validate_plan(&output.plan).await;
            assert!(!validation.ready);
            assert!(validation.missing.iter().any(|r| r.field == "link"));
        });
    }

    #[test]
    fn test_general_fallback_proposes_multiple_steps() {
        tokio_test::block_on(async {
            let drafter = PlanDrafter::new(
                registry_with_capabilities(),
                Arc::new(StaticResolver::empty()),
            );
            let output = drafter
                .draft(input("dammi una mano con il progetto Nuovo"))
                .await
                .unwrap();

            assert!(output.plan.steps.len() > 1);
            assert!(output
                .plan
                .risks
                .iter()
                .any(|r| r.description.contains("external service")));
            assert!(output
                .plan
                .assumptions
                .iter()
                .any(|a| a.description.contains("role")));
        });
    }

    #[test]
    fn test_entity_free_step_does_not_demand_a_project() {
        tokio_test::block_on(async {
            let mut registry = CapabilityRegistry::new();
            let echo = CapabilitySpec::new("echo", "echo back").with_action(
                ActionSpec::new("echo", "repeat text").with_args(ArgumentSchema::object(
                    json!({"text": {"type": "string"}}),
                    &["text"],
                )),
            );
            registry.register(echo, Arc::new(NoopHandler)).unwrap();
            let drafter = PlanDrafter::new(
                Arc::new(RwLock::new(registry)),
                Arc::new(StaticResolver::empty()),
            );

            let mut args = Map::new();
            args.insert("text".to_string(), json!("ciao"));
            let plan = Plan::new(
                "t",
                "d",
                vec![PlanStep::new(1, "echo", "echo", "say hello").with_args(args)],
            );
            let validation = drafter.validate_plan(&plan).await;
            assert!(validation.ready, "missing: {:?}", validation.missing);
        });
    }

    #[test]
    fn test_unknown_capability_is_validation_error() {
        tokio_test::block_on(async {
            let drafter = PlanDrafter::new(
                Arc::new(RwLock::new(CapabilityRegistry::new())),
                Arc::new(StaticResolver::empty()),
            );
            let plan = Plan::new(
                "t",
                "d",
                vec![PlanStep::new(1, "ghost", "run", "missing capability")],
            );
            let validation = drafter.validate_plan(&plan).await;
            assert!(!validation.ready);
            assert!(validation.errors[0].contains("ghost"));
        });
    }

    #[test]
    fn test_keyword_defaults_merge_entity_defaults_last() {
        tokio_test::block_on(async {
            let mut resolver = StaticResolver::with_alias("A", "proj-a");
            resolver
                .defaults
                .insert("deltas".to_string(), json!([-0.02, 0.02]));
            let drafter =
                PlanDrafter::new(registry_with_capabilities(), Arc::new(resolver));

            let ctx = drafter
                .resolve_context(
                    "sensitivity analysis del progetto A",
                    "u1",
                    "w1",
                    Role::Operator,
                    None,
                )
                .await;
            // entity defaults take precedence over keyword-implied ones
            assert_eq!(ctx.defaults.get("deltas"), Some(&json!([-0.02, 0.02])));
        });
    }
}
