//! Plan type definitions
//!
//! A Plan is an ordered set of proposed capability invocations plus the
//! requirements still missing before it is executable, and advisory
//! assumptions/risks that never block execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Role;

/// Estimated minutes for a long-running step
pub const LONG_RUNNING_STEP_MINUTES: u32 = 15;
/// Estimated minutes for a quick step
pub const QUICK_STEP_MINUTES: u32 = 2;

/// A single proposed capability invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Unique identifier for this step
    pub id: String,
    /// Execution order (ascending, defines sequence)
    pub order: u32,
    /// Capability name to dispatch to
    pub capability: String,
    /// Action name within the capability
    pub action: String,
    /// Human-readable description shown in previews
    pub description: String,
    /// Arguments the step will be dispatched with
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Role the capability action declares as sufficient
    #[serde(default)]
    pub required_role: Role,
    /// Whether the step must be confirmed before running
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Whether the step is expected to take a while
    #[serde(default)]
    pub long_running: bool,
}

impl PlanStep {
    /// Create a new step for a capability/action pair
    pub fn new(
        order: u32,
        capability: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order,
            capability: capability.into(),
            action: action.into(),
            description: description.into(),
            args: Map::new(),
            required_role: Role::default(),
            requires_confirmation: true,
            long_running: false,
        }
    }

    /// Set the step arguments
    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    /// Set the required role
    pub fn with_required_role(mut self, role: Role) -> Self {
        self.required_role = role;
        self
    }

    /// Mark the step as long-running
    pub fn with_long_running(mut self, long_running: bool) -> Self {
        self.long_running = long_running;
        self
    }

    /// Estimated duration for this step alone
    pub fn estimated_minutes(&self) -> u32 {
        if self.long_running {
            LONG_RUNNING_STEP_MINUTES
        } else {
            QUICK_STEP_MINUTES
        }
    }
}

/// Kind of value a requirement asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    #[default]
    Text,
    Number,
    Boolean,
    Link,
    EntityRef,
}

/// A still-missing input the plan needs before it is executable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    /// Field name replies must supply
    pub field: String,
    /// Human-readable prompt
    pub description: String,
    /// Expected value kind
    #[serde(default)]
    pub kind: RequirementKind,
    /// Whether the plan cannot run without it
    #[serde(default = "default_true")]
    pub required: bool,
}

impl Requirement {
    pub fn new(
        field: impl Into<String>,
        description: impl Into<String>,
        kind: RequirementKind,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            field: field.into(),
            description: description.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

fn default_true() -> bool {
    true
}

/// Advisory annotation: something the drafter assumed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assumption {
    pub id: String,
    pub description: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Where the assumption came from (e.g. "drafter")
    pub source: String,
}

impl Assumption {
    pub fn new(description: impl Into<String>, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            confidence,
            source: source.into(),
        }
    }
}

/// Risk severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

/// Advisory annotation: a known risk, never blocks execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub id: String,
    pub description: String,
    pub severity: RiskSeverity,
    #[serde(default)]
    pub mitigation: Option<String>,
}

impl Risk {
    pub fn new(description: impl Into<String>, severity: RiskSeverity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            severity,
            mitigation: None,
        }
    }

    pub fn with_mitigation(mut self, mitigation: impl Into<String>) -> Self {
        self.mitigation = Some(mitigation.into());
        self
    }
}

/// A drafted plan: ordered steps plus outstanding requirements and
/// advisory annotations.
///
/// Immutable once a session begins execution, except for requirement
/// fills applied through replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub description: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub assumptions: Vec<Assumption>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    pub estimated_duration_minutes: u32,
    /// Absent until a per-capability cost model exists
    #[serde(default)]
    pub total_cost: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Create a new plan; duration is derived from the steps.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<PlanStep>,
    ) -> Self {
        let now = Utc::now();
        let estimated_duration_minutes = steps.iter().map(PlanStep::estimated_minutes).sum();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            steps,
            requirements: Vec::new(),
            assumptions: Vec::new(),
            risks: Vec::new(),
            estimated_duration_minutes,
            total_cost: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach outstanding requirements
    pub fn with_requirements(mut self, requirements: Vec<Requirement>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Attach assumptions
    pub fn with_assumptions(mut self, assumptions: Vec<Assumption>) -> Self {
        self.assumptions = assumptions;
        self
    }

    /// Attach risks
    pub fn with_risks(mut self, risks: Vec<Risk>) -> Self {
        self.risks = risks;
        self
    }

    /// Steps sorted by execution order
    pub fn ordered_steps(&self) -> Vec<&PlanStep> {
        let mut steps: Vec<&PlanStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Look up a step by id
    pub fn step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Requirements that are required and still unmet
    pub fn unmet_requirements(&self) -> Vec<&Requirement> {
        self.requirements.iter().filter(|r| r.required).collect()
    }

    /// Whether every required input has been supplied
    pub fn requirements_met(&self) -> bool {
        self.unmet_requirements().is_empty()
    }

    /// Apply a supplied value for a requirement field.
    ///
    /// The value is written into every step's args under the field name,
    /// the matching requirement is removed, and `updated_at` is stamped.
    /// Returns false when no requirement with that field exists (the value
    /// is still written into steps that already carry the field, so edits
    /// to known args keep working).
    pub fn apply_value(&mut self, field: &str, value: Value) -> bool {
        let had_requirement = self.requirements.iter().any(|r| r.field == field);
        for step in &mut self.steps {
            step.args.insert(field.to_string(), value.clone());
        }
        self.requirements.retain(|r| r.field != field);
        self.updated_at = Utc::now();
        had_requirement
    }

    /// Set a single step argument addressed as `<step_id>.<field>`, or a
    /// plan-wide field when no dot is present.
    pub fn set_arg(&mut self, path: &str, value: Value) -> bool {
        match path.split_once('.') {
            Some((step_id, field)) => {
                let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) else {
                    return false;
                };
                step.args.insert(field.to_string(), value);
                self.updated_at = Utc::now();
                true
            }
            None => {
                self.apply_value(path, value);
                true
            }
        }
    }
}
