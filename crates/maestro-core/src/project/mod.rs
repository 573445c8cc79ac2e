//! Presentation projections
//!
//! Pure functions from a session to presentation values. Nothing here
//! mutates state or talks to a store; any chat surface can render the
//! structured preview or the plain-text summary as it sees fit.

use serde::{Deserialize, Serialize};

use crate::types::{RiskSeverity, SessionStatus, TaskSession};

/// One step of a plan, flattened for rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPreview {
    pub order: u32,
    pub description: String,
    pub capability: String,
    pub action: String,
    pub estimated_minutes: u32,
    pub requires_confirmation: bool,
}

/// Structured projection of a session for rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPreview {
    pub session_id: String,
    pub title: String,
    pub status: SessionStatus,
    pub steps: Vec<StepPreview>,
    /// Prompts for inputs still missing
    pub missing: Vec<String>,
    pub assumptions: Vec<String>,
    /// Risk descriptions, high severity first
    pub risks: Vec<String>,
    pub estimated_duration_minutes: u32,
    pub estimated_cost: Option<f64>,
    /// What the user can do next, e.g. "confirm"
    pub available_actions: Vec<String>,
    /// One-line call to action matching the status
    pub call_to_action: String,
}

/// Project a session into its structured preview.
pub fn preview(session: &TaskSession) -> SessionPreview {
    let plan = &session.plan;
    let steps = plan
        .ordered_steps()
        .into_iter()
        .map(|s| StepPreview {
            order: s.order,
            description: s.description.clone(),
            capability: s.capability.clone(),
            action: s.action.clone(),
            estimated_minutes: s.estimated_minutes(),
            requires_confirmation: s.requires_confirmation,
        })
        .collect();

    let mut risks: Vec<&crate::types::Risk> = plan.risks.iter().collect();
    risks.sort_by_key(|r| match r.severity {
        RiskSeverity::High => 0,
        RiskSeverity::Medium => 1,
        RiskSeverity::Low => 2,
    });

    SessionPreview {
        session_id: session.id.clone(),
        title: plan.title.clone(),
        status: session.status,
        steps,
        missing: plan
            .unmet_requirements()
            .iter()
            .map(|r| r.description.clone())
            .collect(),
        assumptions: plan.assumptions.iter().map(|a| a.description.clone()).collect(),
        risks: risks.into_iter().map(|r| r.description.clone()).collect(),
        estimated_duration_minutes: plan.estimated_duration_minutes,
        estimated_cost: plan.total_cost,
        available_actions: available_actions(session.status)
            .into_iter()
            .map(String::from)
            .collect(),
        call_to_action: call_to_action(session).to_string(),
    }
}

/// Replies that make sense in the given state
pub fn available_actions(status: SessionStatus) -> Vec<&'static str> {
    match status {
        SessionStatus::Collecting => vec!["provide_value", "edit", "cancel"],
        SessionStatus::AwaitingConfirm => vec!["confirm", "edit", "dryrun", "cancel"],
        SessionStatus::Running => vec!["cancel"],
        SessionStatus::Failed => vec!["retry"],
        SessionStatus::Succeeded | SessionStatus::Cancelled => vec![],
    }
}

/// One-line status summary, e.g. for a list of a user's sessions.
pub fn status_line(session: &TaskSession) -> String {
    let plan = &session.plan;
    match session.status {
        SessionStatus::Collecting => format!(
            "{}: waiting for {} input(s)",
            plan.title,
            plan.unmet_requirements().len()
        ),
        SessionStatus::AwaitingConfirm => format!(
            "{}: ready, ~{} min, awaiting confirmation",
            plan.title, plan.estimated_duration_minutes
        ),
        SessionStatus::Running => format!(
            "{}: running step {}/{}",
            plan.title,
            (session.current_step_index + 1).min(plan.steps.len().max(1)),
            plan.steps.len()
        ),
        SessionStatus::Succeeded => format!("{}: completed", plan.title),
        SessionStatus::Failed => format!(
            "{}: failed ({})",
            plan.title,
            session.error.as_deref().unwrap_or("unknown error")
        ),
        SessionStatus::Cancelled => format!("{}: cancelled", plan.title),
    }
}

fn call_to_action(session: &TaskSession) -> &'static str {
    match session.status {
        SessionStatus::Collecting => "Provide the missing values to continue.",
        SessionStatus::AwaitingConfirm => {
            "Reply 'confirm' to run the plan, 'edit' to change it, or 'cancel' to drop it."
        }
        SessionStatus::Running => "Execution in progress. Reply 'cancel' to stop it.",
        SessionStatus::Succeeded => "Done.",
        SessionStatus::Failed => "Reply 'retry' to re-run the failed step.",
        SessionStatus::Cancelled => "Cancelled. Describe a new task to start over.",
    }
}

/// Multi-line plain-text summary of a session, suitable for a chat message.
pub fn summary(session: &TaskSession) -> String {
    let p = preview(session);
    let mut lines = Vec::new();

    lines.push(format!("{} [{}]", p.title, session.status.as_str()));
    lines.push(format!(
        "Estimated duration: ~{} min",
        p.estimated_duration_minutes
    ));
    if let Some(cost) = p.estimated_cost {
        lines.push(format!("Estimated cost: {:.2}", cost));
    }

    lines.push("Steps:".to_string());
    for step in &p.steps {
        lines.push(format!(
            "  {}. {} ({}/{}, ~{} min)",
            step.order, step.description, step.capability, step.action, step.estimated_minutes
        ));
    }

    if !p.missing.is_empty() {
        lines.push("Missing:".to_string());
        for prompt in &p.missing {
            lines.push(format!("  - {}", prompt));
        }
    }
    if !p.assumptions.is_empty() {
        lines.push("Assumptions:".to_string());
        for assumption in &p.assumptions {
            lines.push(format!("  - {}", assumption));
        }
    }
    if !p.risks.is_empty() {
        lines.push("Risks:".to_string());
        for risk in &p.risks {
            lines.push(format!("  - {}", risk));
        }
    }

    lines.push(p.call_to_action);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Plan, PlanStep, Requirement, RequirementKind, Risk, Role, UserReply,
    };

    fn sample_session() -> TaskSession {
        let steps = vec![
            PlanStep::new(1, "feasibility", "run_sensitivity", "Run sensitivity analysis")
                .with_long_running(true),
            PlanStep::new(2, "project", "summary", "Summarize results"),
        ];
        let plan = Plan::new("Sensitivity analysis", "sensitivity", steps)
            .with_requirements(vec![Requirement::new(
                "projectId",
                "Which project should this run against?",
                RequirementKind::EntityRef,
            )])
            .with_risks(vec![
                Risk::new("external service may be unavailable", RiskSeverity::Medium),
                Risk::new("model output needs review", RiskSeverity::High),
            ]);
        TaskSession::new(plan, "u1", Role::Operator, None)
    }

    #[test]
    fn test_preview_is_pure_and_complete() {
        let session = sample_session();
        let first = preview(&session);
        let second = preview(&session);

        assert_eq!(first.steps.len(), 2);
        assert_eq!(first.steps[0].estimated_minutes, 15);
        assert_eq!(first.missing.len(), 1);
        assert_eq!(first.estimated_duration_minutes, 17);
        assert!(first.estimated_cost.is_none());
        // same input, same projection
        assert_eq!(first.missing, second.missing);
        assert_eq!(first.call_to_action, second.call_to_action);
    }

    #[test]
    fn test_preview_survives_serde() {
        let value = serde_json::to_value(preview(&sample_session())).unwrap();
        let restored: SessionPreview = serde_json::from_value(value).unwrap();
        assert_eq!(restored.available_actions, vec!["provide_value", "edit", "cancel"]);
    }

    #[test]
    fn test_risks_are_sorted_high_first() {
        let p = preview(&sample_session());
        assert!(p.risks[0].contains("needs review"));
    }

    #[test]
    fn test_available_actions_follow_status() {
        assert!(available_actions(SessionStatus::AwaitingConfirm).contains(&"confirm"));
        assert!(!available_actions(SessionStatus::Collecting).contains(&"confirm"));
        assert_eq!(available_actions(SessionStatus::Running), vec!["cancel"]);
        assert!(available_actions(SessionStatus::Succeeded).is_empty());
        assert_eq!(available_actions(SessionStatus::Failed), vec!["retry"]);
    }

    #[test]
    fn test_status_line_tracks_lifecycle() {
        let mut session = sample_session();
        assert!(status_line(&session).contains("waiting for 1 input"));

        session.apply_reply(UserReply::provide_value(
            "u1",
            serde_json::json!({"projectId": "proj-1"}),
        ));
        assert!(status_line(&session).contains("awaiting confirmation"));

        session.apply_reply(UserReply::confirm("u1"));
        assert!(status_line(&session).contains("running step 1/2"));

        session.mark_failed("backend unavailable");
        assert!(status_line(&session).contains("backend unavailable"));
    }

    #[test]
    fn test_summary_lists_steps_and_prompts() {
        let text = summary(&sample_session());
        assert!(text.contains("1. Run sensitivity analysis"));
        assert!(text.contains("Which project should this run against?"));
        assert!(text.contains("Missing:"));
        assert!(text.contains("~17 min"));
    }
}
