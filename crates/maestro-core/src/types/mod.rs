//! Core type definitions for Maestro
//!
//! This module contains the fundamental types used throughout the pipeline:
//! - ClassifiedIntent: the classifier's verdict for one inbound message
//! - Plan / PlanStep / Requirement / Assumption / Risk: a drafted proposal
//! - TaskSession / UserReply: the conversation state machine
//! - ExecutionContext: the context handed outward to capability handlers

mod context;
mod intent;
mod plan;
mod role;
mod session;

pub use context::ExecutionContext;
pub use intent::{ClassifiedIntent, IntentMode};
pub use plan::{
    Assumption, Plan, PlanStep, Requirement, RequirementKind, Risk, RiskSeverity,
    LONG_RUNNING_STEP_MINUTES, QUICK_STEP_MINUTES,
};
pub use role::Role;
pub use session::{ReplyKind, ReplyOutcome, SessionStatus, TaskSession, UserReply};
