//! # Maestro Core
//!
//! Core abstractions and deterministic logic for the Maestro conversational
//! task-execution pipeline.
//!
//! This crate contains:
//! - Intent / Plan / Step / Session definitions and the session state machine
//! - The rule-based intent classifier
//! - Capability registry, argument schemas and the dispatch router
//! - Plan drafting and validation
//! - Store / execution-engine / entity-resolver contracts
//! - Pure presentation projections of a session
//!
//! This crate does NOT care about:
//! - Which chat surface a message arrives from
//! - How sessions are persisted (see maestro-stores)
//! - What a capability actually does when it runs (see maestro-capabilities)

pub mod classify;
pub mod dispatch;
pub mod draft;
pub mod engine;
pub mod project;
pub mod registry;
pub mod schema;
pub mod store;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classify::classify;
    pub use crate::dispatch::{DispatchOutcome, DispatchRouter, QnaProvider};
    pub use crate::draft::{
        DraftError, DraftInput, DraftOutput, EntityResolver, IntentCategory, PlanDrafter,
        PlanValidation, ResolvedContext,
    };
    pub use crate::engine::{
        CancelOutcome, EngineError, ExecutionEngine, ExecutionProgress, ExecutionRun,
        ProgressEvent, ProgressSink, ProgressStatus, RetryOutcome, RunStatus, StepRunRecord,
        StepRunStatus,
    };
    pub use crate::project::{preview, status_line, summary, SessionPreview, StepPreview};
    pub use crate::registry::{
        ActionSpec, CapabilityError, CapabilityHandler, CapabilityRegistry, CapabilitySpec,
        RegistryError, RegistryStats,
    };
    pub use crate::schema::{ArgumentSchema, SchemaViolation};
    pub use crate::store::{SessionFilter, SessionStore, StatusUpdate, StoreError};
    pub use crate::types::{
        Assumption, ClassifiedIntent, ExecutionContext, IntentMode, Plan, PlanStep, ReplyKind,
        ReplyOutcome, Requirement, RequirementKind, Risk, RiskSeverity, Role, SessionStatus,
        TaskSession, UserReply,
    };
}

// Re-export key types at crate root
pub use classify::classify;
pub use dispatch::{DispatchOutcome, DispatchRouter, QnaProvider};
pub use draft::{DraftInput, EntityResolver, PlanDrafter};
pub use engine::{ExecutionEngine, ExecutionRun, ProgressEvent, ProgressSink};
pub use registry::{CapabilityHandler, CapabilityRegistry, CapabilitySpec};
pub use schema::ArgumentSchema;
pub use store::{SessionStore, StoreError};
pub use types::{ClassifiedIntent, ExecutionContext, Plan, PlanStep, SessionStatus, TaskSession};
