//! ExecutionContext type definition
//!
//! The context handed outward to capability handlers and the execution
//! engine. The pipeline produces it; it never inspects what handlers do
//! with it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Role;

/// Context passed to capability handlers on dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub user_id: String,
    pub workspace_id: String,
    #[serde(default)]
    pub entity_ref: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Caller role, passed in by the host, never verified here
    pub user_role: Role,
    /// Channel metadata and other host-provided extras
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    /// Create a minimal context for a caller in a workspace
    pub fn new(user_id: impl Into<String>, workspace_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
            entity_ref: None,
            session_id: None,
            plan_id: None,
            user_role: role,
            metadata: Map::new(),
        }
    }

    /// Attach the entity the work operates on
    pub fn with_entity_ref(mut self, entity_ref: Option<String>) -> Self {
        self.entity_ref = entity_ref;
        self
    }

    /// Attach session/plan identifiers
    pub fn with_session(mut self, session_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.plan_id = Some(plan_id.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
