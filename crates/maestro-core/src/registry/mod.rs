//! Capability registry
//!
//! A capability is a named, schema-described unit of executable behavior,
//! registered once and invoked many times. The registry is the process-wide
//! catalog mapping a capability name to its spec (actions, schemas, roles)
//! and its handler. Specs are immutable once registered; registering a
//! duplicate name is an error and leaves the first registration untouched.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::schema::ArgumentSchema;
use crate::types::{ExecutionContext, Role};

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("capability '{0}' already registered")]
    AlreadyRegistered(String),

    #[error("capability '{0}' not found")]
    NotFound(String),
}

/// Handler failure, folded into a dispatch envelope by the router
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),

    #[error("{0}")]
    Failed(String),
}

/// A named action a capability exposes
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    /// Structural validator for the argument map
    pub args: ArgumentSchema,
    /// Role declared as sufficient to run this action
    pub required_role: Role,
    /// Whether the action must be confirmed before running
    pub requires_confirmation: bool,
    /// Whether the action can be simulated without side effects
    pub supports_dry_run: bool,
    /// Whether the action is expected to take a while
    pub long_running: bool,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: ArgumentSchema::any(),
            required_role: Role::default(),
            requires_confirmation: true,
            supports_dry_run: true,
            long_running: false,
        }
    }

    pub fn with_args(mut self, args: ArgumentSchema) -> Self {
        self.args = args;
        self
    }

    pub fn with_required_role(mut self, role: Role) -> Self {
        self.required_role = role;
        self
    }

    pub fn with_requires_confirmation(mut self, requires_confirmation: bool) -> Self {
        self.requires_confirmation = requires_confirmation;
        self
    }

    pub fn with_long_running(mut self, long_running: bool) -> Self {
        self.long_running = long_running;
        self
    }
}

/// A capability's immutable specification
#[derive(Debug, Clone)]
pub struct CapabilitySpec {
    /// Globally unique capability name
    pub name: String,
    pub description: String,
    pub actions: Vec<ActionSpec>,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// Look up an action by name
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// The action used when a dispatch names only the capability
    pub fn default_action(&self) -> Option<&ActionSpec> {
        self.actions.first()
    }

    /// Least privileged role that can run at least one action
    pub fn min_required_role(&self) -> Role {
        self.actions
            .iter()
            .map(|a| a.required_role)
            .min()
            .unwrap_or_default()
    }
}

/// Capability handler - the execution side of the contract.
///
/// The pipeline never inspects what a handler does; it validates inputs
/// and forwards them.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn run(
        &self,
        action: &str,
        ctx: &ExecutionContext,
        args: &Map<String, Value>,
    ) -> Result<Value, CapabilityError>;
}

struct RegisteredCapability {
    spec: CapabilitySpec,
    handler: Arc<dyn CapabilityHandler>,
}

/// Registry statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total: usize,
    /// Capability count per minimum required role
    pub by_role: HashMap<Role, usize>,
}

/// Catalog of registered capabilities.
///
/// Mutation (register/unregister/clear) is expected at startup/teardown;
/// the host wraps the registry in a lock when runtime mutation is needed.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, RegisteredCapability>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Fails when the name is already present and
    /// leaves the existing registration untouched.
    pub fn register(
        &mut self,
        spec: CapabilitySpec,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&spec.name) {
            return Err(RegistryError::AlreadyRegistered(spec.name));
        }
        tracing::debug!(capability = %spec.name, actions = spec.actions.len(), "capability registered");
        self.entries
            .insert(spec.name.clone(), RegisteredCapability { spec, handler });
        Ok(())
    }

    /// Get a capability spec by name
    pub fn get(&self, name: &str) -> Option<&CapabilitySpec> {
        self.entries.get(name).map(|e| &e.spec)
    }

    /// Get a capability's handler by name
    pub fn handler(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.entries.get(name).map(|e| e.handler.clone())
    }

    /// All registered specs, sorted by name
    pub fn list(&self) -> Vec<&CapabilitySpec> {
        let mut specs: Vec<&CapabilitySpec> = self.entries.values().map(|e| &e.spec).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Specs with at least one action the given role can run
    pub fn list_by_role(&self, role: Role) -> Vec<&CapabilitySpec> {
        self.list()
            .into_iter()
            .filter(|spec| spec.actions.iter().any(|a| role.allows(a.required_role)))
            .collect()
    }

    /// Remove a capability. Returns false when the name was not present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Remove every capability
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Count totals per minimum required role
    pub fn stats(&self) -> RegistryStats {
        let mut by_role: HashMap<Role, usize> = HashMap::new();
        for entry in self.entries.values() {
            *by_role.entry(entry.spec.min_required_role()).or_default() += 1;
        }
        RegistryStats {
            total: self.entries.len(),
            by_role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticHandler(Value);

    #[async_trait]
    impl CapabilityHandler for StaticHandler {
        async fn run(
            &self,
            _action: &str,
            _ctx: &ExecutionContext,
            _args: &Map<String, Value>,
        ) -> Result<Value, CapabilityError> {
            Ok(self.0.clone())
        }
    }

    fn echo_spec() -> CapabilitySpec {
        CapabilitySpec::new("echo", "echo back text").with_action(
            ActionSpec::new("echo", "echo back text")
                .with_args(ArgumentSchema::object(
                    json!({"text": {"type": "string"}}),
                    &["text"],
                ))
                .with_requires_confirmation(false),
        )
    }

    #[test]
    fn test_duplicate_registration_is_rejected_and_first_wins() {
        tokio_test::block_on(async {
            let mut registry = CapabilityRegistry::new();
            registry
                .register(echo_spec(), Arc::new(StaticHandler(json!("first"))))
                .unwrap();

            let err = registry
                .register(echo_spec(), Arc::new(StaticHandler(json!("second"))))
                .unwrap_err();
            assert!(matches!(err, RegistryError::AlreadyRegistered(_)));

            let handler = registry.handler("echo").unwrap();
            let ctx = ExecutionContext::new("u1", "w1", Role::Viewer);
            let out = handler.run("echo", &ctx, &Map::new()).await.unwrap();
            assert_eq!(out, json!("first"));
        });
    }

    #[test]
    fn test_list_by_role_filters_on_action_roles() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(echo_spec(), Arc::new(StaticHandler(Value::Null)))
            .unwrap();
        let admin_spec = CapabilitySpec::new("purge", "dangerous cleanup").with_action(
            ActionSpec::new("purge_all", "purge everything").with_required_role(Role::Admin),
        );
        registry
            .register(admin_spec, Arc::new(StaticHandler(Value::Null)))
            .unwrap();

        let viewer = registry.list_by_role(Role::Viewer);
        assert_eq!(viewer.len(), 1);
        assert_eq!(viewer[0].name, "echo");

        let admin = registry.list_by_role(Role::Admin);
        assert_eq!(admin.len(), 2);
    }

    #[test]
    fn test_stats_counts_by_min_role() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(echo_spec(), Arc::new(StaticHandler(Value::Null)))
            .unwrap();
        let stats = registry.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_role.get(&Role::Viewer), Some(&1));

        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert_eq!(registry.stats().total, 0);
    }
}
