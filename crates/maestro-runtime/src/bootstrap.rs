//! Pipeline bootstrap
//!
//! Wires registry, router, engine, store and controller together from a
//! `PipelineConfig`. Hosts embed the returned `Pipeline` and feed chat
//! messages to its controller.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use maestro_capabilities::{register_builtins, StaticQnaProvider};
use maestro_config::PipelineConfig;
use maestro_core::dispatch::DispatchRouter;
use maestro_core::draft::{EntityResolver, PlanDrafter};
use maestro_core::registry::{CapabilityRegistry, RegistryError};
use maestro_core::store::SessionStore;
use maestro_stores::InMemorySessionStore;

use crate::controller::ConversationController;
use crate::engine::{DispatchEngine, TracingProgressSink};

/// Alias table resolver, the development stand-in for a real directory
pub struct StaticEntityResolver {
    aliases: HashMap<String, String>,
    defaults: HashMap<String, Map<String, Value>>,
}

impl StaticEntityResolver {
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
            defaults: HashMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>, entity_ref: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), entity_ref.into());
        self
    }

    pub fn with_defaults(
        mut self,
        entity_ref: impl Into<String>,
        defaults: Map<String, Value>,
    ) -> Self {
        self.defaults.insert(entity_ref.into(), defaults);
        self
    }
}

impl Default for StaticEntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityResolver for StaticEntityResolver {
    async fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.aliases.get(alias).cloned()
    }

    async fn load_defaults(&self, entity_ref: &str) -> Map<String, Value> {
        self.defaults.get(entity_ref).cloned().unwrap_or_default()
    }
}

/// A fully wired pipeline
pub struct Pipeline {
    pub controller: Arc<ConversationController>,
    pub registry: Arc<RwLock<CapabilityRegistry>>,
    pub store: Arc<dyn SessionStore>,
    pub retention_days: i64,
}

/// Build a pipeline with the built-in capabilities, an in-memory store and
/// the given resolver.
pub fn build_pipeline(
    config: &PipelineConfig,
    resolver: Arc<dyn EntityResolver>,
) -> Result<Pipeline, RegistryError> {
    let mut registry = CapabilityRegistry::new();
    register_builtins(&mut registry)?;
    let registry = Arc::new(RwLock::new(registry));

    let mut qna = StaticQnaProvider::new();
    for (keyword, answer) in &config.qna.answers {
        qna = qna.with_answer(keyword.clone(), answer.clone());
    }

    let router = Arc::new(DispatchRouter::new(registry.clone(), Arc::new(qna)));
    let engine = Arc::new(
        DispatchEngine::new(router.clone(), Arc::new(TracingProgressSink)).with_step_timeout(
            std::time::Duration::from_secs(config.execution.step_timeout_secs),
        ),
    );
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let drafter = PlanDrafter::new(registry.clone(), resolver);

    let controller = ConversationController::new(drafter, router, engine, store.clone())
        .with_conversation_ttl(Duration::hours(config.session.conversation_ttl_hours));

    tracing::info!(
        retention_days = config.session.retention_days,
        conversation_ttl_hours = config.session.conversation_ttl_hours,
        "pipeline ready"
    );

    Ok(Pipeline {
        controller: Arc::new(controller),
        registry,
        store,
        retention_days: config.session.retention_days,
    })
}
