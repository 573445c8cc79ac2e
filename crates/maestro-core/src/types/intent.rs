//! ClassifiedIntent type definitions
//!
//! ClassifiedIntent is the classifier's verdict for a single inbound
//! message. It is produced fresh per message and never persisted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Interaction mode decided by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentMode {
    /// The message asks for something to be executed
    Action,
    /// The message is a question, answered best-effort
    Qna,
}

/// Classifier output for one message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedIntent {
    /// Interaction mode
    pub mode: IntentMode,
    /// Canonical intent name (capability name for Action mode)
    #[serde(default)]
    pub intent: Option<String>,
    /// Extracted arguments, keyed by field name
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    /// Entity alias/reference found anywhere in the text
    #[serde(default)]
    pub entity_ref: Option<String>,
}

impl ClassifiedIntent {
    /// Create an Action-mode intent
    pub fn action(intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            mode: IntentMode::Action,
            intent: Some(intent.into()),
            args: Map::new(),
            confidence,
            entity_ref: None,
        }
    }

    /// Create a QnA-mode fallback intent
    pub fn qna(confidence: f64) -> Self {
        Self {
            mode: IntentMode::Qna,
            intent: None,
            args: Map::new(),
            confidence,
            entity_ref: None,
        }
    }

    /// Attach an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Attach all arguments from a map
    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    /// Attach an entity reference
    pub fn with_entity_ref(mut self, entity_ref: Option<String>) -> Self {
        self.entity_ref = entity_ref;
        self
    }
}
