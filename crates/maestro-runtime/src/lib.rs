//! # Maestro Runtime
//!
//! The conversational side of the pipeline: a controller that turns chat
//! messages into classified intents, drafted sessions and replies, and an
//! execution engine that runs confirmed plans through the dispatch router.

mod bootstrap;
mod controller;
mod engine;
mod reply;

pub use bootstrap::{build_pipeline, Pipeline, StaticEntityResolver};
pub use controller::{ControllerAction, ControllerError, ControllerResponse, ConversationController};
pub use engine::{DispatchEngine, TracingProgressSink};
pub use reply::{extract_values, parse_reply, ParsedReply};
