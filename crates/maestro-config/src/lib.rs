//! # Maestro Config
//!
//! YAML configuration for the pipeline: session retention, execution
//! limits, static QnA answers and logging. A `ConfigManager` keeps a live
//! copy and can hot-reload it when the file changes.

mod loader;
mod pipeline;

pub use loader::{load_config, ConfigError, ConfigManager, ConfigWatcher};
pub use pipeline::{ExecutionConfig, LoggingConfig, PipelineConfig, QnaConfig, SessionConfig};
