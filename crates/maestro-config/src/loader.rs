use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::pipeline::PipelineConfig;

/// Config errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Load and validate a pipeline config file
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: PipelineConfig = serde_yaml::from_str(&content)?;
    config.validate().map_err(ConfigError::InvalidConfig)?;
    Ok(config)
}

/// Holds the live config and reloads it from disk on demand or on change
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<PipelineConfig>>,
}

impl ConfigManager {
    /// Create a manager with defaults; call `load` to read the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Arc::new(RwLock::new(PipelineConfig::default())),
        }
    }

    /// Shared handle to the live config
    pub fn config(&self) -> Arc<RwLock<PipelineConfig>> {
        self.config.clone()
    }

    /// Read, validate and swap in the file's config. An invalid file leaves
    /// the previous config in place.
    pub async fn load(&self) -> Result<(), ConfigError> {
        let loaded = load_config(&self.path)?;
        let mut current = self.config.write().await;
        *current = loaded;
        tracing::info!(path = %self.path.display(), "pipeline config loaded");
        Ok(())
    }

    /// Watch the config file and reload on modification.
    pub fn start_watching(self: &Arc<Self>) -> Result<ConfigWatcher, ConfigError> {
        let manager = Arc::clone(self);
        let handle = tokio::runtime::Handle::current();

        let mut watcher: RecommendedWatcher = notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        let manager = Arc::clone(&manager);
                        handle.spawn(async move {
                            if let Err(err) = manager.load().await {
                                tracing::warn!(error = %err, "config reload failed, keeping previous");
                            }
                        });
                    }
                }
            },
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        Ok(ConfigWatcher { _watcher: watcher })
    }
}

/// Keeps the file watcher alive
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}
