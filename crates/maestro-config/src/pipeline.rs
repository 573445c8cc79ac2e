//! Pipeline configuration types

use serde::Deserialize;
use std::collections::HashMap;

/// Root configuration for the pipeline
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub qna: QnaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session lifecycle settings
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Days a finished session is kept before the sweep removes it
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Hours a conversation keeps pointing at its active session
    #[serde(default = "default_conversation_ttl_hours")]
    pub conversation_ttl_hours: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            conversation_ttl_hours: default_conversation_ttl_hours(),
        }
    }
}

fn default_retention_days() -> i64 {
    30
}

fn default_conversation_ttl_hours() -> i64 {
    24
}

/// Execution limits
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound for a single step, seconds
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

fn default_step_timeout_secs() -> u64 {
    300
}

/// Static answers for the QnA fallback, keyword -> answer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QnaConfig {
    #[serde(default)]
    pub answers: HashMap<String, String>,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "maestro_core=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PipelineConfig {
    /// Reject values that would silently disable parts of the pipeline.
    pub fn validate(&self) -> Result<(), String> {
        if self.session.retention_days <= 0 {
            return Err("session.retention_days must be positive".to_string());
        }
        if self.session.conversation_ttl_hours <= 0 {
            return Err("session.conversation_ttl_hours must be positive".to_string());
        }
        if self.execution.step_timeout_secs == 0 {
            return Err("execution.step_timeout_secs must be positive".to_string());
        }
        if self.logging.level.trim().is_empty() {
            return Err("logging.level must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.retention_days, 30);
        assert_eq!(config.session.conversation_ttl_hours, 24);
        assert_eq!(config.execution.step_timeout_secs, 300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: PipelineConfig = serde_yaml::from_str(
            r#"
session:
  retention_days: 7
qna:
  answers:
    costo: "Dipende dal progetto."
"#,
        )
        .unwrap();
        assert_eq!(config.session.retention_days, 7);
        assert_eq!(config.session.conversation_ttl_hours, 24);
        assert_eq!(config.qna.answers.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config: PipelineConfig = serde_yaml::from_str(
            r#"
execution:
  step_timeout_secs: 0
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
