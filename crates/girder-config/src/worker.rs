//! Worker process configuration.

use girder_core::CapabilitySet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::{ConfigError, ConfigResult};

/// Configuration document consumed by every worker kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Capabilities this worker advertises, beyond the ones implied by
    /// its kind.
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Seconds to sleep between task-list polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Attempt budget for retried frontend calls.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Build/job frontends (state, console, workspace, artifacts).
    pub frontends: Vec<Url>,
    /// Task frontends. Defaults to `frontends` when absent.
    #[serde(default)]
    pub task_frontends: Vec<Url>,
    /// Node labels advertised by execute-shell workers.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Maximum concurrently executing tasks.
    #[serde(default = "default_executors")]
    pub executors: usize,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_retry_count() -> u32 {
    10
}

fn default_executors() -> usize {
    1
}

impl WorkerConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: WorkerConfig = serde_json::from_str(&text)?;
        if config.frontends.is_empty() {
            return Err(ConfigError::MissingField("frontends".into()));
        }
        if config.task_frontends.is_empty() {
            config.task_frontends = config.frontends.clone();
        }
        if config.executors == 0 {
            return Err(ConfigError::InvalidValue {
                field: "executors".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn task_frontends_default_to_frontends() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"frontends": ["http://ci.internal:8080/"], "labels": ["gpu"]}}"#
        )
        .unwrap();
        let config = WorkerConfig::load(file.path()).unwrap();
        assert_eq!(config.task_frontends, config.frontends);
        assert_eq!(config.poll_interval, 10);
        assert_eq!(config.retry_count, 10);
        assert_eq!(config.executors, 1);
        assert_eq!(config.labels, vec!["gpu"]);
    }

    #[test]
    fn missing_frontends_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"frontends": []}}"#).unwrap();
        assert!(matches!(
            WorkerConfig::load(file.path()),
            Err(ConfigError::MissingField(_))
        ));
    }
}
