//! Frontend (coordination service) configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::{ConfigError, ConfigResult};

/// Which storage backend holds jobs, builds, and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageSelection {
    /// Plain local filesystem under `data_directory`.
    Local,
    /// Distributed filesystem reached through a kernel-client mountpoint.
    Cluster {
        /// Monitor quorum address, e.g. "mon1:6789,mon2:6789".
        monitors: String,
        /// Where the cluster filesystem is mounted.
        mountpoint: PathBuf,
    },
}

impl Default for StorageSelection {
    fn default() -> Self {
        StorageSelection::Local
    }
}

/// Which coordination store backs task records and job locks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CoordinationSelection {
    /// File-backed store under the data directory. Locks are exclusive
    /// marker files.
    #[default]
    Filesystem,
    /// In-process store. No persistence, no cross-process exclusion;
    /// single-node and test deployments only.
    Memory,
}

/// Configuration document for the frontend binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Root directory for jobs, builds, and task data.
    pub data_directory: PathBuf,
    #[serde(default)]
    pub storage: StorageSelection,
    #[serde(default)]
    pub coordination: CoordinationSelection,
    /// Task frontends used when the frontend itself issues build-control
    /// tasks. Empty means this instance owns the task store locally.
    #[serde(default)]
    pub task_frontends: Vec<Url>,
}

fn default_listen() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

impl FrontendConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: FrontendConfig = serde_json::from_str(&text)?;
        if config.data_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("data_directory".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_defaults_to_local_backends() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"data_directory": "/var/lib/girder"}}"#).unwrap();
        let config = FrontendConfig::load(file.path()).unwrap();
        assert!(matches!(config.storage, StorageSelection::Local));
        assert!(matches!(config.coordination, CoordinationSelection::Filesystem));
        assert_eq!(config.listen.port(), 8080);
    }

    #[test]
    fn cluster_storage_parses_monitors_and_mountpoint() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "data_directory": "/girder",
                "storage": {{"backend": "cluster", "monitors": "mon1:6789,mon2:6789", "mountpoint": "/mnt/cluster"}}
            }}"#
        )
        .unwrap();
        let config = FrontendConfig::load(file.path()).unwrap();
        match config.storage {
            StorageSelection::Cluster { monitors, mountpoint } => {
                assert_eq!(monitors, "mon1:6789,mon2:6789");
                assert_eq!(mountpoint, PathBuf::from("/mnt/cluster"));
            }
            _ => panic!("expected cluster storage"),
        }
    }
}
