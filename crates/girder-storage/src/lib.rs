//! Storage backend abstraction for Girder CI.
//!
//! Jobs, builds, workspaces, and artifacts live in a hierarchical byte
//! store. Two interchangeable backends exist: the plain local filesystem
//! and a distributed filesystem reached through a kernel-client
//! mountpoint. Callers receive an `Arc<dyn Storage>` selected once at
//! startup and must not depend on backend identity.

pub mod backend;
pub mod cluster;
pub mod local;

pub use backend::{FileKind, Metadata, Storage};
pub use cluster::ClusterFs;
pub use local::LocalFs;

use girder_config::StorageSelection;
use girder_core::Result;
use std::path::Path;
use std::sync::Arc;

/// Build the configured storage backend, verifying availability up
/// front.
pub async fn from_selection(
    selection: &StorageSelection,
    data_directory: &Path,
) -> Result<Arc<dyn Storage>> {
    match selection {
        StorageSelection::Local => Ok(Arc::new(LocalFs::new(data_directory))),
        StorageSelection::Cluster { monitors, mountpoint } => {
            let backend = ClusterFs::connect(monitors, mountpoint).await?;
            Ok(Arc::new(backend))
        }
    }
}
