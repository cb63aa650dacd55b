//! Distributed-filesystem storage backend.
//!
//! The cluster filesystem is reached through its kernel client: the
//! deployment mounts the filesystem for the configured monitor quorum
//! and this backend performs I/O through that mountpoint. `connect`
//! verifies the mount up front so a missing or dead mount fails fast
//! instead of silently writing to the local disk underneath it.

use async_trait::async_trait;
use bytes::Bytes;
use girder_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backend::{Metadata, Storage};
use crate::local::LocalFs;

/// Storage on a distributed filesystem mount.
#[derive(Debug)]
pub struct ClusterFs {
    monitors: String,
    inner: LocalFs,
}

impl ClusterFs {
    /// Verify the mountpoint and open a session on it.
    pub async fn connect(monitors: &str, mountpoint: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(mountpoint).await.map_err(|err| {
            Error::TransientIo(format!(
                "cluster mount {} unavailable (monitors {monitors}): {err}",
                mountpoint.display()
            ))
        })?;
        if !meta.is_dir() {
            return Err(Error::TransientIo(format!(
                "cluster mount {} is not a directory",
                mountpoint.display()
            )));
        }
        info!(%monitors, mountpoint = %mountpoint.display(), "cluster storage session opened");
        Ok(Self {
            monitors: monitors.to_owned(),
            inner: LocalFs::new(PathBuf::from(mountpoint)),
        })
    }

    pub fn monitors(&self) -> &str {
        &self.monitors
    }
}

#[async_trait]
impl Storage for ClusterFs {
    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn is_dir(&self, path: &Path) -> Result<bool> {
        self.inner.is_dir(path).await
    }

    async fn is_file(&self, path: &Path) -> Result<bool> {
        self.inner.is_file(path).await
    }

    async fn size(&self, path: &Path) -> Result<u64> {
        self.inner.size(path).await
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        self.inner.list_dir(path).await
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        self.inner.mkdir(path).await
    }

    async fn make_dirs(&self, path: &Path) -> Result<()> {
        self.inner.make_dirs(path).await
    }

    async fn read(&self, path: &Path) -> Result<Bytes> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, data: Bytes) -> Result<()> {
        self.inner.write(path, data).await
    }

    async fn append(&self, path: &Path, data: Bytes) -> Result<()> {
        self.inner.append(path, data).await
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        self.inner.unlink(path).await
    }

    async fn rm_dir(&self, path: &Path) -> Result<()> {
        self.inner.rm_dir(path).await
    }

    async fn rm_tree(&self, path: &Path) -> Result<()> {
        self.inner.rm_tree(path).await
    }

    async fn stat(&self, path: &Path) -> Result<Metadata> {
        self.inner.stat(path).await
    }
}
