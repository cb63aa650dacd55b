//! The `Storage` trait.

use async_trait::async_trait;
use bytes::Bytes;
use girder_core::Result;
use std::path::Path;

/// What a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// Result of `stat`.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub kind: FileKind,
    pub size: u64,
}

/// Hierarchical byte store.
///
/// Paths are relative to the backend root. Operations signal `NotFound`
/// when the target is absent and `Conflict` on conflicting creation;
/// every other backend fault surfaces as `TransientIo`. No operation
/// retries internally.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn is_dir(&self, path: &Path) -> Result<bool>;

    async fn is_file(&self, path: &Path) -> Result<bool>;

    /// Size of a file. `NotFound` when absent.
    async fn size(&self, path: &Path) -> Result<u64>;

    /// Directory entries, excluding `.` and `..`. `NotFound` when the
    /// directory is absent.
    async fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Create a single directory. `NotFound` when the parent is absent,
    /// `Conflict` when the target already exists.
    async fn mkdir(&self, path: &Path) -> Result<()>;

    /// Create a directory and any missing parents. Idempotent on an
    /// already-existing leaf.
    async fn make_dirs(&self, path: &Path) -> Result<()>;

    async fn read(&self, path: &Path) -> Result<Bytes>;

    /// Create or truncate a file with the given contents.
    async fn write(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Append to a file, creating it when absent.
    async fn append(&self, path: &Path, data: Bytes) -> Result<()>;

    async fn unlink(&self, path: &Path) -> Result<()>;

    async fn rm_dir(&self, path: &Path) -> Result<()>;

    /// Delete a directory tree. Must not fail when the target is already
    /// absent; another actor may be deleting concurrently.
    async fn rm_tree(&self, path: &Path) -> Result<()>;

    async fn stat(&self, path: &Path) -> Result<Metadata>;
}
