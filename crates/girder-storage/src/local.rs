//! Local-filesystem storage backend.

use async_trait::async_trait;
use bytes::Bytes;
use girder_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::backend::{FileKind, Metadata, Storage};

/// Storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a relative path under the root. Absolute paths and
    /// parent-directory components are refused so no caller-supplied
    /// path can reach outside the storage tree.
    fn full(&self, path: &Path) -> Result<PathBuf> {
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::InvalidInput(format!(
                        "path escapes storage root: {}",
                        path.display()
                    )));
                }
            }
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl Storage for LocalFs {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.full(path)?).await?)
    }

    async fn is_dir(&self, path: &Path) -> Result<bool> {
        match tokio::fs::metadata(self.full(path)?).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn is_file(&self, path: &Path) -> Result<bool> {
        match tokio::fs::metadata(self.full(path)?).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn size(&self, path: &Path) -> Result<u64> {
        Ok(tokio::fs::metadata(self.full(path)?).await?.len())
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(self.full(path)?).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(entries)
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir(self.full(path)?).await?;
        Ok(())
    }

    async fn make_dirs(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(self.full(path)?).await?;
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Bytes> {
        Ok(tokio::fs::read(self.full(path)?).await?.into())
    }

    async fn write(&self, path: &Path, data: Bytes) -> Result<()> {
        tokio::fs::write(self.full(path)?, &data).await?;
        Ok(())
    }

    async fn append(&self, path: &Path, data: Bytes) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.full(path)?)
            .await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(self.full(path)?).await?;
        Ok(())
    }

    async fn rm_dir(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir(self.full(path)?).await?;
        Ok(())
    }

    async fn rm_tree(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(self.full(path)?).await {
            Ok(()) => Ok(()),
            // Tolerate concurrent deletion.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn stat(&self, path: &Path) -> Result<Metadata> {
        let meta = tokio::fs::metadata(self.full(path)?).await?;
        let kind = if meta.is_dir() {
            FileKind::Directory
        } else if meta.is_file() {
            FileKind::File
        } else {
            return Err(Error::InvalidInput(format!(
                "unsupported file type at {}",
                path.display()
            )));
        };
        Ok(Metadata {
            kind,
            size: meta.len(),
        })
    }
}
