//! Compare-and-swap key-value store.
//!
//! Task records live here. The one strict guarantee the whole system
//! leans on is per-key linearizability of `set`: when many workers race
//! to claim a task, exactly one compare-and-swap wins and every loser
//! sees a conflict. Cross-key ordering is neither provided nor needed.

use async_trait::async_trait;
use bytes::Bytes;
use girder_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key-value store with compare-and-swap writes.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. `NotFound` when the key is absent.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Write a value. With `expected_prev`, the write succeeds only if
    /// the stored value still equals it (`Conflict` otherwise, nothing
    /// written). Without it, a missing key is created and an existing
    /// key overwritten.
    async fn set(&self, key: &str, value: Bytes, expected_prev: Option<Bytes>) -> Result<()>;

    /// Enumerate all keys. No ordering guaranteed.
    async fn list(&self) -> Result<Vec<String>>;

    /// Best-effort delete; a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

fn check_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid key: {key:?}")))
    }
}

/// File-per-key store with per-key serialized compare-and-swap.
///
/// Writes go through a temp file plus rename so readers never observe a
/// torn value. The per-key mutex serializes read-compare-write; the
/// coordination service is deliberately unsharded, so one instance owns
/// the namespace and in-process serialization is sufficient.
pub struct FsKv {
    root: PathBuf,
    guards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FsKv {
    /// Open the store directory, creating it when missing. Failure is
    /// fatal to initialization.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|err| {
            Error::CoordinationUnavailable(format!(
                "store directory {} unusable: {err}",
                root.display()
            ))
        })?;
        Ok(Self {
            root,
            guards: Mutex::new(HashMap::new()),
        })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn guard_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.guards
            .lock()
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the guard entry for a key nobody is currently serializing
    /// on. A guard still shared with an in-flight `set` must stay, or
    /// a later writer would mint a second mutex for the same key and
    /// two compare-and-swap writes could both win.
    fn prune_guard(&self, key: &str) {
        let mut guards = self.guards.lock();
        if guards.get(key).is_some_and(|guard| Arc::strong_count(guard) == 1) {
            guards.remove(key);
        }
    }

    #[cfg(test)]
    fn guard_count(&self) -> usize {
        self.guards.lock().len()
    }

    async fn read_current(path: &Path) -> Result<Option<Bytes>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(data.into())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl KvStore for FsKv {
    async fn get(&self, key: &str) -> Result<Bytes> {
        check_key(key)?;
        match Self::read_current(&self.key_path(key)).await? {
            Some(data) => Ok(data),
            None => Err(Error::NotFound(format!("key {key}"))),
        }
    }

    async fn set(&self, key: &str, value: Bytes, expected_prev: Option<Bytes>) -> Result<()> {
        check_key(key)?;
        let guard = self.guard_for(key);
        let _held = guard.lock().await;

        let path = self.key_path(key);
        let current = Self::read_current(&path).await?;
        if let Some(expected) = &expected_prev {
            match &current {
                Some(stored) if stored == expected => {}
                Some(_) => {
                    return Err(Error::Conflict(format!("key {key}: stored value changed")));
                }
                None => {
                    return Err(Error::Conflict(format!("key {key}: expected value, key absent")));
                }
            }
        }

        let temp = self.root.join(format!(".{key}.tmp"));
        tokio::fs::write(&temp, &value).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                keys.push(name);
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        let removed = match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        };
        // Task keys are minted per build and deleted when it reports,
        // so the guard map would otherwise grow without bound.
        self.prune_guard(key);
        removed
    }
}

/// In-process store. Same contract, no persistence.
#[derive(Default)]
pub struct MemKv {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemKv {
    async fn get(&self, key: &str) -> Result<Bytes> {
        check_key(key)?;
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("key {key}")))
    }

    async fn set(&self, key: &str, value: Bytes, expected_prev: Option<Bytes>) -> Result<()> {
        check_key(key)?;
        let mut entries = self.entries.lock();
        if let Some(expected) = &expected_prev {
            match entries.get(key) {
                Some(stored) if stored == expected => {}
                _ => return Err(Error::Conflict(format!("key {key}: stored value changed"))),
            }
        }
        entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.entries.lock().remove(key);
        Ok(())
    }
}
