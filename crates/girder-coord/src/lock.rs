//! Exclusive named locks.
//!
//! A lock is an ephemeral exclusive marker tagged with a unique holder
//! token. `try_lock` is a single non-blocking attempt with no queueing;
//! callers decide whether and when to retry. `unlock` releases
//! only the caller's own marker, so a holder that timed out spuriously
//! can never release somebody else's acquisition.

use async_trait::async_trait;
use girder_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

/// Age past which a marker is treated as abandoned by a dead holder.
/// Locks are held only across a build-number allocation, so any marker
/// this old belongs to a process that never got to release it.
const STALE_AFTER: Duration = Duration::from_secs(300);

/// One named exclusive lock.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Single non-blocking acquisition attempt. False when the lock is
    /// already held by anyone (including a previous incarnation of this
    /// process).
    async fn try_lock(&self) -> Result<bool>;

    /// Release the lock if this instance holds it; a no-op otherwise.
    async fn unlock(&self);

    /// Release the underlying session.
    async fn close(&self);
}

/// Produces locks by name. The frontend holds one factory and mints a
/// lock per job when allocating build numbers.
#[async_trait]
pub trait LockFactory: Send + Sync {
    async fn lock(&self, name: &str) -> Result<Box<dyn Lock>>;
}

/// Marker-file lock on a shared filesystem.
///
/// The marker is created with an exclusive create, which the cluster
/// filesystem serializes across nodes; its contents are the holder
/// token. A marker whose mtime is older than the stale window is
/// treated as abandoned and cleared on the next acquisition attempt,
/// so a crashed holder cannot wedge the lock forever.
pub struct FsLock {
    marker: PathBuf,
    token: Uuid,
    stale_after: Duration,
}

impl FsLock {
    fn new(lock_dir: &Path, name: &str, stale_after: Duration) -> Self {
        Self {
            marker: lock_dir.join(format!("{name}.lock")),
            token: Uuid::new_v4(),
            stale_after,
        }
    }

    async fn create_marker(&self) -> Result<Option<()>> {
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.marker)
            .await;
        match created {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(self.token.to_string().as_bytes()).await?;
                file.flush().await?;
                Ok(Some(()))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a marker left behind by a holder that died before
    /// releasing. The marker is renamed aside first, so when several
    /// waiters see the same stale marker at most one of them clears it.
    /// Returns whether a fresh acquisition attempt is worth making.
    async fn reclaim_stale(&self) -> Result<bool> {
        let modified = match tokio::fs::metadata(&self.marker).await {
            Ok(meta) => meta.modified()?,
            // Released between our attempt and now; just retry.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age < self.stale_after {
            return Ok(false);
        }

        let reaped = self.marker.with_extension(format!("reaped.{}", self.token));
        match tokio::fs::rename(&self.marker, &reaped).await {
            Ok(()) => {
                warn!(
                    marker = %self.marker.display(),
                    age_secs = age.as_secs(),
                    "cleared stale lock marker from a dead holder"
                );
                if let Err(err) = tokio::fs::remove_file(&reaped).await {
                    warn!(marker = %reaped.display(), error = %err, "failed to remove reaped marker");
                }
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Lock for FsLock {
    async fn try_lock(&self) -> Result<bool> {
        for attempt in 0..2 {
            if self.create_marker().await?.is_some() {
                debug!(marker = %self.marker.display(), "lock acquired");
                return Ok(true);
            }
            if attempt > 0 || !self.reclaim_stale().await? {
                break;
            }
        }
        debug!(marker = %self.marker.display(), "lock already held");
        Ok(false)
    }

    async fn unlock(&self) {
        match tokio::fs::read_to_string(&self.marker).await {
            Ok(contents) if contents == self.token.to_string() => {
                if let Err(err) = tokio::fs::remove_file(&self.marker).await {
                    warn!(marker = %self.marker.display(), error = %err, "failed to release lock");
                }
            }
            // Held by someone else, or already gone. Not ours to touch.
            Ok(_) | Err(_) => {}
        }
    }

    async fn close(&self) {}
}

/// Factory for [`FsLock`]s under one lock directory.
#[derive(Debug)]
pub struct FsLockFactory {
    lock_dir: PathBuf,
    stale_after: Duration,
}

impl FsLockFactory {
    /// Open the lock directory, creating it when missing. An unreachable
    /// directory is a fatal initialization failure, not something to
    /// retry into.
    pub fn open(lock_dir: impl Into<PathBuf>) -> Result<Self> {
        let lock_dir = lock_dir.into();
        std::fs::create_dir_all(&lock_dir).map_err(|err| {
            Error::CoordinationUnavailable(format!(
                "lock directory {} unusable: {err}",
                lock_dir.display()
            ))
        })?;
        Ok(Self {
            lock_dir,
            stale_after: STALE_AFTER,
        })
    }

    /// Override the stale window. Markers older than this are cleared
    /// by the next acquisition attempt.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

#[async_trait]
impl LockFactory for FsLockFactory {
    async fn lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        Ok(Box::new(FsLock::new(&self.lock_dir, name, self.stale_after)))
    }
}

/// Lock that always grants. No real mutual exclusion; single-node and
/// test deployments only.
pub struct NullLock;

#[async_trait]
impl Lock for NullLock {
    async fn try_lock(&self) -> Result<bool> {
        Ok(true)
    }

    async fn unlock(&self) {}

    async fn close(&self) {}
}

/// Factory for [`NullLock`]s.
pub struct NullLockFactory;

#[async_trait]
impl LockFactory for NullLockFactory {
    async fn lock(&self, _name: &str) -> Result<Box<dyn Lock>> {
        Ok(Box::new(NullLock))
    }
}
