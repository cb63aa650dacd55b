//! Distributed lock and coordination store for Girder CI.
//!
//! The claim protocol derives exclusivity entirely from the key-value
//! store's per-key compare-and-swap; the lock service only guards job
//! build-number allocation. Both are trait seams: file-backed
//! implementations serve real deployments (the files live on the shared
//! storage backend's filesystem), the in-memory ones serve single-node
//! and test runs.

pub mod kv;
pub mod lock;

pub use kv::{FsKv, KvStore, MemKv};
pub use lock::{FsLockFactory, Lock, LockFactory, NullLock, NullLockFactory};
