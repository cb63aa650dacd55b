//! Core domain types for the Girder CI orchestrator.
//!
//! This crate contains:
//! - Task, worker, and job identifiers
//! - Task records and their status lifecycle
//! - Capability sets and subset matching
//! - Build state and job configuration documents
//! - The shared error taxonomy and the retry combinator

pub mod build;
pub mod capability;
pub mod error;
pub mod id;
pub mod retry;
pub mod task;

pub use build::{BuildState, BuildStatus, BuildStep, JobConfig, StepType, SubtaskState};
pub use capability::{Capability, CapabilitySet};
pub use error::{Error, Result};
pub use id::{JobId, TaskId, WorkerId};
pub use retry::RetryPolicy;
pub use task::{TaskRecord, TaskResult, TaskStatus};
