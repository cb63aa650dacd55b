//! Worker processes for Girder CI.
//!
//! Every worker kind shares the same skeleton: poll the task store,
//! claim a matching task through the compare-and-swap protocol, do the
//! work, report a terminal result. The build-control worker decomposes
//! a whole build into ordered subtasks; the leaf workers (git-checkout,
//! execute-shell, publish-artifacts, copy-artifacts) each execute one
//! pipeline step against a transported workspace.

pub mod control;
pub mod leaf;
pub mod steps;
pub mod worker;
pub mod workspace;

pub use worker::{ClaimedTask, WorkerContext};
