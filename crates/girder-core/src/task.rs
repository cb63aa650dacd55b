//! Task records and their status lifecycle.
//!
//! A task is an ephemeral unit of claimable work. Lifecycle:
//! created empty (`creating`) by minting an id, populated with `pending`
//! plus capabilities by its issuer, claimed (`running`, assignee set) by
//! exactly one worker, driven to terminal `complete` with a result, and
//! finally deleted by the issuer once consumed. Tasks never leave
//! `complete`.
//!
//! Invariant: `assignee` is set if and only if the task is `running`, or
//! was running and is now `complete` without a result report (a crashed
//! worker). Completion reports clear the assignee so a finished task is
//! distinguishable from an orphaned claim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::CapabilitySet;
use crate::id::{JobId, WorkerId};

/// Stored status of a task. Field names are wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Creating,
    Pending,
    Running,
    Complete,
}

/// Terminal outcome of a completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Success,
    Failure,
}

/// The task document exchanged with the task store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "CapabilitySet::is_empty")]
    pub capabilities: CapabilitySet,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<u64>,
}

impl TaskRecord {
    /// The empty record stored when an id is minted, before the issuer
    /// knows the full payload.
    pub fn creating() -> Self {
        Self {
            status: TaskStatus::Creating,
            assignee: None,
            capabilities: CapabilitySet::new(),
            params: Value::Null,
            result: None,
            error: None,
            job_id: None,
            build_number: None,
        }
    }

    /// A populated record ready to be offered to workers.
    pub fn pending(
        capabilities: CapabilitySet,
        params: Value,
        job_id: Option<JobId>,
        build_number: Option<u64>,
    ) -> Self {
        Self {
            status: TaskStatus::Pending,
            assignee: None,
            capabilities,
            params,
            result: None,
            error: None,
            job_id,
            build_number,
        }
    }

    /// Whether a worker may attempt to claim this task.
    pub fn claimable(&self) -> bool {
        self.status == TaskStatus::Pending && self.assignee.is_none()
    }

    /// The record a worker writes to claim this task. The write itself
    /// races through the store's compare-and-swap; winning that race is
    /// the proof of exclusive claim.
    pub fn claimed_by(&self, worker: WorkerId) -> Self {
        let mut claimed = self.clone();
        claimed.status = TaskStatus::Running;
        claimed.assignee = Some(worker);
        claimed
    }

    /// Terminal report. Clears the assignee so the task reads as
    /// finished rather than orphaned-but-claimed.
    pub fn completed(&self, result: TaskResult, error: Option<String>) -> Self {
        let mut done = self.clone();
        done.status = TaskStatus::Complete;
        done.result = Some(result);
        done.error = error;
        done.assignee = None;
        done
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Complete
    }

    pub fn succeeded(&self) -> bool {
        self.is_complete() && self.result == Some(TaskResult::Success)
    }
}
