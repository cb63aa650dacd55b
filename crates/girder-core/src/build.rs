//! Build state and job configuration documents.
//!
//! Build state is the single source of truth for pipeline progress. The
//! build-control worker persists it after every state-machine transition,
//! so a crash between steps recovers by re-reading it: already-complete
//! subtasks are never re-run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::capability::{Capability, CapabilitySet};
use crate::id::{TaskId, WorkerId};
use crate::task::{TaskRecord, TaskResult, TaskStatus};

/// Status of a build as persisted in its state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Preparing,
    Running,
    Complete,
}

/// Summary of one pipeline step's subtask, mirrored into build state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Vec<String>>,
}

impl SubtaskState {
    /// Summary for a freshly dispatched subtask.
    pub fn dispatched(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            artifacts: BTreeMap::new(),
        }
    }

    /// Summary for a step that can never be dispatched (unknown type).
    /// Recorded directly as a failed completion.
    pub fn undispatchable(error: impl Into<String>) -> Self {
        Self {
            task_id: None,
            status: TaskStatus::Complete,
            result: Some(TaskResult::Failure),
            error: Some(error.into()),
            artifacts: BTreeMap::new(),
        }
    }

    /// Refresh this summary from the subtask's current task record.
    pub fn absorb(&mut self, record: &TaskRecord) {
        self.status = record.status;
        self.result = record.result;
        self.error = record.error.clone();
        if let Some(reported) = record.params.get("artifacts").and_then(Value::as_object) {
            for (artifact_id, path) in reported {
                if let Ok(segments) = serde_json::from_value(path.clone()) {
                    self.artifacts.insert(artifact_id.clone(), segments);
                }
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Complete
    }

    pub fn succeeded(&self) -> bool {
        self.is_complete() && self.result == Some(TaskResult::Success)
    }
}

/// Persisted state of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildState {
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JobConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tasks: BTreeMap<usize, SubtaskState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<WorkerId>,
}

impl BuildState {
    /// The state written by the frontend when a build is triggered,
    /// before any controller has claimed it.
    pub fn preparing() -> Self {
        Self {
            status: BuildStatus::Preparing,
            result: None,
            config: None,
            tasks: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            controller: None,
        }
    }

    /// Merge the artifacts reported by a completed subtask into the
    /// build-wide artifact map.
    pub fn merge_artifacts(&mut self, subtask: &SubtaskState) {
        for (artifact_id, segments) in &subtask.artifacts {
            self.artifacts.insert(artifact_id.clone(), segments.clone());
        }
    }

    /// Mark the build terminal with the given result.
    pub fn finish(&mut self, result: TaskResult) {
        self.status = BuildStatus::Complete;
        self.result = Some(result);
    }

    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Complete && self.result == Some(TaskResult::Success)
    }
}

/// A job's configuration document: an ordered list of pipeline steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub tasks: Vec<BuildStep>,
}

/// One step of a job's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStep {
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub params: Value,
}

/// The kind of work a pipeline step dispatches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    GitCheckout,
    ExecuteShell,
    PublishArtifacts,
    CopyArtifacts,
    Unknown(String),
}

impl From<String> for StepType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "git-checkout" => StepType::GitCheckout,
            "execute-shell" => StepType::ExecuteShell,
            "publish-artifacts" => StepType::PublishArtifacts,
            "copy-artifacts" => StepType::CopyArtifacts,
            _ => StepType::Unknown(tag),
        }
    }
}

impl From<StepType> for String {
    fn from(step: StepType) -> Self {
        step.as_str().to_owned()
    }
}

impl StepType {
    pub fn as_str(&self) -> &str {
        match self {
            StepType::GitCheckout => "git-checkout",
            StepType::ExecuteShell => "execute-shell",
            StepType::PublishArtifacts => "publish-artifacts",
            StepType::CopyArtifacts => "copy-artifacts",
            StepType::Unknown(tag) => tag,
        }
    }
}

impl BuildStep {
    /// Translate this step into the capability set a worker must
    /// advertise to run it. `None` for unknown step types, which are
    /// never dispatched.
    ///
    /// This is the single place step types map to capabilities; nothing
    /// else parses the `nodelabel_` convention.
    pub fn required_capabilities(&self) -> Option<CapabilitySet> {
        let mut capabilities = CapabilitySet::new();
        match &self.step_type {
            StepType::GitCheckout => {
                capabilities.insert(Capability::new(Capability::GIT_CHECKOUT_V1));
            }
            StepType::ExecuteShell => {
                capabilities.insert(Capability::new(Capability::EXECUTE_SHELL_V1));
                if let Some(labels) = self.params.get("nodelabels").and_then(Value::as_array) {
                    for label in labels.iter().filter_map(Value::as_str) {
                        capabilities.insert(Capability::node_label(label));
                    }
                }
            }
            StepType::PublishArtifacts => {
                capabilities.insert(Capability::new(Capability::PUBLISH_ARTIFACTS_V1));
            }
            StepType::CopyArtifacts => {
                capabilities.insert(Capability::new(Capability::COPY_ARTIFACTS_V1));
            }
            StepType::Unknown(_) => return None,
        }
        Some(capabilities)
    }
}
