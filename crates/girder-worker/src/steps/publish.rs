//! Publish-artifacts step: upload listed workspace files as build
//! artifacts and report the resulting artifact map on the task record.
//!
//! The build controller absorbs the reported map into the build state,
//! which is how artifacts become visible to later builds (and to the
//! copy-artifacts step).

use async_trait::async_trait;
use girder_config::WorkerConfig;
use girder_core::{Capability, CapabilitySet, TaskRecord};
use serde::Deserialize;
use serde_json::json;
use std::path::{Component, Path, PathBuf};

use crate::leaf::{StepOutcome, StepRunner};
use crate::worker::WorkerContext;

#[derive(Debug, Deserialize)]
struct PublishParams {
    /// Workspace-relative paths of the files to publish.
    artifacts: Vec<String>,
}

pub struct PublishArtifacts;

#[async_trait]
impl StepRunner for PublishArtifacts {
    fn kind_capabilities(&self, _config: &WorkerConfig) -> CapabilitySet {
        [Capability::PUBLISH_ARTIFACTS_V1].into_iter().collect()
    }

    fn uploads_workspace(&self) -> bool {
        // Publishing only reads the workspace.
        false
    }

    async fn execute(
        &self,
        ctx: &WorkerContext,
        record: &mut TaskRecord,
        workspace: &Path,
    ) -> StepOutcome {
        let Some(job_id) = record.job_id.clone() else {
            return StepOutcome::failure("task carries no job id", String::new());
        };
        let Some(build_number) = record.build_number else {
            return StepOutcome::failure("task carries no build number", String::new());
        };
        let params: PublishParams = match serde_json::from_value(record.params.clone()) {
            Ok(params) => params,
            Err(err) => {
                return StepOutcome::failure(format!("invalid publish params: {err}"), String::new());
            }
        };

        let mut console = String::new();
        let mut reported = serde_json::Map::new();
        let mut failed = false;

        for relative in &params.artifacts {
            let Some(segments) = workspace_relative_segments(relative) else {
                console.push_str(&format!("Refusing artifact path '{relative}'\n"));
                failed = true;
                continue;
            };
            let data = match tokio::fs::read(workspace.join(relative)).await {
                Ok(data) => data,
                Err(err) => {
                    console.push_str(&format!("Failed to read '{relative}': {err}\n"));
                    failed = true;
                    continue;
                }
            };
            match ctx
                .retry_policy()
                .run(|| ctx.client.create_artifact(&job_id, build_number, data.clone().into()))
                .await
            {
                Ok(artifact_id) => {
                    console.push_str(&format!("Stored '{relative}' as artifact '{artifact_id}'\n"));
                    reported.insert(artifact_id, json!(segments));
                }
                Err(err) => {
                    console.push_str(&format!("Failed to store artifact '{relative}': {err}\n"));
                    failed = true;
                }
            }
        }

        if !reported.is_empty() {
            record.params["artifacts"] = serde_json::Value::Object(reported);
        }

        if failed {
            StepOutcome::failure("failed to store artifacts", console)
        } else {
            StepOutcome::success(console)
        }
    }
}

/// Split a workspace-relative artifact path into its segments,
/// rejecting anything that would resolve outside the workspace.
fn workspace_relative_segments(relative: &str) -> Option<Vec<String>> {
    let path = PathBuf::from(relative);
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if segments.is_empty() { None } else { Some(segments) }
}
