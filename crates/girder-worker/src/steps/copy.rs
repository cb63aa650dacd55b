//! Copy-artifacts step: pull artifacts from the last successful build
//! of another job into this build's workspace, for build chaining.

use async_trait::async_trait;
use girder_config::WorkerConfig;
use girder_core::{Capability, CapabilitySet, JobId, Result, TaskRecord};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::leaf::{StepOutcome, StepRunner};
use crate::worker::WorkerContext;

#[derive(Debug, Deserialize)]
struct CopyParams {
    /// Source job to copy from.
    job: String,
    /// Artifact paths (as recorded by publish-artifacts) to copy.
    artifacts: Vec<String>,
    /// Optional subdirectory of the workspace to copy into.
    #[serde(default)]
    target_directory: Option<String>,
}

pub struct CopyArtifacts;

#[async_trait]
impl StepRunner for CopyArtifacts {
    fn kind_capabilities(&self, _config: &WorkerConfig) -> CapabilitySet {
        [Capability::COPY_ARTIFACTS_V1].into_iter().collect()
    }

    async fn execute(
        &self,
        ctx: &WorkerContext,
        record: &mut TaskRecord,
        workspace: &Path,
    ) -> StepOutcome {
        let params: CopyParams = match serde_json::from_value(record.params.clone()) {
            Ok(params) => params,
            Err(err) => {
                return StepOutcome::failure(format!("invalid copy params: {err}"), String::new());
            }
        };
        let source_job: JobId = match params.job.parse() {
            Ok(job) => job,
            Err(err) => return StepOutcome::failure(format!("invalid source job: {err}"), String::new()),
        };

        let (source_build, artifacts) =
            match last_successful_artifacts(ctx, &source_job).await {
                Ok(Some(found)) => found,
                Ok(None) => {
                    return StepOutcome::failure(
                        format!("no successful build of {source_job} found"),
                        String::new(),
                    );
                }
                Err(err) => {
                    return StepOutcome::failure(
                        format!("could not inspect builds of {source_job}: {err}"),
                        String::new(),
                    );
                }
            };

        let wanted: Vec<(String, String)> = artifacts
            .iter()
            .filter_map(|(artifact_id, segments)| {
                let path = segments.join("/");
                params
                    .artifacts
                    .contains(&path)
                    .then(|| (artifact_id.clone(), path))
            })
            .collect();
        if wanted.is_empty() {
            return StepOutcome::failure(
                format!("none of the requested artifacts exist in {source_job}/{source_build}"),
                String::new(),
            );
        }

        let target_root = match &params.target_directory {
            Some(sub) => workspace.join(sub),
            None => workspace.to_owned(),
        };

        let mut console = format!("Copying artifacts from {source_job} build {source_build}\n");
        for (artifact_id, path) in &wanted {
            let data = match ctx
                .retry_policy()
                .run(|| ctx.client.get_artifact(&source_job, source_build, artifact_id))
                .await
            {
                Ok(data) => data,
                Err(err) => {
                    return StepOutcome::failure(
                        format!("failed to fetch artifact '{path}': {err}"),
                        console,
                    );
                }
            };
            let destination = target_root.join(path);
            if let Some(parent) = destination.parent() {
                if let Err(err) = tokio::fs::create_dir_all(parent).await {
                    return StepOutcome::failure(format!("could not create '{path}': {err}"), console);
                }
            }
            if let Err(err) = tokio::fs::write(&destination, &data).await {
                return StepOutcome::failure(format!("could not write '{path}': {err}"), console);
            }
            console.push_str(&format!("  {path}\n"));
        }

        StepOutcome::success(console)
    }
}

/// Walk the source job's builds newest-first and return the artifact
/// map of the first one that completed successfully.
async fn last_successful_artifacts(
    ctx: &WorkerContext,
    job: &JobId,
) -> Result<Option<(u64, BTreeMap<String, Vec<String>>)>> {
    let list = ctx
        .retry_policy()
        .run(|| ctx.client.list_builds(job))
        .await?;
    for build in list.builds.into_iter().rev() {
        match ctx.client.get_build_state(job, build).await {
            Ok(state) if state.succeeded() => return Ok(Some((build, state.artifacts))),
            Ok(_) => continue,
            // A build directory without readable state is skipped, not
            // fatal.
            Err(_) => continue,
        }
    }
    Ok(None)
}
