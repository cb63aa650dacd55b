//! Generic lifecycle shared by every leaf worker.
//!
//! A leaf task runs as: claim, fetch and unpack the build's workspace,
//! execute the step, append the captured output to the build console,
//! upload the workspace back when the step modified it, and report a
//! terminal result with the assignee cleared. Concurrency is bounded by
//! the configured executor count; each in-flight task is an independent
//! session.

use async_trait::async_trait;
use girder_config::WorkerConfig;
use girder_core::{CapabilitySet, Error, JobId, Result, TaskRecord, TaskResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::worker::{ClaimedTask, WorkerContext};
use crate::workspace::{self, LocalWorkspace};

/// What one step execution produced.
#[derive(Debug)]
pub struct StepOutcome {
    pub result: TaskResult,
    pub error: Option<String>,
    pub console: String,
}

impl StepOutcome {
    pub fn success(console: String) -> Self {
        Self {
            result: TaskResult::Success,
            error: None,
            console,
        }
    }

    pub fn failure(error: impl Into<String>, console: String) -> Self {
        Self {
            result: TaskResult::Failure,
            error: Some(error.into()),
            console,
        }
    }
}

/// One step kind: its advertised capabilities and its actual work.
#[async_trait]
pub trait StepRunner: Send + Sync + 'static {
    /// Capabilities this worker kind advertises, derived from config
    /// (execute-shell adds one nodelabel capability per configured
    /// label).
    fn kind_capabilities(&self, config: &WorkerConfig) -> CapabilitySet;

    /// Whether a successful step sends its workspace back. Publishing
    /// reads the workspace without modifying it.
    fn uploads_workspace(&self) -> bool {
        true
    }

    /// Run the step against an unpacked workspace. The record is the
    /// claimed task; a runner may report data on it (the artifact map)
    /// for the build controller to absorb.
    async fn execute(
        &self,
        ctx: &WorkerContext,
        record: &mut TaskRecord,
        workspace: &Path,
    ) -> StepOutcome;
}

/// Claim loop plus per-task session handling for one runner kind.
pub struct LeafWorker<R> {
    ctx: Arc<WorkerContext>,
    runner: Arc<R>,
}

impl<R: StepRunner> LeafWorker<R> {
    pub fn new(config: WorkerConfig, runner: R) -> Self {
        let capabilities = runner.kind_capabilities(&config);
        Self {
            ctx: Arc::new(WorkerContext::new(config, capabilities)),
            runner: Arc::new(runner),
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub async fn run(self) -> Result<()> {
        let executors = self.ctx.config.executors;
        let pool = Arc::new(Semaphore::new(executors));
        loop {
            let permit = pool
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::TransientIo("executor pool closed".into()))?;
            match self.ctx.fetch_task(Some(Duration::from_secs(60))).await {
                Ok(Some(task)) => {
                    let ctx = self.ctx.clone();
                    let runner = self.runner.clone();
                    tokio::spawn(async move {
                        process(&ctx, runner.as_ref(), task).await;
                        drop(permit);
                    });
                }
                Ok(None) => drop(permit),
                Err(err) => {
                    warn!(error = %err, "task polling failed");
                    drop(permit);
                    tokio::time::sleep(self.ctx.config.poll_interval()).await;
                }
            }
        }
    }

    /// Run one claimed task to completion. Exposed for tests and for
    /// single-shot invocations.
    pub async fn process(&self, task: ClaimedTask) {
        process(&self.ctx, self.runner.as_ref(), task).await;
    }
}

async fn process<R: StepRunner>(ctx: &WorkerContext, runner: &R, mut task: ClaimedTask) {
    let Some(job_id) = task.record.job_id.clone() else {
        report(ctx, &task, TaskResult::Failure, Some("task carries no job id".into())).await;
        return;
    };
    let Some(build_number) = task.record.build_number else {
        report(ctx, &task, TaskResult::Failure, Some("task carries no build number".into())).await;
        return;
    };

    let outcome = run_step(ctx, runner, &mut task.record, &job_id, build_number).await;

    if !outcome.console.is_empty() {
        // At-least-once: a retried append that already landed just
        // duplicates log lines.
        if let Err(err) = ctx
            .retry_policy()
            .run(|| ctx.client.append_console(&job_id, build_number, &outcome.console))
            .await
        {
            warn!(job = %job_id, build = build_number, error = %err, "console append failed");
        }
    }

    info!(
        task = %task.id, job = %job_id, build = build_number, result = ?outcome.result,
        "step finished"
    );
    report(ctx, &task, outcome.result, outcome.error).await;
}

async fn run_step<R: StepRunner>(
    ctx: &WorkerContext,
    runner: &R,
    record: &mut TaskRecord,
    job_id: &JobId,
    build_number: u64,
) -> StepOutcome {
    let local = match LocalWorkspace::create() {
        Ok(local) => local,
        Err(err) => return StepOutcome::failure(format!("workspace scratch dir: {err}"), String::new()),
    };

    let archive = local.archive();
    let fetched = ctx
        .retry_policy()
        .run(|| ctx.client.get_workspace(job_id, build_number, &archive))
        .await;
    if let Err(err) = fetched {
        return StepOutcome::failure(format!("failed to fetch workspace: {err}"), String::new());
    }
    if let Err(err) = workspace::unpack(&local.archive(), &local.tree()).await {
        return StepOutcome::failure(format!("failed to unpack workspace: {err}"), String::new());
    }

    let outcome = runner.execute(ctx, record, &local.tree()).await;

    if outcome.result == TaskResult::Success && runner.uploads_workspace() {
        if let Err(err) = upload_workspace(ctx, &local, job_id, build_number).await {
            return StepOutcome::failure(
                format!("failed to upload workspace: {err}"),
                outcome.console,
            );
        }
    }
    outcome
}

async fn upload_workspace(
    ctx: &WorkerContext,
    local: &LocalWorkspace,
    job_id: &JobId,
    build_number: u64,
) -> Result<()> {
    workspace::pack(&local.tree(), &local.archive()).await?;
    let archive = local.archive();
    ctx.retry_policy()
        .run(|| ctx.client.put_workspace(job_id, build_number, &archive))
        .await
}

async fn report(ctx: &WorkerContext, task: &ClaimedTask, result: TaskResult, error: Option<String>) {
    let completed = task.record.completed(result, error);
    if let Err(err) = ctx.update_task(task.id, &completed).await {
        warn!(task = %task.id, error = %err, "failed to report task completion");
    }
}
