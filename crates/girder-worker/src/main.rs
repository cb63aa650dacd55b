//! Girder worker processes.
//!
//! One binary, one subcommand per worker kind. Each reads the shared
//! JSON worker configuration and runs its polling loop until killed.

use clap::{Parser, Subcommand};
use girder_config::WorkerConfig;
use girder_core::Capability;
use girder_worker::control::{BuildControl, ControlPlane};
use girder_worker::leaf::LeafWorker;
use girder_worker::steps::{CopyArtifacts, ExecuteShell, GitCheckout, PublishArtifacts};
use girder_worker::worker::WorkerContext;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "girder-worker", about = "Girder CI worker")]
struct Args {
    /// Path to the worker configuration file (JSON).
    #[arg(long, env = "GIRDER_WORKER_CONFIG")]
    config: PathBuf,
    #[command(subcommand)]
    kind: WorkerKind,
}

#[derive(Debug, Subcommand)]
enum WorkerKind {
    /// Drive whole builds as ordered pipelines of subtasks.
    BuildControl,
    /// Run shell scripts inside build workspaces.
    ExecuteShell,
    /// Clone git repositories into build workspaces.
    GitCheckout,
    /// Upload workspace files as build artifacts.
    PublishArtifacts,
    /// Copy artifacts from other jobs' builds for chaining.
    CopyArtifacts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = WorkerConfig::load(&args.config)?;

    match args.kind {
        WorkerKind::BuildControl => {
            let ctx = WorkerContext::new(
                config,
                [Capability::BUILD_CONTROL_V1].into_iter().collect(),
            );
            info!(worker = %ctx.id, "starting build-control worker");
            let plane: Arc<dyn ControlPlane> = Arc::new(ctx.client.clone());
            let control = BuildControl::new(ctx.id, plane, ctx.retry_policy());
            control.run(&ctx).await?;
        }
        WorkerKind::ExecuteShell => run_leaf(config, ExecuteShell).await?,
        WorkerKind::GitCheckout => run_leaf(config, GitCheckout).await?,
        WorkerKind::PublishArtifacts => run_leaf(config, PublishArtifacts).await?,
        WorkerKind::CopyArtifacts => run_leaf(config, CopyArtifacts).await?,
    }
    Ok(())
}

async fn run_leaf<R: girder_worker::leaf::StepRunner>(
    config: WorkerConfig,
    runner: R,
) -> anyhow::Result<()> {
    let worker = LeafWorker::new(config, runner);
    info!(worker = %worker.context().id, "starting leaf worker");
    worker.run().await?;
    Ok(())
}
