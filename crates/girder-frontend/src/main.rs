//! Girder frontend server.

use clap::Parser;
use girder_client::FrontendClient;
use girder_config::{CoordinationSelection, FrontendConfig};
use girder_coord::{FsKv, FsLockFactory, KvStore, LockFactory, MemKv, NullLockFactory};
use girder_frontend::state::TaskIssuer;
use girder_frontend::{AppState, routes};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "girder-frontend", about = "Girder CI coordination service")]
struct Args {
    /// Path to the frontend configuration file (JSON).
    #[arg(long, env = "GIRDER_FRONTEND_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = FrontendConfig::load(&args.config)?;

    let storage = girder_storage::from_selection(&config.storage, &config.data_directory).await?;
    info!(data_directory = %config.data_directory.display(), "storage ready");

    let (tasks, locks): (Arc<dyn KvStore>, Arc<dyn LockFactory>) = match config.coordination {
        CoordinationSelection::Filesystem => {
            let kv = FsKv::open(config.data_directory.join("tasks"))?;
            let locks = FsLockFactory::open(config.data_directory.join("locks"))?;
            (Arc::new(kv), Arc::new(locks))
        }
        CoordinationSelection::Memory => (Arc::new(MemKv::new()), Arc::new(NullLockFactory)),
    };

    let issuer = if config.task_frontends.is_empty() {
        TaskIssuer::Local
    } else {
        TaskIssuer::Remote(FrontendClient::new(
            config.task_frontends.clone(),
            config.task_frontends.clone(),
        ))
    };

    let state = AppState::new(storage, tasks, locks, issuer);
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!(listen = %config.listen, "starting frontend");
    let listener = TcpListener::bind(config.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
