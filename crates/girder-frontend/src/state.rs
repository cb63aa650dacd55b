//! Application state and storage layout.

use girder_client::FrontendClient;
use girder_coord::{KvStore, LockFactory};
use girder_core::JobId;
use girder_storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;

/// Where freshly triggered builds get their build-control task.
#[derive(Clone)]
pub enum TaskIssuer {
    /// This instance owns the task store; write directly.
    Local,
    /// Dedicated task frontends are configured; go through them.
    Remote(FrontendClient),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub tasks: Arc<dyn KvStore>,
    pub locks: Arc<dyn LockFactory>,
    pub issuer: TaskIssuer,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        tasks: Arc<dyn KvStore>,
        locks: Arc<dyn LockFactory>,
        issuer: TaskIssuer,
    ) -> Self {
        Self {
            storage,
            tasks,
            locks,
            issuer,
        }
    }

    // Storage layout. All build data hangs off the job directory so a
    // build delete is one tree removal.

    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        PathBuf::from("jobs").join(job_id.as_str())
    }

    pub fn job_config_file(&self, job_id: &JobId) -> PathBuf {
        self.job_dir(job_id).join("job.description")
    }

    pub fn build_dir(&self, job_id: &JobId, build_number: u64) -> PathBuf {
        self.job_dir(job_id).join(build_number.to_string())
    }

    pub fn build_state_file(&self, job_id: &JobId, build_number: u64) -> PathBuf {
        self.build_dir(job_id, build_number).join("build.state")
    }

    pub fn console_log_file(&self, job_id: &JobId, build_number: u64) -> PathBuf {
        self.build_dir(job_id, build_number).join("console.log")
    }

    pub fn workspace_file(&self, job_id: &JobId, build_number: u64) -> PathBuf {
        self.build_dir(job_id, build_number).join("workspace")
    }

    pub fn artifacts_dir(&self, job_id: &JobId, build_number: u64) -> PathBuf {
        self.build_dir(job_id, build_number).join("artifacts")
    }
}
