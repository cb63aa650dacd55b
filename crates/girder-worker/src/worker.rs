//! Worker identity and the task claiming protocol.

use girder_client::FrontendClient;
use girder_config::WorkerConfig;
use girder_core::{
    CapabilitySet, Error, Result, RetryPolicy, TaskId, TaskRecord, WorkerId,
};
use rand::seq::SliceRandom;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A task this worker has won exclusive ownership of.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: TaskId,
    pub record: TaskRecord,
}

/// Per-process worker state shared by every worker kind.
///
/// The identity is generated once at process start; it is what the task
/// store sees as `assignee` and what the ownership check compares
/// against.
pub struct WorkerContext {
    pub id: WorkerId,
    pub config: WorkerConfig,
    pub client: FrontendClient,
    capabilities: CapabilitySet,
}

impl WorkerContext {
    /// Build a context advertising `kind_capabilities` on top of
    /// whatever extra capabilities the configuration declares.
    pub fn new(config: WorkerConfig, kind_capabilities: CapabilitySet) -> Self {
        let mut capabilities = config.capabilities.clone();
        for capability in kind_capabilities.iter() {
            capabilities.insert(capability.clone());
        }
        let client = FrontendClient::from_worker_config(&config);
        Self {
            id: WorkerId::generate(),
            config,
            client,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Retry budget for frontend calls, from the worker configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.retry_count, Duration::from_secs(1))
    }

    /// Run the claiming protocol until a task is won or `timeout`
    /// elapses.
    ///
    /// Each pass fetches the id list once, shuffles it, and races an
    /// update on the first claimable candidate whose capability set
    /// this worker satisfies. A `Conflict` means another worker won
    /// that candidate; the scan moves on instead of retrying the same
    /// id. A stale or unavailable list just shortens the round.
    pub async fn fetch_task(&self, timeout: Option<Duration>) -> Result<Option<ClaimedTask>> {
        let started = Instant::now();
        loop {
            let mut candidates = match self.client.list_tasks().await {
                Ok(ids) => ids,
                Err(err) if err.is_transient() => {
                    debug!(error = %err, "task list unavailable this round");
                    Vec::new()
                }
                Err(err) => return Err(err),
            };
            candidates.shuffle(&mut rand::thread_rng());

            for id in candidates {
                let record = match self.client.get_task(id).await {
                    Ok(record) => record,
                    // Deleted or unreadable between list and get.
                    Err(_) => continue,
                };
                if !record.claimable() {
                    continue;
                }
                if !record.capabilities.is_satisfied_by(&self.capabilities) {
                    debug!(task = %id, "capabilities not satisfied, skipping");
                    continue;
                }
                let claim = record.claimed_by(self.id);
                match self.client.update_task(id, &claim).await {
                    Ok(record) => {
                        info!(task = %id, worker = %self.id, "task claimed");
                        return Ok(Some(ClaimedTask { id, record }));
                    }
                    Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => {
                        debug!(task = %id, "lost the claim race");
                        continue;
                    }
                    Err(err) if err.is_transient() => continue,
                    Err(err) => return Err(err),
                }
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Ok(None);
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Create and populate a task in two phases, both retried. The id
    /// is minted with an empty `creating` record so a partially created
    /// task is never claimable.
    pub async fn post_new_task(&self, record: &TaskRecord) -> Result<TaskId> {
        let policy = self.retry_policy();
        let id = policy.run(|| self.client.create_task()).await?;
        policy.run(|| self.client.update_task(id, record)).await?;
        Ok(id)
    }

    /// Update a task record with the configured retry budget. Conflicts
    /// pass through untouched; they carry meaning.
    pub async fn update_task(&self, id: TaskId, record: &TaskRecord) -> Result<TaskRecord> {
        self.retry_policy()
            .run(|| self.client.update_task(id, record))
            .await
    }
}
