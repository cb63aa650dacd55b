//! The build-control worker: drives a whole build as a state machine.
//!
//! One session per claimed control task. Sessions progress
//! `Prepare -> Running -> Complete -> Reported` and advance at most one
//! meaningful step per tick. Build state is persisted after every
//! transition, and only after the side effect the transition represents
//! has already succeeded, so a crashed controller resumes from the
//! persisted state without re-running completed steps. A failed
//! external call leaves the session exactly where it was for the next
//! tick.

use async_trait::async_trait;
use girder_client::FrontendClient;
use girder_core::{
    BuildState, BuildStatus, Error, JobConfig, JobId, Result, RetryPolicy, SubtaskState, TaskId,
    TaskRecord, TaskResult, WorkerId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::worker::{ClaimedTask, WorkerContext};
use crate::workspace;

/// Everything the build-control state machine needs from the frontend.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn fetch_job_config(&self, job_id: &JobId) -> Result<JobConfig>;
    async fn load_build_state(&self, job_id: &JobId, build_number: u64) -> Result<BuildState>;
    async fn store_build_state(
        &self,
        job_id: &JobId,
        build_number: u64,
        state: &BuildState,
    ) -> Result<()>;
    /// Establish a clean workspace archive for a fresh build.
    async fn upload_empty_workspace(&self, job_id: &JobId, build_number: u64) -> Result<()>;
    /// Remove the build's workspace archive. Already-gone is success.
    async fn remove_workspace(&self, job_id: &JobId, build_number: u64) -> Result<()>;
    async fn create_task(&self) -> Result<TaskId>;
    async fn populate_task(&self, id: TaskId, record: &TaskRecord) -> Result<()>;
    async fn read_task(&self, id: TaskId) -> Result<TaskRecord>;
    /// Delete a task. Already-gone is success.
    async fn remove_task(&self, id: TaskId) -> Result<()>;
}

#[async_trait]
impl ControlPlane for FrontendClient {
    async fn fetch_job_config(&self, job_id: &JobId) -> Result<JobConfig> {
        self.get_job_config(job_id).await
    }

    async fn load_build_state(&self, job_id: &JobId, build_number: u64) -> Result<BuildState> {
        self.get_build_state(job_id, build_number).await
    }

    async fn store_build_state(
        &self,
        job_id: &JobId,
        build_number: u64,
        state: &BuildState,
    ) -> Result<()> {
        self.put_build_state(job_id, build_number, state).await
    }

    async fn upload_empty_workspace(&self, job_id: &JobId, build_number: u64) -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let tree = scratch.path().join("empty");
        std::fs::create_dir(&tree)?;
        let archive = scratch.path().join("workspace.tar.gz");
        workspace::pack(&tree, &archive).await?;
        self.put_workspace(job_id, build_number, &archive).await
    }

    async fn remove_workspace(&self, job_id: &JobId, build_number: u64) -> Result<()> {
        self.delete_workspace(job_id, build_number).await
    }

    async fn create_task(&self) -> Result<TaskId> {
        FrontendClient::create_task(self).await
    }

    async fn populate_task(&self, id: TaskId, record: &TaskRecord) -> Result<()> {
        self.update_task(id, record).await.map(|_| ())
    }

    async fn read_task(&self, id: TaskId) -> Result<TaskRecord> {
        self.get_task(id).await
    }

    async fn remove_task(&self, id: TaskId) -> Result<()> {
        self.delete_task(id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prepare,
    Running,
    Complete,
    Reported,
}

struct ControlSession {
    task_id: TaskId,
    job_id: JobId,
    build_number: u64,
    state: BuildState,
    phase: Phase,
}

/// The session table plus the identity and budgets shared by every
/// session.
pub struct BuildControl {
    worker_id: WorkerId,
    plane: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
    sessions: HashMap<TaskId, ControlSession>,
}

impl BuildControl {
    pub fn new(worker_id: WorkerId, plane: Arc<dyn ControlPlane>, retry: RetryPolicy) -> Self {
        Self {
            worker_id,
            plane,
            retry,
            sessions: HashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Take over a claimed control task. If a previous controller
    /// already persisted build state, resume from it; otherwise start a
    /// fresh `prepare`.
    pub async fn adopt(&mut self, task: &ClaimedTask) -> Result<()> {
        let job_id = task
            .record
            .job_id
            .clone()
            .ok_or_else(|| Error::InvalidInput("control task carries no job id".into()))?;
        let build_number = task
            .record
            .build_number
            .ok_or_else(|| Error::InvalidInput("control task carries no build number".into()))?;

        let (state, phase) = match self
            .retry
            .run(|| self.plane.load_build_state(&job_id, build_number))
            .await
        {
            Ok(state) => {
                let phase = match state.status {
                    BuildStatus::Preparing => Phase::Prepare,
                    BuildStatus::Running => Phase::Running,
                    BuildStatus::Complete => Phase::Complete,
                };
                (state, phase)
            }
            Err(Error::NotFound(_)) => (BuildState::preparing(), Phase::Prepare),
            Err(err) => return Err(err),
        };

        info!(
            task = %task.id, job = %job_id, build = build_number, resumed = phase != Phase::Prepare,
            "build session adopted"
        );
        self.sessions.insert(
            task.id,
            ControlSession {
                task_id: task.id,
                job_id,
                build_number,
                state,
                phase,
            },
        );
        Ok(())
    }

    /// Advance every session once and discard the reported ones.
    pub async fn tick(&mut self) {
        let ids: Vec<TaskId> = self.sessions.keys().copied().collect();
        for id in ids {
            let Some(mut session) = self.sessions.remove(&id) else {
                continue;
            };
            if let Err(err) = self.advance(&mut session).await {
                warn!(
                    task = %id, job = %session.job_id, build = session.build_number, error = %err,
                    "session made no progress this tick"
                );
            }
            if session.phase == Phase::Reported {
                info!(job = %session.job_id, build = session.build_number, "build reported");
            } else {
                self.sessions.insert(id, session);
            }
        }
    }

    async fn advance(&self, session: &mut ControlSession) -> Result<()> {
        match session.phase {
            Phase::Prepare => self.prepare(session).await,
            Phase::Running => self.run_pipeline(session).await,
            Phase::Complete => self.report(session).await,
            Phase::Reported => Ok(()),
        }
    }

    async fn prepare(&self, session: &mut ControlSession) -> Result<()> {
        let config = self
            .retry
            .run(|| self.plane.fetch_job_config(&session.job_id))
            .await?;
        session.state.config = Some(config);
        session.state.status = BuildStatus::Running;
        session.state.controller = Some(self.worker_id);
        self.persist(session).await?;
        self.retry
            .run(|| {
                self.plane
                    .upload_empty_workspace(&session.job_id, session.build_number)
            })
            .await?;
        session.phase = Phase::Running;
        Ok(())
    }

    async fn run_pipeline(&self, session: &mut ControlSession) -> Result<()> {
        let Some(config) = session.state.config.clone() else {
            // Running state without a config snapshot means prepare
            // never finished; redo it.
            session.phase = Phase::Prepare;
            return Ok(());
        };

        for (index, step) in config.tasks.iter().enumerate() {
            let existing = session.state.tasks.get(&index).cloned();
            let subtask = match existing {
                None => match step.required_capabilities() {
                    Some(capabilities) => {
                        let record = TaskRecord::pending(
                            capabilities,
                            step.params.clone(),
                            Some(session.job_id.clone()),
                            Some(session.build_number),
                        );
                        let id = self.spawn_subtask(&record).await?;
                        debug!(
                            job = %session.job_id, build = session.build_number, step = index,
                            task = %id, "subtask dispatched"
                        );
                        session.state.tasks.insert(index, SubtaskState::dispatched(id));
                        self.persist(session).await?;
                        return Ok(());
                    }
                    None => {
                        let subtask = SubtaskState::undispatchable(format!(
                            "unknown step type: {}",
                            step.step_type.as_str()
                        ));
                        warn!(
                            job = %session.job_id, build = session.build_number, step = index,
                            "step cannot be dispatched"
                        );
                        session.state.tasks.insert(index, subtask.clone());
                        self.persist(session).await?;
                        subtask
                    }
                },
                Some(mut subtask) if !subtask.is_complete() => {
                    let id = subtask
                        .task_id
                        .ok_or_else(|| Error::InvalidInput("dispatched subtask lost its id".into()))?;
                    let record = self.retry.run(|| self.plane.read_task(id)).await?;
                    let before = subtask.clone();
                    subtask.absorb(&record);
                    if subtask != before {
                        session.state.tasks.insert(index, subtask.clone());
                        self.persist(session).await?;
                    }
                    if !subtask.is_complete() {
                        // Strictly ordered: never look past an
                        // outstanding step.
                        return Ok(());
                    }
                    subtask
                }
                Some(subtask) => subtask,
            };

            if subtask.succeeded() {
                session.state.merge_artifacts(&subtask);
                continue;
            }
            session.state.finish(TaskResult::Failure);
            self.persist(session).await?;
            session.phase = Phase::Complete;
            info!(
                job = %session.job_id, build = session.build_number, step = index,
                "build failed, later steps abandoned"
            );
            return Ok(());
        }

        session.state.finish(TaskResult::Success);
        self.persist(session).await?;
        session.phase = Phase::Complete;
        Ok(())
    }

    /// Cleanup after the terminal state is decided: drop the workspace,
    /// persist the final state, delete every subtask, then the control
    /// task itself. Any failure leaves the session in `Complete` to
    /// retry the remainder later.
    async fn report(&self, session: &mut ControlSession) -> Result<()> {
        self.retry
            .run(|| {
                self.plane
                    .remove_workspace(&session.job_id, session.build_number)
            })
            .await?;
        self.persist(session).await?;
        for subtask in session.state.tasks.values() {
            if let Some(id) = subtask.task_id {
                self.retry.run(|| self.plane.remove_task(id)).await?;
            }
        }
        self.retry
            .run(|| self.plane.remove_task(session.task_id))
            .await?;
        session.phase = Phase::Reported;
        Ok(())
    }

    async fn persist(&self, session: &ControlSession) -> Result<()> {
        self.retry
            .run(|| {
                self.plane
                    .store_build_state(&session.job_id, session.build_number, &session.state)
            })
            .await
    }

    async fn spawn_subtask(&self, record: &TaskRecord) -> Result<TaskId> {
        let id = self.retry.run(|| self.plane.create_task()).await?;
        self.retry
            .run(|| self.plane.populate_task(id, record))
            .await?;
        Ok(id)
    }

    /// Main loop for the build-control worker binary: claim control
    /// tasks as they appear and advance every live session each pass.
    pub async fn run(mut self, ctx: &WorkerContext) -> Result<()> {
        loop {
            match ctx.fetch_task(Some(std::time::Duration::from_secs(1))).await {
                Ok(Some(task)) => {
                    if let Err(err) = self.adopt(&task).await {
                        warn!(task = %task.id, error = %err, "rejecting malformed control task");
                        let failed = task
                            .record
                            .completed(TaskResult::Failure, Some(err.to_string()));
                        if let Err(err) = ctx.update_task(task.id, &failed).await {
                            warn!(task = %task.id, error = %err, "could not report rejection");
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "task polling failed"),
            }
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use girder_core::{Capability, TaskStatus};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;

    #[derive(Default)]
    struct MockPlane {
        config: Mutex<Option<JobConfig>>,
        states: Mutex<HashMap<(JobId, u64), BuildState>>,
        tasks: Mutex<HashMap<TaskId, TaskRecord>>,
        workspaces: Mutex<HashSet<(JobId, u64)>>,
        spawned: Mutex<Vec<TaskId>>,
    }

    impl MockPlane {
        fn with_config(config: JobConfig) -> Arc<Self> {
            let plane = Self::default();
            *plane.config.lock() = Some(config);
            Arc::new(plane)
        }

        fn job() -> JobId {
            "widget-nightly".parse().unwrap()
        }

        fn spawned_records(&self) -> Vec<TaskRecord> {
            let tasks = self.tasks.lock();
            self.spawned
                .lock()
                .iter()
                .filter_map(|id| tasks.get(id).cloned())
                .collect()
        }

        fn finish_subtask(&self, id: TaskId, result: TaskResult, artifacts: serde_json::Value) {
            let mut tasks = self.tasks.lock();
            let record = tasks.get_mut(&id).unwrap();
            record.status = TaskStatus::Complete;
            record.result = Some(result);
            record.assignee = None;
            if !artifacts.is_null() {
                record.params = json!({"artifacts": artifacts});
            }
        }

        fn persisted_state(&self) -> BuildState {
            self.states.lock().get(&(Self::job(), 1)).unwrap().clone()
        }
    }

    #[async_trait]
    impl ControlPlane for MockPlane {
        async fn fetch_job_config(&self, _job_id: &JobId) -> Result<JobConfig> {
            self.config
                .lock()
                .clone()
                .ok_or_else(|| Error::NotFound("no such job".into()))
        }

        async fn load_build_state(&self, job_id: &JobId, build_number: u64) -> Result<BuildState> {
            self.states
                .lock()
                .get(&(job_id.clone(), build_number))
                .cloned()
                .ok_or_else(|| Error::NotFound("no build state".into()))
        }

        async fn store_build_state(
            &self,
            job_id: &JobId,
            build_number: u64,
            state: &BuildState,
        ) -> Result<()> {
            self.states
                .lock()
                .insert((job_id.clone(), build_number), state.clone());
            Ok(())
        }

        async fn upload_empty_workspace(&self, job_id: &JobId, build_number: u64) -> Result<()> {
            self.workspaces.lock().insert((job_id.clone(), build_number));
            Ok(())
        }

        async fn remove_workspace(&self, job_id: &JobId, build_number: u64) -> Result<()> {
            self.workspaces.lock().remove(&(job_id.clone(), build_number));
            Ok(())
        }

        async fn create_task(&self) -> Result<TaskId> {
            let id = TaskId::new();
            self.tasks.lock().insert(id, TaskRecord::creating());
            Ok(id)
        }

        async fn populate_task(&self, id: TaskId, record: &TaskRecord) -> Result<()> {
            self.tasks.lock().insert(id, record.clone());
            self.spawned.lock().push(id);
            Ok(())
        }

        async fn read_task(&self, id: TaskId) -> Result<TaskRecord> {
            self.tasks
                .lock()
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::NotFound("no such task".into()))
        }

        async fn remove_task(&self, id: TaskId) -> Result<()> {
            self.tasks.lock().remove(&id);
            Ok(())
        }
    }

    fn three_step_config() -> JobConfig {
        serde_json::from_value(json!({
            "tasks": [
                {"type": "git-checkout", "params": {"repository": "git://example/widget.git"}},
                {"type": "execute-shell", "params": {"script": "make all"}},
                {"type": "publish-artifacts", "params": {"artifacts": ["out/widget"]}}
            ]
        }))
        .unwrap()
    }

    fn controller(plane: Arc<MockPlane>) -> BuildControl {
        BuildControl::new(
            WorkerId::generate(),
            plane,
            RetryPolicy::new(2, Duration::from_millis(1)),
        )
    }

    async fn adopt_build(control: &mut BuildControl, plane: &MockPlane) -> ClaimedTask {
        let record = TaskRecord::pending(
            [Capability::BUILD_CONTROL_V1].into_iter().collect(),
            serde_json::Value::Null,
            Some(MockPlane::job()),
            Some(1),
        );
        let id = TaskId::new();
        plane.tasks.lock().insert(id, record.clone());
        let task = ClaimedTask { id, record };
        control.adopt(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn pipeline_runs_strictly_in_order() {
        let plane = MockPlane::with_config(three_step_config());
        let mut control = controller(plane.clone());
        adopt_build(&mut control, &plane).await;

        // Prepare: state goes running, clean workspace uploaded.
        control.tick().await;
        assert_eq!(plane.persisted_state().status, BuildStatus::Running);
        assert!(plane.workspaces.lock().contains(&(MockPlane::job(), 1)));

        // First tick of running dispatches only step 0.
        control.tick().await;
        let spawned = plane.spawned_records();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].capabilities.contains(&Capability::new(Capability::GIT_CHECKOUT_V1)));

        // Step 0 still outstanding: nothing new is dispatched.
        control.tick().await;
        assert_eq!(plane.spawned.lock().len(), 1);

        let first = plane.spawned.lock()[0];
        plane.finish_subtask(first, TaskResult::Success, serde_json::Value::Null);
        control.tick().await;
        assert_eq!(plane.spawned.lock().len(), 2);
        let second = plane.spawned.lock()[1];
        plane.finish_subtask(second, TaskResult::Success, serde_json::Value::Null);
        control.tick().await;
        assert_eq!(plane.spawned.lock().len(), 3);

        let third = plane.spawned.lock()[2];
        plane.finish_subtask(third, TaskResult::Success, json!({"a1": ["out", "widget"]}));
        control.tick().await;

        let state = plane.persisted_state();
        assert_eq!(state.status, BuildStatus::Complete);
        assert_eq!(state.result, Some(TaskResult::Success));
        assert_eq!(state.artifacts.get("a1").unwrap(), &vec!["out".to_owned(), "widget".to_owned()]);

        // Cleanup: workspace gone, all subtasks and the control task
        // deleted, session discarded.
        control.tick().await;
        assert_eq!(control.session_count(), 0);
        assert!(plane.workspaces.lock().is_empty());
        assert!(plane.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn failing_step_abandons_later_steps() {
        let plane = MockPlane::with_config(three_step_config());
        let mut control = controller(plane.clone());
        adopt_build(&mut control, &plane).await;

        control.tick().await; // prepare
        control.tick().await; // dispatch step 0
        let first = plane.spawned.lock()[0];
        plane.finish_subtask(first, TaskResult::Success, serde_json::Value::Null);
        control.tick().await; // dispatch step 1
        let second = plane.spawned.lock()[1];
        plane.finish_subtask(second, TaskResult::Failure, serde_json::Value::Null);
        control.tick().await;

        let state = plane.persisted_state();
        assert_eq!(state.status, BuildStatus::Complete);
        assert_eq!(state.result, Some(TaskResult::Failure));
        // Step 2 was never spawned.
        assert_eq!(plane.spawned.lock().len(), 2);
        assert!(state.tasks.get(&2).is_none());

        control.tick().await;
        assert_eq!(control.session_count(), 0);
    }

    #[tokio::test]
    async fn unknown_step_type_fails_without_dispatch() {
        let config = serde_json::from_value(json!({
            "tasks": [{"type": "frobnicate", "params": {}}]
        }))
        .unwrap();
        let plane = MockPlane::with_config(config);
        let mut control = controller(plane.clone());
        adopt_build(&mut control, &plane).await;

        control.tick().await; // prepare
        control.tick().await; // record undispatchable step, fail fast

        let state = plane.persisted_state();
        assert_eq!(state.result, Some(TaskResult::Failure));
        assert!(plane.spawned.lock().is_empty());
        let subtask = state.tasks.get(&0).unwrap();
        assert!(subtask.task_id.is_none());
        assert_eq!(subtask.result, Some(TaskResult::Failure));
    }

    #[tokio::test]
    async fn restart_resumes_from_persisted_state() {
        let plane = MockPlane::with_config(three_step_config());
        let mut control = controller(plane.clone());
        let task = adopt_build(&mut control, &plane).await;

        control.tick().await; // prepare
        control.tick().await; // dispatch step 0
        let first = plane.spawned.lock()[0];
        plane.finish_subtask(first, TaskResult::Success, serde_json::Value::Null);
        control.tick().await; // absorb, dispatch step 1
        assert_eq!(plane.spawned.lock().len(), 2);

        // Controller crashes; a new one claims the same control task.
        drop(control);
        let mut control = controller(plane.clone());
        control.adopt(&task).await.unwrap();

        // Step 0 is not re-run, progress continues from step 1.
        let second = plane.spawned.lock()[1];
        plane.finish_subtask(second, TaskResult::Success, serde_json::Value::Null);
        control.tick().await;
        assert_eq!(plane.spawned.lock().len(), 3);
        let state = plane.persisted_state();
        assert!(state.tasks.get(&0).unwrap().succeeded());
    }

    #[tokio::test]
    async fn malformed_control_task_is_rejected() {
        let plane = MockPlane::with_config(three_step_config());
        let mut control = controller(plane.clone());
        let record = TaskRecord::pending(
            [Capability::BUILD_CONTROL_V1].into_iter().collect(),
            serde_json::Value::Null,
            None,
            None,
        );
        let task = ClaimedTask { id: TaskId::new(), record };
        let err = control.adopt(&task).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(control.session_count(), 0);
    }
}
