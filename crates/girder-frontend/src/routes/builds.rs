//! Build endpoints: trigger, state, console log, workspace, artifacts.
//!
//! Build numbers are allocated under the job's exclusive lock so that
//! concurrent triggers for the same job can never share a number. The
//! lock covers only the list-allocate-mkdir window; everything a build
//! accumulates afterwards lives under its own numbered directory.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use girder_core::{BuildState, Capability, JobId, TaskId, TaskRecord};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use crate::state::TaskIssuer;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{job_id}/builds", get(list_builds).post(trigger_build))
        .route(
            "/{job_id}/builds/{build_number}/state",
            get(get_state).put(put_state),
        )
        .route(
            "/{job_id}/builds/{build_number}/console",
            get(get_console).post(append_console),
        )
        .route(
            "/{job_id}/builds/{build_number}/workspace",
            get(get_workspace).put(put_workspace).delete(delete_workspace),
        )
        .route(
            "/{job_id}/builds/{build_number}/artifacts",
            post(create_artifact),
        )
        .route(
            "/{job_id}/builds/{build_number}/artifacts/{artifact_id}",
            get(get_artifact).put(put_artifact).delete(delete_artifact),
        )
}

#[derive(Debug, Serialize)]
struct BuildListResponse {
    builds: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_build_number: Option<u64>,
}

#[derive(Debug, Serialize)]
struct BuildEnvelope {
    job_id: JobId,
    build_number: u64,
    state: BuildState,
}

async fn build_numbers(state: &AppState, job_id: &JobId) -> Result<Vec<u64>, ApiError> {
    let entries = state.storage.list_dir(&state.job_dir(job_id)).await?;
    let mut numbers: Vec<u64> = entries.iter().filter_map(|name| name.parse().ok()).collect();
    numbers.sort_unstable();
    Ok(numbers)
}

async fn list_builds(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<BuildListResponse>, ApiError> {
    let builds = build_numbers(&state, &job_id).await?;
    let last_build_number = builds.last().copied();
    Ok(Json(BuildListResponse {
        builds,
        last_build_number,
    }))
}

async fn trigger_build(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<(StatusCode, Json<BuildEnvelope>), ApiError> {
    // Existence check before taking the lock; a trigger for an unknown
    // job should not contend with real ones.
    if !state.storage.exists(&state.job_config_file(&job_id)).await? {
        return Err(ApiError::NotFound(format!("no such job: {job_id}")));
    }

    let lock = state.locks.lock(job_id.as_str()).await?;
    if !lock.try_lock().await? {
        return Err(ApiError::Conflict(format!(
            "another build of {job_id} is being triggered"
        )));
    }
    let allocated = allocate_build(&state, &job_id).await;
    lock.unlock().await;
    let build_number = allocated?;

    let build_state = BuildState::preparing();
    let serialized =
        serde_json::to_vec(&build_state).map_err(|err| ApiError::Internal(err.to_string()))?;
    state
        .storage
        .write(&state.build_state_file(&job_id, build_number), serialized.into())
        .await?;
    state
        .storage
        .write(&state.console_log_file(&job_id, build_number), Bytes::new())
        .await?;

    let control_task = issue_control_task(&state, &job_id, build_number).await?;
    info!(job = %job_id, build = build_number, task = %control_task, "build triggered");

    Ok((
        StatusCode::CREATED,
        Json(BuildEnvelope {
            job_id,
            build_number,
            state: build_state,
        }),
    ))
}

/// Pick `max + 1` and create the build directory. Caller holds the job
/// lock for the whole call.
async fn allocate_build(state: &AppState, job_id: &JobId) -> Result<u64, ApiError> {
    let number = build_numbers(state, job_id)
        .await?
        .last()
        .copied()
        .unwrap_or(0)
        + 1;
    state
        .storage
        .make_dirs(&state.build_dir(job_id, number))
        .await?;
    Ok(number)
}

/// Create and populate the build-control task for a fresh build.
///
/// Two phases, like every task: mint the id with a `creating` record,
/// then publish the payload. With dedicated task frontends configured
/// the client's retry budget applies; against the local store a failure
/// surfaces directly.
async fn issue_control_task(
    state: &AppState,
    job_id: &JobId,
    build_number: u64,
) -> Result<TaskId, ApiError> {
    let record = TaskRecord::pending(
        [Capability::BUILD_CONTROL_V1].into_iter().collect(),
        Value::Null,
        Some(job_id.clone()),
        Some(build_number),
    );
    match &state.issuer {
        TaskIssuer::Local => {
            let id = TaskId::new();
            let creating = serde_json::to_vec(&TaskRecord::creating())
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            state
                .tasks
                .set(&id.to_string(), Bytes::from(creating.clone()), None)
                .await?;
            let populated =
                serde_json::to_vec(&record).map_err(|err| ApiError::Internal(err.to_string()))?;
            state
                .tasks
                .set(&id.to_string(), populated.into(), Some(creating.into()))
                .await?;
            Ok(id)
        }
        TaskIssuer::Remote(client) => {
            let policy = girder_core::RetryPolicy::default();
            let id = policy.run(|| client.create_task()).await.map_err(|err| {
                warn!(job = %job_id, build = build_number, error = %err, "control task creation failed");
                ApiError::from(err)
            })?;
            policy
                .run(|| client.update_task(id, &record))
                .await
                .map_err(|err| {
                    warn!(job = %job_id, build = build_number, error = %err, "control task population failed");
                    ApiError::from(err)
                })?;
            Ok(id)
        }
    }
}

async fn get_state(
    State(state): State<AppState>,
    Path((job_id, build_number)): Path<(JobId, u64)>,
) -> Result<Json<BuildEnvelope>, ApiError> {
    let stored = state
        .storage
        .read(&state.build_state_file(&job_id, build_number))
        .await?;
    let build_state: BuildState = serde_json::from_slice(&stored)
        .map_err(|err| ApiError::Internal(format!("stored build state unreadable: {err}")))?;
    Ok(Json(BuildEnvelope {
        job_id,
        build_number,
        state: build_state,
    }))
}

async fn put_state(
    State(state): State<AppState>,
    Path((job_id, build_number)): Path<(JobId, u64)>,
    Json(build_state): Json<BuildState>,
) -> Result<Json<BuildEnvelope>, ApiError> {
    if !state
        .storage
        .is_dir(&state.build_dir(&job_id, build_number))
        .await?
    {
        return Err(ApiError::NotFound(format!(
            "no build {build_number} for job {job_id}"
        )));
    }
    let serialized =
        serde_json::to_vec(&build_state).map_err(|err| ApiError::Internal(err.to_string()))?;
    state
        .storage
        .write(&state.build_state_file(&job_id, build_number), serialized.into())
        .await?;
    Ok(Json(BuildEnvelope {
        job_id,
        build_number,
        state: build_state,
    }))
}

async fn get_console(
    State(state): State<AppState>,
    Path((job_id, build_number)): Path<(JobId, u64)>,
) -> Result<impl IntoResponse, ApiError> {
    let log = state
        .storage
        .read(&state.console_log_file(&job_id, build_number))
        .await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], log))
}

async fn append_console(
    State(state): State<AppState>,
    Path((job_id, build_number)): Path<(JobId, u64)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state
        .storage
        .append(&state.console_log_file(&job_id, build_number), body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_workspace(
    State(state): State<AppState>,
    Path((job_id, build_number)): Path<(JobId, u64)>,
) -> Result<impl IntoResponse, ApiError> {
    let archive = state
        .storage
        .read(&state.workspace_file(&job_id, build_number))
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        archive,
    ))
}

async fn put_workspace(
    State(state): State<AppState>,
    Path((job_id, build_number)): Path<(JobId, u64)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if !state
        .storage
        .is_dir(&state.build_dir(&job_id, build_number))
        .await?
    {
        return Err(ApiError::NotFound(format!(
            "no build {build_number} for job {job_id}"
        )));
    }
    state
        .storage
        .write(&state.workspace_file(&job_id, build_number), body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_workspace(
    State(state): State<AppState>,
    Path((job_id, build_number)): Path<(JobId, u64)>,
) -> Result<StatusCode, ApiError> {
    match state
        .storage
        .unlink(&state.workspace_file(&job_id, build_number))
        .await
    {
        Ok(()) | Err(girder_core::Error::NotFound(_)) => Ok(StatusCode::NO_CONTENT),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Serialize)]
struct ArtifactCreated {
    artifact_id: String,
}

fn artifact_file(
    state: &AppState,
    job_id: &JobId,
    build_number: u64,
    artifact_id: &str,
) -> Result<std::path::PathBuf, ApiError> {
    // Artifact ids are frontend-minted UUIDs; anything else is a
    // malformed or hostile path component.
    if Uuid::parse_str(artifact_id).is_err() {
        return Err(ApiError::BadRequest(format!(
            "invalid artifact id: {artifact_id:?}"
        )));
    }
    Ok(state.artifacts_dir(job_id, build_number).join(artifact_id))
}

async fn create_artifact(
    State(state): State<AppState>,
    Path((job_id, build_number)): Path<(JobId, u64)>,
    body: Bytes,
) -> Result<(StatusCode, Json<ArtifactCreated>), ApiError> {
    if !state
        .storage
        .is_dir(&state.build_dir(&job_id, build_number))
        .await?
    {
        return Err(ApiError::NotFound(format!(
            "no build {build_number} for job {job_id}"
        )));
    }
    let artifact_id = Uuid::new_v4().to_string();
    let dir = state.artifacts_dir(&job_id, build_number);
    state.storage.make_dirs(&dir).await?;
    state.storage.write(&dir.join(&artifact_id), body).await?;
    Ok((StatusCode::CREATED, Json(ArtifactCreated { artifact_id })))
}

async fn get_artifact(
    State(state): State<AppState>,
    Path((job_id, build_number, artifact_id)): Path<(JobId, u64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let path = artifact_file(&state, &job_id, build_number, &artifact_id)?;
    let data = state.storage.read(&path).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

async fn put_artifact(
    State(state): State<AppState>,
    Path((job_id, build_number, artifact_id)): Path<(JobId, u64, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let path = artifact_file(&state, &job_id, build_number, &artifact_id)?;
    if !state.storage.exists(&path).await? {
        return Err(ApiError::NotFound(format!(
            "no artifact {artifact_id} in build {build_number} of {job_id}"
        )));
    }
    state.storage.write(&path, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_artifact(
    State(state): State<AppState>,
    Path((job_id, build_number, artifact_id)): Path<(JobId, u64, String)>,
) -> Result<StatusCode, ApiError> {
    let path = artifact_file(&state, &job_id, build_number, &artifact_id)?;
    match state.storage.unlink(&path).await {
        Ok(()) | Err(girder_core::Error::NotFound(_)) => Ok(StatusCode::NO_CONTENT),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use girder_coord::{FsLockFactory, MemKv};
    use girder_storage::LocalFs;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let locks = FsLockFactory::open(dir.join("locks")).unwrap();
        let state = AppState::new(
            Arc::new(LocalFs::new(dir.join("data"))),
            Arc::new(MemKv::new()),
            Arc::new(locks),
            TaskIssuer::Local,
        );
        crate::routes::router(state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create_job(app: &Router, job: &str) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/jobs/{job}"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "tasks": [{"type": "execute-shell", "params": {"script": "true"}}]
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn trigger(app: &Router, job: &str) -> axum::response::Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/jobs/{job}/builds"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn trigger_allocates_sequential_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        create_job(&app, "seq").await;

        for expected in 1..=3u64 {
            let response = trigger(&app, "seq").await;
            assert_eq!(response.status(), StatusCode::CREATED);
            let body = body_json(response).await;
            assert_eq!(body["build_number"], expected);
            assert_eq!(body["state"]["status"], "preparing");
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/jobs/seq/builds")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["builds"], serde_json::json!([1, 2, 3]));
        assert_eq!(body["last_build_number"], 3);
    }

    #[tokio::test]
    async fn trigger_for_unknown_job_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let response = trigger(&app, "ghost").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trigger_publishes_a_build_control_task() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        create_job(&app, "controlled").await;
        trigger(&app, "controlled").await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/tasks")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        let ids = body["tasks"].as_array().unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_triggers_never_share_a_build_number() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        create_job(&app, "contended").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let app = app.clone();
            handles.push(tokio::spawn(async move {
                let response = trigger(&app, "contended").await;
                match response.status() {
                    StatusCode::CREATED => {
                        Some(body_json(response).await["build_number"].as_u64().unwrap())
                    }
                    StatusCode::CONFLICT => None,
                    other => panic!("unexpected status {other}"),
                }
            }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            if let Some(number) = handle.await.unwrap() {
                numbers.push(number);
            }
        }
        assert!(!numbers.is_empty());
        let unique: std::collections::BTreeSet<_> = numbers.iter().copied().collect();
        assert_eq!(unique.len(), numbers.len());
    }

    #[tokio::test]
    async fn state_round_trips_and_console_appends() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        create_job(&app, "logs").await;
        trigger(&app, "logs").await;

        let mut build_state = BuildState::preparing();
        build_state.status = girder_core::BuildStatus::Running;
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/jobs/logs/builds/1/state")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&build_state).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        for chunk in ["hello ", "world\n"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/jobs/logs/builds/1/console")
                        .body(Body::from(chunk))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/jobs/logs/builds/1/console")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello world\n");
    }

    #[tokio::test]
    async fn workspace_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        create_job(&app, "ws").await;
        trigger(&app, "ws").await;

        let archive = vec![0x1f, 0x8b, 0x08, 0x00];
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/jobs/ws/builds/1/workspace")
                    .header("content-type", "application/octet-stream")
                    .body(Body::from(archive.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/jobs/ws/builds/1/workspace")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], &archive[..]);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/jobs/ws/builds/1/workspace")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn artifact_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        create_job(&app, "arts").await;
        trigger(&app, "arts").await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs/arts/builds/1/artifacts")
                    .body(Body::from("binary payload"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let artifact_id = body_json(response).await["artifact_id"]
            .as_str()
            .unwrap()
            .to_owned();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/arts/builds/1/artifacts/{artifact_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"binary payload");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/jobs/arts/builds/1/artifacts/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/jobs/arts/builds/1/artifacts/{artifact_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
