//! Job configuration endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use girder_core::{JobConfig, JobId};
use serde::Serialize;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/{job_id}", get(get_job).put(put_job).delete(delete_job))
}

#[derive(Debug, Serialize)]
struct JobListResponse {
    jobs: Vec<JobId>,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    job_id: JobId,
    config: JobConfig,
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<JobListResponse>, ApiError> {
    let root = std::path::PathBuf::from("jobs");
    if !state.storage.exists(&root).await? {
        return Ok(Json(JobListResponse { jobs: Vec::new() }));
    }
    let entries = state.storage.list_dir(&root).await?;
    let jobs = entries.iter().filter_map(|name| name.parse().ok()).collect();
    Ok(Json(JobListResponse { jobs }))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobResponse>, ApiError> {
    let stored = state.storage.read(&state.job_config_file(&job_id)).await?;
    let config: JobConfig = serde_json::from_slice(&stored)
        .map_err(|err| ApiError::Internal(format!("stored job config unreadable: {err}")))?;
    Ok(Json(JobResponse { job_id, config }))
}

async fn put_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(config): Json<JobConfig>,
) -> Result<Json<JobResponse>, ApiError> {
    let serialized =
        serde_json::to_vec(&config).map_err(|err| ApiError::Internal(err.to_string()))?;
    state.storage.make_dirs(&state.job_dir(&job_id)).await?;
    state
        .storage
        .write(&state.job_config_file(&job_id), serialized.into())
        .await?;
    info!(job = %job_id, "job configuration stored");
    Ok(Json(JobResponse { job_id, config }))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<StatusCode, ApiError> {
    state.storage.rm_tree(&state.job_dir(&job_id)).await?;
    info!(job = %job_id, "job deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskIssuer;
    use axum::body::Body;
    use axum::http::Request;
    use girder_coord::{MemKv, NullLockFactory};
    use girder_storage::LocalFs;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let state = AppState::new(
            Arc::new(LocalFs::new(dir)),
            Arc::new(MemKv::new()),
            Arc::new(NullLockFactory),
            TaskIssuer::Local,
        );
        crate::routes::router(state)
    }

    fn config_body() -> Body {
        Body::from(
            serde_json::json!({
                "tasks": [
                    {"type": "git-checkout", "params": {"repository": "git://example/x.git"}},
                    {"type": "execute-shell", "params": {"script": "make"}}
                ]
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn put_then_get_job_config() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/jobs/nightly")
                    .header("content-type", "application/json")
                    .body(config_body())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/jobs/nightly").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["job_id"], "nightly");
        assert_eq!(body["config"]["tasks"][1]["type"], "execute-shell");

        let response = app
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["jobs"][0], "nightly");
    }

    #[tokio::test]
    async fn missing_job_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let response = app
            .oneshot(Request::builder().uri("/jobs/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_the_whole_job_tree() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/jobs/short-lived")
                    .header("content-type", "application/json")
                    .body(config_body())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/jobs/short-lived")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/jobs/short-lived")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_with_traversal_token_cannot_reach_outside_the_jobs_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("precious.txt"), b"keep me").unwrap();
        let app = app(dir.path());

        // Encoded dots decode to ".." in the path segment, which must be
        // rejected as a job id rather than resolved against the data root.
        for uri in ["/jobs/%2E%2E", "/jobs/%2E", "/jobs/..%2Fdata"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }

        let kept = std::fs::read(dir.path().join("precious.txt")).unwrap();
        assert_eq!(kept, b"keep me");
    }
}
