//! Task store endpoints.
//!
//! Claim races resolve here: `update` is a compare-and-swap on the
//! stored record plus an application-level ownership check on the
//! assignee. Exactly one concurrent claimant observes success; everyone
//! else gets 409 and moves on to another candidate.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use girder_core::{TaskId, TaskRecord};
use serde::Serialize;
use tracing::{debug, info};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/{id}", get(get_task).put(update_task).delete(delete_task))
}

#[derive(Debug, Serialize)]
struct TaskListResponse {
    tasks: Vec<TaskId>,
}

#[derive(Debug, Serialize)]
struct TaskResponse {
    id: TaskId,
    data: TaskRecord,
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<TaskListResponse>, ApiError> {
    let keys = state.tasks.list().await?;
    let tasks = keys.iter().filter_map(|key| key.parse().ok()).collect();
    Ok(Json(TaskListResponse { tasks }))
}

async fn create_task(
    State(state): State<AppState>,
    Json(record): Json<TaskRecord>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let id = TaskId::new();
    let stored = serde_json::to_vec(&record).map_err(|err| ApiError::Internal(err.to_string()))?;
    state.tasks.set(&id.to_string(), stored.into(), None).await?;
    debug!(task = %id, "task created");
    Ok((StatusCode::CREATED, Json(TaskResponse { id, data: record })))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskResponse>, ApiError> {
    let stored = state.tasks.get(&id.to_string()).await?;
    let data = parse_record(&stored)?;
    Ok(Json(TaskResponse { id, data }))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Json(new_record): Json<TaskRecord>,
) -> Result<Json<TaskResponse>, ApiError> {
    let stored = state.tasks.get(&id.to_string()).await?;
    let old_record = parse_record(&stored)?;

    // Ownership check, layered on top of the store's own CAS: once a
    // task has an assignee, only that assignee may replace the record.
    if let (Some(current), Some(proposed)) = (old_record.assignee, new_record.assignee) {
        if current != proposed {
            info!(task = %id, "task assignment conflict");
            return Err(ApiError::Conflict(format!(
                "task {id} is owned by another worker"
            )));
        }
    }

    let serialized =
        serde_json::to_vec(&new_record).map_err(|err| ApiError::Internal(err.to_string()))?;
    state
        .tasks
        .set(&id.to_string(), serialized.into(), Some(stored))
        .await?;
    Ok(Json(TaskResponse {
        id,
        data: new_record,
    }))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<StatusCode, ApiError> {
    state.tasks.delete(&id.to_string()).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_record(stored: &Bytes) -> Result<TaskRecord, ApiError> {
    serde_json::from_slice(stored)
        .map_err(|err| ApiError::Internal(format!("stored task record unreadable: {err}")))
}
