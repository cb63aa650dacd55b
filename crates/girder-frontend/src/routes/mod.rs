//! API routes.

pub mod builds;
pub mod health;
pub mod jobs;
pub mod tasks;

use crate::AppState;
use axum::Router;

/// Build the frontend router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/jobs", jobs::router().merge(builds::router()))
        .merge(health::router())
        .with_state(state)
}
