//! Coordination service for Girder CI.
//!
//! Exposes the task store and the job/build/workspace/artifact surface
//! over HTTP. Workers and the build-control worker are the primary
//! consumers; see `girder-client` for the matching client.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
