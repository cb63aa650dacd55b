//! JSON configuration documents for Girder CI.
//!
//! Both the frontend and the workers read a single JSON file at startup.

pub mod error;
pub mod frontend;
pub mod worker;

pub use error::{ConfigError, ConfigResult};
pub use frontend::{CoordinationSelection, FrontendConfig, StorageSelection};
pub use worker::WorkerConfig;
