//! HTTP client for the Girder frontend contracts.
//!
//! One thin method per remote operation, mapping HTTP status to the core
//! error taxonomy: 404 is `NotFound`, 409 is `Conflict`, transport
//! errors and 5xx are `TransientIo`. Nothing here retries; retry
//! budgets belong to callers.

pub mod builds;
pub mod jobs;
pub mod tasks;

use girder_config::WorkerConfig;
use girder_core::{Error, Result};
use rand::seq::SliceRandom;
use url::Url;

/// Client over one or more frontends.
///
/// Every call picks a frontend at random from the configured list, so a
/// fleet of workers spreads load and no single frontend outage starves
/// everyone deterministically.
#[derive(Debug, Clone)]
pub struct FrontendClient {
    http: reqwest::Client,
    frontends: Vec<Url>,
    task_frontends: Vec<Url>,
}

impl FrontendClient {
    pub fn new(frontends: Vec<Url>, task_frontends: Vec<Url>) -> Self {
        let task_frontends = if task_frontends.is_empty() {
            frontends.clone()
        } else {
            task_frontends
        };
        Self {
            http: reqwest::Client::new(),
            frontends,
            task_frontends,
        }
    }

    pub fn from_worker_config(config: &WorkerConfig) -> Self {
        Self::new(config.frontends.clone(), config.task_frontends.clone())
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn url(&self, path: &str) -> Result<Url> {
        join(pick(&self.frontends)?, path)
    }

    fn task_url(&self, path: &str) -> Result<Url> {
        join(pick(&self.task_frontends)?, path)
    }
}

fn pick(urls: &[Url]) -> Result<&Url> {
    urls.choose(&mut rand::thread_rng())
        .ok_or_else(|| Error::InvalidInput("no frontends configured".into()))
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|err| Error::InvalidInput(format!("bad frontend url: {err}")))
}

pub(crate) fn transport(err: reqwest::Error) -> Error {
    Error::TransientIo(format!("frontend request failed: {err}"))
}

/// Map an unexpected response status to the taxonomy.
pub(crate) fn status_error(status: reqwest::StatusCode, context: &str) -> Error {
    match status.as_u16() {
        404 => Error::NotFound(context.to_owned()),
        409 => Error::Conflict(context.to_owned()),
        400 => Error::InvalidInput(format!("{context}: rejected by frontend")),
        code => Error::TransientIo(format!("{context}: HTTP {code}")),
    }
}
