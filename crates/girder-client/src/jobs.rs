//! Job configuration operations.

use girder_core::{JobConfig, JobId, Result};
use serde::Deserialize;

use crate::{FrontendClient, status_error, transport};

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    #[allow(dead_code)]
    job_id: JobId,
    config: JobConfig,
}

impl FrontendClient {
    pub async fn get_job_config(&self, job_id: &JobId) -> Result<JobConfig> {
        let url = self.url(&format!("jobs/{job_id}"))?;
        let response = self.http().get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &format!("get job {job_id}")));
        }
        let envelope: JobEnvelope = response.json().await.map_err(transport)?;
        Ok(envelope.config)
    }

    pub async fn put_job_config(&self, job_id: &JobId, config: &JobConfig) -> Result<()> {
        let url = self.url(&format!("jobs/{job_id}"))?;
        let response = self
            .http()
            .put(url)
            .json(config)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &format!("put job {job_id}")));
        }
        Ok(())
    }
}
