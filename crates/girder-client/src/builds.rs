//! Build state, console log, workspace, and artifact operations.

use bytes::Bytes;
use girder_core::{BuildState, JobId, Result};
use serde::Deserialize;
use std::path::Path;

use crate::{FrontendClient, status_error, transport};

#[derive(Debug, Deserialize)]
pub struct BuildEnvelope {
    pub job_id: JobId,
    pub build_number: u64,
    pub state: BuildState,
}

#[derive(Debug, Deserialize)]
pub struct BuildList {
    pub builds: Vec<u64>,
    #[serde(default)]
    pub last_build_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ArtifactEnvelope {
    artifact_id: String,
}

impl FrontendClient {
    /// List the build numbers recorded for a job, oldest first.
    pub async fn list_builds(&self, job_id: &JobId) -> Result<BuildList> {
        let url = self.url(&format!("jobs/{job_id}/builds"))?;
        let response = self.http().get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &format!("list builds of {job_id}")));
        }
        response.json().await.map_err(transport)
    }

    /// Trigger a new build; the frontend allocates the build number.
    pub async fn trigger_build(&self, job_id: &JobId) -> Result<BuildEnvelope> {
        let url = self.url(&format!("jobs/{job_id}/builds"))?;
        let response = self.http().post(url).send().await.map_err(transport)?;
        if response.status().as_u16() != 201 {
            return Err(status_error(response.status(), &format!("trigger build for {job_id}")));
        }
        response.json().await.map_err(transport)
    }

    pub async fn get_build_state(&self, job_id: &JobId, build_number: u64) -> Result<BuildState> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/state"))?;
        let response = self.http().get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(
                response.status(),
                &format!("get build state {job_id}/{build_number}"),
            ));
        }
        let envelope: BuildEnvelope = response.json().await.map_err(transport)?;
        Ok(envelope.state)
    }

    pub async fn put_build_state(
        &self,
        job_id: &JobId,
        build_number: u64,
        state: &BuildState,
    ) -> Result<()> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/state"))?;
        let response = self
            .http()
            .put(url)
            .json(state)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(
                response.status(),
                &format!("put build state {job_id}/{build_number}"),
            ));
        }
        Ok(())
    }

    pub async fn get_console(&self, job_id: &JobId, build_number: u64) -> Result<String> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/console"))?;
        let response = self.http().get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(
                response.status(),
                &format!("get console {job_id}/{build_number}"),
            ));
        }
        response.text().await.map_err(transport)
    }

    /// Append to the console log. At-least-once under caller retries:
    /// a retried append that already landed duplicates lines, which is
    /// an accepted inaccuracy of the log, not a correctness problem.
    pub async fn append_console(
        &self,
        job_id: &JobId,
        build_number: u64,
        text: &str,
    ) -> Result<()> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/console"))?;
        let response = self
            .http()
            .post(url)
            .body(text.to_owned())
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(
                response.status(),
                &format!("append console {job_id}/{build_number}"),
            ));
        }
        Ok(())
    }

    /// Download the workspace archive into a local file.
    pub async fn get_workspace(
        &self,
        job_id: &JobId,
        build_number: u64,
        destination: &Path,
    ) -> Result<()> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/workspace"))?;
        let response = self.http().get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(
                response.status(),
                &format!("get workspace {job_id}/{build_number}"),
            ));
        }
        let body = response.bytes().await.map_err(transport)?;
        tokio::fs::write(destination, &body).await?;
        Ok(())
    }

    /// Upload a workspace archive from a local file.
    pub async fn put_workspace(
        &self,
        job_id: &JobId,
        build_number: u64,
        source: &Path,
    ) -> Result<()> {
        let body = tokio::fs::read(source).await?;
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/workspace"))?;
        let response = self
            .http()
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(
                response.status(),
                &format!("put workspace {job_id}/{build_number}"),
            ));
        }
        Ok(())
    }

    /// Delete the workspace archive. Already-gone is success.
    pub async fn delete_workspace(&self, job_id: &JobId, build_number: u64) -> Result<()> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/workspace"))?;
        let response = self.http().delete(url).send().await.map_err(transport)?;
        match response.status().as_u16() {
            204 | 404 => Ok(()),
            _ => Err(status_error(
                response.status(),
                &format!("delete workspace {job_id}/{build_number}"),
            )),
        }
    }

    /// Store a new artifact; the frontend mints the artifact id.
    pub async fn create_artifact(
        &self,
        job_id: &JobId,
        build_number: u64,
        data: Bytes,
    ) -> Result<String> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/artifacts"))?;
        let response = self
            .http()
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(transport)?;
        if response.status().as_u16() != 201 {
            return Err(status_error(
                response.status(),
                &format!("create artifact {job_id}/{build_number}"),
            ));
        }
        let envelope: ArtifactEnvelope = response.json().await.map_err(transport)?;
        Ok(envelope.artifact_id)
    }

    pub async fn get_artifact(
        &self,
        job_id: &JobId,
        build_number: u64,
        artifact_id: &str,
    ) -> Result<Bytes> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/artifacts/{artifact_id}"))?;
        let response = self.http().get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(
                response.status(),
                &format!("get artifact {artifact_id} of {job_id}/{build_number}"),
            ));
        }
        response.bytes().await.map_err(transport)
    }

    pub async fn delete_artifact(
        &self,
        job_id: &JobId,
        build_number: u64,
        artifact_id: &str,
    ) -> Result<()> {
        let url = self.url(&format!("jobs/{job_id}/builds/{build_number}/artifacts/{artifact_id}"))?;
        let response = self.http().delete(url).send().await.map_err(transport)?;
        match response.status().as_u16() {
            204 | 404 => Ok(()),
            _ => Err(status_error(
                response.status(),
                &format!("delete artifact {artifact_id} of {job_id}/{build_number}"),
            )),
        }
    }
}
