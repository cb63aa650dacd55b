//! Task store operations.

use girder_core::{Result, TaskId, TaskRecord};
use serde::{Deserialize, Serialize};

use crate::{FrontendClient, status_error, transport};

/// Wire envelope for a single task.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: TaskId,
    pub data: TaskRecord,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    tasks: Vec<TaskId>,
}

impl FrontendClient {
    /// Fetch the full task id list. No ordering guaranteed; a stale list
    /// only shortens this round's candidate set.
    pub async fn list_tasks(&self) -> Result<Vec<TaskId>> {
        let url = self.task_url("tasks")?;
        let response = self.http().get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "list tasks"));
        }
        let list: TaskList = response.json().await.map_err(transport)?;
        Ok(list.tasks)
    }

    /// Mint a task id. The record is stored as `creating`; the issuer
    /// populates it with a follow-up update once the payload is known.
    pub async fn create_task(&self) -> Result<TaskId> {
        let url = self.task_url("tasks")?;
        let response = self
            .http()
            .post(url)
            .json(&TaskRecord::creating())
            .send()
            .await
            .map_err(transport)?;
        if response.status().as_u16() != 201 {
            return Err(status_error(response.status(), "create task"));
        }
        let envelope: TaskEnvelope = response.json().await.map_err(transport)?;
        Ok(envelope.id)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<TaskRecord> {
        let url = self.task_url(&format!("tasks/{id}"))?;
        let response = self.http().get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &format!("get task {id}")));
        }
        let envelope: TaskEnvelope = response.json().await.map_err(transport)?;
        Ok(envelope.data)
    }

    /// Replace a task record. `Conflict` when another actor owns the
    /// task or the stored record moved underneath the caller; the
    /// compare-and-swap losing side of a claim race lands here.
    pub async fn update_task(&self, id: TaskId, record: &TaskRecord) -> Result<TaskRecord> {
        let url = self.task_url(&format!("tasks/{id}"))?;
        let response = self
            .http()
            .put(url)
            .json(record)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &format!("update task {id}")));
        }
        let envelope: TaskEnvelope = response.json().await.map_err(transport)?;
        Ok(envelope.data)
    }

    /// Delete a task. Deleting an already-absent task succeeds.
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        let url = self.task_url(&format!("tasks/{id}"))?;
        let response = self.http().delete(url).send().await.map_err(transport)?;
        match response.status().as_u16() {
            204 | 404 => Ok(()),
            _ => Err(status_error(response.status(), &format!("delete task {id}"))),
        }
    }
}
