use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{job::JobStatus, peer_shard::RecordError};
use crate::{
    error::AppError,
    storage::{
        keys::user_tasks_key,
        kv::{hash_get_json, hash_set_json, StateStore},
    },
};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStep {
    #[default]
    Schema,
    Records,
    Completed,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Single-process generation run: one schema, then `count` records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub owner: String,
    pub prompt: String,
    pub count: u32,
    #[serde(default)]
    pub dataset_mode: bool,
    #[serde(default)]
    pub use_custom_inference: bool,
    #[serde(default)]
    pub inference_base_url: Option<String>,
    #[serde(default)]
    pub inference_path: Option<String>,
    #[serde(default)]
    pub inference_model: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    #[serde(default)]
    pub step: TaskStep,
    #[serde(default)]
    pub schema_status: PhaseStatus,
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(default)]
    pub schema_error: Option<String>,
    pub completed: u32,
    /// Failed attempts, including retries of records that later succeeded.
    pub failures: u32,
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<RecordError>,
}

impl Task {
    /// Records accounted for, successful or not.
    pub fn processed(&self) -> u32 {
        let failed = u32::try_from(self.errors.iter().filter(|e| e.index >= 0).count())
            .unwrap_or(u32::MAX);
        self.completed.saturating_add(failed)
    }

    /// `queued -> running`, with the schema phase starting alongside.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.status = self.status.started()?;
        self.schema_status = PhaseStatus::Running;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.status = self.status.succeeded()?;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.status = self.status.failed()?;
        self.finished_at = Some(now);
        Ok(())
    }

    pub async fn persist<S>(&self, store: &S) -> Result<(), AppError>
    where
        S: StateStore + ?Sized,
    {
        hash_set_json(store, &user_tasks_key(&self.owner), &self.id, self).await
    }

    pub async fn get<S>(store: &S, owner: &str, task_id: &str) -> Result<Self, AppError>
    where
        S: StateStore + ?Sized,
    {
        hash_get_json(store, &user_tasks_key(owner), task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))
    }

    /// Tasks of `owner`, newest first. Undecodable entries are skipped.
    pub async fn list<S>(store: &S, owner: &str) -> Result<Vec<Self>, AppError>
    where
        S: StateStore + ?Sized,
    {
        let hash_key = user_tasks_key(owner);
        let mut tasks = Vec::new();
        for task_id in store.hash_keys(&hash_key).await? {
            match hash_get_json::<Self, S>(store, &hash_key, &task_id).await {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                Err(err) => warn!(%task_id, error = %err, "skipping unreadable task"),
            }
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}
