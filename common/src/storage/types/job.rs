use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_machines::state_machine;

use crate::{
    error::AppError,
    storage::{
        keys::job_key,
        kv::{get_json, set_json, StateStore},
    },
};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    Start,
    Succeed,
    Fail,
}

impl JobTransition {
    fn as_str(&self) -> &'static str {
        match self {
            JobTransition::Start => "start",
            JobTransition::Succeed => "succeed",
            JobTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Queued,
        states: [Queued, Running, Succeeded, Failed],
        events {
            start {
                transition: { from: Queued, to: Running }
            }
            succeed {
                transition: { from: Running, to: Succeeded }
            }
            fail {
                transition: { from: Queued, to: Failed }
                transition: { from: Running, to: Failed }
            }
        }
    }

    pub(super) fn queued() -> JobLifecycleMachine<(), Queued> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn running() -> JobLifecycleMachine<(), Running> {
        queued()
            .start()
            .expect("start transition from Queued should exist")
    }
}

fn invalid_transition(state: JobStatus, event: JobTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid job transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: JobStatus, event: JobTransition) -> Result<JobStatus, AppError> {
    use lifecycle::*;
    match (state, event) {
        (JobStatus::Queued, JobTransition::Start) => queued()
            .start()
            .map(|_| JobStatus::Running)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Running, JobTransition::Succeed) => running()
            .succeed()
            .map(|_| JobStatus::Succeeded)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Queued, JobTransition::Fail) => queued()
            .fail()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Running, JobTransition::Fail) => running()
            .fail()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

impl JobStatus {
    pub fn started(self) -> Result<Self, AppError> {
        compute_next_state(self, JobTransition::Start)
    }

    pub fn succeeded(self) -> Result<Self, AppError> {
        compute_next_state(self, JobTransition::Succeed)
    }

    pub fn failed(self) -> Result<Self, AppError> {
        compute_next_state(self, JobTransition::Fail)
    }
}

/// One generation request, split into per-peer shards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub owner: String,
    pub title: String,
    pub status: JobStatus,
    pub total_records: u32,
    #[serde(default)]
    pub dataset_mode: bool,
    pub peers: Vec<String>,
    pub peer_count: usize,
    pub total_generated: u32,
    pub total_ok: u32,
    pub total_failed: u32,
    /// Attempts burned by retries on records that eventually succeeded.
    #[serde(default)]
    pub failed_attempts: u32,
    pub job_details_cid: String,
    pub created_at: DateTime<Utc>,
    pub schema_generated_at: DateTime<Utc>,
    #[serde(default)]
    pub job_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub job_finished_at: Option<DateTime<Utc>>,
    pub schema_duration_ms: u64,
    #[serde(default)]
    pub records_duration_ms: Option<u64>,
    pub schema_refreshes: u32,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub async fn load<S>(store: &S, job_id: &str) -> Result<Option<Self>, AppError>
    where
        S: StateStore + ?Sized,
    {
        get_json(store, &job_key(job_id)).await
    }

    pub async fn get<S>(store: &S, job_id: &str) -> Result<Self, AppError>
    where
        S: StateStore + ?Sized,
    {
        Self::load(store, job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))
    }

    pub async fn save<S>(&self, store: &S) -> Result<(), AppError>
    where
        S: StateStore + ?Sized,
    {
        set_json(store, &job_key(&self.id), self).await
    }

    /// `queued -> running`, stamping the start time once.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.status = self.status.started()?;
        self.job_started_at.get_or_insert(now);
        self.updated_at = now;
        Ok(())
    }

    /// `running -> succeeded`, recording the record-phase duration.
    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.status = self.status.succeeded()?;
        self.job_finished_at = Some(now);
        self.records_duration_ms = self
            .job_started_at
            .map(|started| crate::utils::clock::elapsed_ms(started, now));
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.status = self.status.failed()?;
        self.job_finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}
