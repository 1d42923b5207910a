use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        keys::{peer_jobs_key, user_jobs_key},
        kv::{hash_get_json, hash_set_json, StateStore},
        types::{
            job::{Job, JobStatus},
            peer_shard::PeerShardState,
        },
    },
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Entry of a user's job list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub title: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            title: job.title.clone(),
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Register a new job under its owner and under every assigned peer.
pub async fn index_job<S>(store: &S, job: &Job) -> Result<(), AppError>
where
    S: StateStore + ?Sized,
{
    hash_set_json(store, &user_jobs_key(&job.owner), &job.id, &JobSummary::from(job)).await?;
    for peer_id in &job.peers {
        hash_set_json(store, &peer_jobs_key(peer_id), &job.id, &job.created_at).await?;
    }
    Ok(())
}

/// Keep the owner's list in step with the job record.
pub async fn refresh_user_entry<S>(store: &S, job: &Job) -> Result<(), AppError>
where
    S: StateStore + ?Sized,
{
    hash_set_json(store, &user_jobs_key(&job.owner), &job.id, &JobSummary::from(job)).await
}

/// Jobs of `owner`, newest first.
pub async fn jobs_for_user<S>(store: &S, owner: &str) -> Result<Vec<JobSummary>, AppError>
where
    S: StateStore + ?Sized,
{
    let key = user_jobs_key(owner);
    let mut jobs = Vec::new();
    for job_id in store.hash_keys(&key).await? {
        match hash_get_json::<JobSummary, S>(store, &key, &job_id).await {
            Ok(Some(summary)) => jobs.push(summary),
            Ok(None) => {}
            Err(err) => warn!(%job_id, error = %err, "skipping unreadable job summary"),
        }
    }
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(jobs)
}

/// Non-terminal jobs in which `peer_id` still has an unfinished shard, oldest first.
pub async fn jobs_for_peer<S>(store: &S, peer_id: &str) -> Result<Vec<Job>, AppError>
where
    S: StateStore + ?Sized,
{
    let mut jobs = Vec::new();
    for job_id in store.hash_keys(&peer_jobs_key(peer_id)).await? {
        let Some(job) = Job::load(store, &job_id).await? else {
            warn!(%job_id, %peer_id, "peer index points at a missing job");
            continue;
        };
        if job.status.is_terminal() {
            continue;
        }
        match PeerShardState::load(store, &job_id, peer_id).await? {
            Some(shard) if !shard.is_complete() => jobs.push(job),
            _ => {}
        }
    }
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(jobs)
}
