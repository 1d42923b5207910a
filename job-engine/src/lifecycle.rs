//! Job status transitions driven by shard progress, with their metric side effects.

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        kv::StateStore,
        types::{
            job::{Job, JobStatus},
            metrics::{Metrics, MetricsDelta},
            peer_shard::PeerShardState,
        },
    },
};
use serde::Serialize;
use tracing::{info, warn};

use crate::job_index::refresh_user_entry;

/// Aggregate counters over every shard of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub total_generated: u32,
    pub total_ok: u32,
    pub total_failed: u32,
    pub failed_attempts: u32,
    pub shards_complete: usize,
    pub shard_count: usize,
}

impl JobProgress {
    pub fn from_shards(shards: &[PeerShardState]) -> Self {
        let mut progress = Self {
            shard_count: shards.len(),
            ..Self::default()
        };
        for shard in shards {
            progress.total_ok = progress.total_ok.saturating_add(shard.generated_ok);
            progress.total_failed = progress.total_failed.saturating_add(shard.generated_failed);
            progress.failed_attempts = progress.failed_attempts.saturating_add(shard.failed_attempts);
            if shard.is_complete() {
                progress.shards_complete = progress.shards_complete.saturating_add(1);
            }
        }
        progress.total_generated = progress.total_ok.saturating_add(progress.total_failed);
        progress
    }

    pub fn all_complete(&self) -> bool {
        self.shard_count > 0 && self.shards_complete == self.shard_count
    }
}

/// Apply a metrics delta, logging instead of failing when the store refuses.
pub async fn record_metrics<S>(store: &S, delta: MetricsDelta)
where
    S: StateStore + ?Sized,
{
    if let Err(err) = Metrics::update(store, &delta).await {
        warn!(error = %err, ?delta, "metrics update failed");
    }
}

async fn save_job<S>(store: &S, job: &Job) -> Result<(), AppError>
where
    S: StateStore + ?Sized,
{
    job.save(store).await?;
    refresh_user_entry(store, job).await
}

/// First activation of any peer: `queued -> running`.
pub async fn mark_running<S>(store: &S, job_id: &str, now: DateTime<Utc>) -> Result<Job, AppError>
where
    S: StateStore + ?Sized,
{
    let mut job = Job::get(store, job_id).await?;
    if job.status != JobStatus::Queued {
        return Ok(job);
    }

    job.start(now)?;
    save_job(store, &job).await?;
    info!(%job_id, "job running");
    record_metrics(
        store,
        MetricsDelta {
            active_jobs: 1,
            last_job_at: Some(now),
            ..Default::default()
        },
    )
    .await;
    Ok(job)
}

/// Recompute totals from all shards and promote the job once every shard is
/// complete. A terminal job is returned untouched.
pub async fn refresh_job_progress<S>(
    store: &S,
    job_id: &str,
    now: DateTime<Utc>,
) -> Result<Job, AppError>
where
    S: StateStore + ?Sized,
{
    let mut job = Job::get(store, job_id).await?;
    if job.status.is_terminal() {
        return Ok(job);
    }

    let shards = PeerShardState::load_all(store, job_id, &job.peers).await?;
    let progress = JobProgress::from_shards(&shards);
    job.total_ok = progress.total_ok;
    job.total_failed = progress.total_failed;
    job.total_generated = progress.total_generated;
    job.failed_attempts = progress.failed_attempts;
    job.updated_at = now;

    let finished = progress.all_complete();
    if finished {
        if job.status == JobStatus::Queued {
            job.start(now)?;
        }
        job.succeed(now)?;
    }

    save_job(store, &job).await?;

    if finished {
        info!(
            %job_id,
            total_ok = job.total_ok,
            total_failed = job.total_failed,
            records_duration_ms = job.records_duration_ms,
            "job succeeded"
        );
        record_metrics(
            store,
            MetricsDelta {
                active_jobs: -1,
                ..Default::default()
            },
        )
        .await;
    }

    Ok(job)
}

/// Drive a job straight to `failed`. A terminal job is returned untouched.
pub async fn mark_failed<S>(
    store: &S,
    job_id: &str,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<Job, AppError>
where
    S: StateStore + ?Sized,
{
    let mut job = Job::get(store, job_id).await?;
    if job.status.is_terminal() {
        return Ok(job);
    }

    let was_running = job.status == JobStatus::Running;
    job.fail(now)?;
    save_job(store, &job).await?;
    warn!(%job_id, %reason, "job failed");

    record_metrics(
        store,
        MetricsDelta {
            failed_jobs: 1,
            active_jobs: if was_running { -1 } else { 0 },
            ..Default::default()
        },
    )
    .await;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::{
        kv::MemoryStateStore,
        types::peer_shard::ShardRange,
    };

    fn job(id: &str, peers: &[&str], now: DateTime<Utc>) -> Job {
        Job {
            id: id.into(),
            owner: "alice".into(),
            title: "t".into(),
            status: JobStatus::Queued,
            total_records: 4,
            dataset_mode: false,
            peers: peers.iter().map(|p| (*p).to_string()).collect(),
            peer_count: peers.len(),
            total_generated: 0,
            total_ok: 0,
            total_failed: 0,
            failed_attempts: 0,
            job_details_cid: "cid".into(),
            created_at: now,
            schema_generated_at: now,
            job_started_at: None,
            job_finished_at: None,
            schema_duration_ms: 0,
            records_duration_ms: None,
            schema_refreshes: 0,
            updated_at: now,
        }
    }

    async fn seed(store: &MemoryStateStore, now: DateTime<Utc>) {
        job("job_a", &["p1", "p2"], now).save(store).await.expect("job");
        PeerShardState::new("p1", ShardRange { start: 0, end: 2 })
            .save(store, "job_a")
            .await
            .expect("p1");
        PeerShardState::new("p2", ShardRange { start: 2, end: 4 })
            .save(store, "job_a")
            .await
            .expect("p2");
    }

    async fn finish_shard(store: &MemoryStateStore, peer: &str, ok: u32, failed: u32) {
        let mut shard = PeerShardState::load(store, "job_a", peer)
            .await
            .expect("load")
            .expect("shard");
        shard.generated_ok = ok;
        shard.generated_failed = failed;
        shard.result_cid = Some(format!("cid-{peer}"));
        shard.save(store, "job_a").await.expect("save");
    }

    #[tokio::test]
    async fn job_succeeds_only_when_every_shard_is_complete() {
        let store = MemoryStateStore::new();
        let now = Utc::now();
        seed(&store, now).await;

        mark_running(&store, "job_a", now).await.expect("running");
        finish_shard(&store, "p1", 2, 0).await;

        let job = refresh_job_progress(&store, "job_a", now).await.expect("refresh");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.total_generated, 2);

        finish_shard(&store, "p2", 0, 2).await;
        let job = refresh_job_progress(&store, "job_a", now).await.expect("refresh");
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.total_ok, 2);
        assert_eq!(job.total_failed, 2);
        assert_eq!(job.total_generated, 4);

        let metrics = Metrics::get_current(&store).await.expect("metrics");
        assert_eq!(metrics.active_jobs, 0);
        assert_eq!(metrics.last_job_at, Some(now));
    }

    #[tokio::test]
    async fn terminal_jobs_ignore_further_updates() {
        let store = MemoryStateStore::new();
        let now = Utc::now();
        seed(&store, now).await;

        mark_running(&store, "job_a", now).await.expect("running");
        mark_failed(&store, "job_a", now, "details corrupt").await.expect("failed");
        finish_shard(&store, "p1", 2, 0).await;
        finish_shard(&store, "p2", 2, 0).await;

        let job = refresh_job_progress(&store, "job_a", now).await.expect("refresh");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.total_generated, 0);

        let again = mark_failed(&store, "job_a", now, "again").await.expect("noop");
        assert_eq!(again.status, JobStatus::Failed);

        let metrics = Metrics::get_current(&store).await.expect("metrics");
        assert_eq!(metrics.failed_jobs, 1);
        assert_eq!(metrics.active_jobs, 0);
    }

    #[tokio::test]
    async fn running_transition_counts_once() {
        let store = MemoryStateStore::new();
        let now = Utc::now();
        seed(&store, now).await;

        mark_running(&store, "job_a", now).await.expect("first");
        mark_running(&store, "job_a", now).await.expect("second");

        let metrics = Metrics::get_current(&store).await.expect("metrics");
        assert_eq!(metrics.active_jobs, 1);
    }

    #[test]
    fn progress_sums_shards() {
        let mut a = PeerShardState::new("p1", ShardRange { start: 0, end: 3 });
        a.generated_ok = 2;
        a.generated_failed = 1;
        a.failed_attempts = 4;
        a.result_cid = Some("x".into());
        let b = PeerShardState::new("p2", ShardRange { start: 3, end: 5 });

        let progress = JobProgress::from_shards(&[a, b]);
        assert_eq!(progress.total_generated, 3);
        assert_eq!(progress.failed_attempts, 4);
        assert_eq!(progress.shards_complete, 1);
        assert!(!progress.all_complete());
    }
}
