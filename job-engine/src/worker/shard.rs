use bytes::Bytes;
use common::{
    error::AppError,
    storage::types::{
        job::Job,
        job_details::JobDetails,
        metrics::MetricsDelta,
        peer_shard::{PeerShardState, RecordError},
        user_settings::UserSettings,
    },
};
use inference_pipeline::InferenceConfig;
use tracing::{error, info, warn};

use super::{
    config::WorkerConfig,
    local_log::{LocalShardLog, LocalStateSnapshot, LogEntry},
};
use crate::{
    context::EngineContext,
    lifecycle::{mark_failed, mark_running, record_metrics, refresh_job_progress},
};

/// What one activation did with a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardOutcome {
    /// No shard for this peer, already finalized, or the job is terminal.
    Skipped,
    /// The job turned terminal while this shard was running.
    Stopped,
    Finalized {
        generated_ok: u32,
        generated_failed: u32,
    },
    /// A job-fatal fault drove the job to `failed`.
    Failed { reason: String },
}

/// Advances this peer's shard of one job.
pub struct ShardRunner {
    ctx: EngineContext,
    config: WorkerConfig,
}

impl ShardRunner {
    pub fn new(ctx: EngineContext, config: WorkerConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    #[tracing::instrument(skip_all, fields(job_id = %job_id, peer_id = %self.config.peer_id))]
    pub async fn run_job_for_peer(&self, job_id: &str) -> Result<ShardOutcome, AppError> {
        let state = &*self.ctx.state;
        let Some(job) = Job::load(state, job_id).await? else {
            return Ok(ShardOutcome::Skipped);
        };
        if job.status.is_terminal() {
            return Ok(ShardOutcome::Skipped);
        }
        let Some(shard) = PeerShardState::load(state, job_id, &self.config.peer_id).await? else {
            return Ok(ShardOutcome::Skipped);
        };
        if shard.is_finalized() {
            return Ok(ShardOutcome::Skipped);
        }

        match self.advance(&job, shard).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.abort(job_id, &err).await,
        }
    }

    async fn advance(&self, job: &Job, mut shard: PeerShardState) -> Result<ShardOutcome, AppError> {
        let state = &*self.ctx.state;
        let log = LocalShardLog::new(&self.config.cache_dir, &job.id, &shard.peer_id);
        let local = log.open(shard.range).await?;
        let now = self.ctx.clock.now();

        // The local log is authoritative, even when it is empty.
        let counters = (local.ok, local.failed, local.failed_attempts);
        if counters != (shard.generated_ok, shard.generated_failed, shard.failed_attempts) {
            shard.generated_ok = local.ok;
            shard.generated_failed = local.failed;
            shard.failed_attempts = local.failed_attempts;
            shard.last_update_at = Some(now);
            shard.save(state, &job.id).await?;
            info!(resumed_entries = local.entries, "resuming shard from local log");
        }

        let details = JobDetails::download(&*self.ctx.blobs, &job.job_details_cid, &job.id).await?;
        let owner_settings = if details.inference.use_external_api {
            Some(UserSettings::read(state, &job.owner).await?)
        } else {
            None
        };
        let inference = InferenceConfig::for_endpoint(&details.inference, owner_settings.as_ref());

        if shard.started_at.is_none() {
            shard.started_at = Some(now);
            shard.save(state, &job.id).await?;
        }
        mark_running(state, &job.id, now).await?;

        let mut errors = local.errors;
        let mut since_checkpoint = 0_u32;
        let first = shard.range.start.saturating_add(local.entries);

        for index in first..shard.range.end {
            match self
                .ctx
                .generator
                .generate_record(
                    &details.instructions,
                    Some(&details.schema),
                    details.dataset_mode,
                    &inference,
                )
                .await
            {
                Ok(generated) => {
                    log.append(&LogEntry::success(
                        index,
                        generated.value,
                        generated.failed_attempts,
                    ))
                    .await?;
                    shard.generated_ok = shard.generated_ok.saturating_add(1);
                    shard.failed_attempts =
                        shard.failed_attempts.saturating_add(generated.failed_attempts);
                    record_metrics(
                        state,
                        MetricsDelta {
                            total_records_generated: 1,
                            ..Default::default()
                        },
                    )
                    .await;
                }
                Err(failure) => {
                    let message = failure.error.to_string();
                    warn!(
                        index,
                        failed_attempts = failure.failed_attempts,
                        error = %message,
                        "record generation failed"
                    );
                    log.append(&LogEntry::failure(index, message.clone())).await?;
                    shard.generated_failed = shard.generated_failed.saturating_add(1);
                    errors.push(RecordError {
                        index: i64::from(index),
                        message,
                    });
                }
            }

            since_checkpoint = since_checkpoint.saturating_add(1);
            if since_checkpoint >= self.config.update_every_k {
                since_checkpoint = 0;
                let checkpoint_at = self.ctx.clock.now();
                shard.last_update_at = Some(checkpoint_at);
                shard.save(state, &job.id).await?;
                let current = refresh_job_progress(state, &job.id, checkpoint_at).await?;
                if current.status.is_terminal() {
                    info!(status = %current.status, "job ended elsewhere, stopping shard");
                    return Ok(ShardOutcome::Stopped);
                }
            }
        }

        self.finalize(&job.id, shard, &log, &errors).await
    }

    async fn finalize(
        &self,
        job_id: &str,
        mut shard: PeerShardState,
        log: &LocalShardLog,
        errors: &[RecordError],
    ) -> Result<ShardOutcome, AppError> {
        let state = &*self.ctx.state;
        let current = Job::get(state, job_id).await?;
        if current.status.is_terminal() {
            return Ok(ShardOutcome::Stopped);
        }

        let peer_id = shard.peer_id.clone();
        let results = log.read_raw().await?;
        let result_cid = self
            .ctx
            .blobs
            .upload(Bytes::from(results), &format!("{job_id}_{peer_id}.jsonl"))
            .await?;
        let errors_cid = self
            .ctx
            .blobs
            .upload(
                Bytes::from(serde_json::to_vec_pretty(errors)?),
                &format!("{job_id}_{peer_id}_errors.json"),
            )
            .await?;

        let finished_at = self.ctx.clock.now();
        shard.result_cid = Some(result_cid.clone());
        shard.errors_cid = Some(errors_cid.clone());
        shard.finished_at = Some(finished_at);
        shard.last_update_at = Some(finished_at);
        shard.save(state, job_id).await?;

        log.save_state(&LocalStateSnapshot {
            generated_ok: shard.generated_ok,
            generated_failed: shard.generated_failed,
            failed_attempts: shard.failed_attempts,
            result_cid,
            errors_cid,
            finished_at,
        })
        .await?;

        refresh_job_progress(state, job_id, finished_at).await?;
        info!(
            generated_ok = shard.generated_ok,
            generated_failed = shard.generated_failed,
            failed_attempts = shard.failed_attempts,
            "shard finalized"
        );

        Ok(ShardOutcome::Finalized {
            generated_ok: shard.generated_ok,
            generated_failed: shard.generated_failed,
        })
    }

    async fn abort(&self, job_id: &str, err: &AppError) -> Result<ShardOutcome, AppError> {
        let state = &*self.ctx.state;
        let now = self.ctx.clock.now();
        let reason = err.to_string();
        error!(error = %reason, "shard processing failed, failing job");

        match PeerShardState::load(state, job_id, &self.config.peer_id).await {
            Ok(Some(mut shard)) => {
                shard.finished_at = Some(now);
                shard.last_update_at = Some(now);
                if let Err(save_err) = shard.save(state, job_id).await {
                    warn!(error = %save_err, "could not mark shard finished");
                }
            }
            Ok(None) => {}
            Err(load_err) => warn!(error = %load_err, "could not reload shard"),
        }

        mark_failed(state, job_id, now, &reason).await?;
        Ok(ShardOutcome::Failed { reason })
    }
}
