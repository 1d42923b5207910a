#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod context;
pub mod export;
pub mod job_index;
pub mod lifecycle;
pub mod schema;
pub mod service;
pub mod splitter;
pub mod task_runner;
pub mod worker;

use std::sync::Arc;

pub use context::EngineContext;
pub use export::ExportFormat;
pub use service::{
    ConfirmRequest, Draft, DraftRequest, EndpointRequest, JobService, JobView, ServiceSettings,
};
pub use task_runner::{TaskRequest, TaskRunner};
use tokio_util::sync::CancellationToken;
use tracing::info;
pub use worker::{IntervalTicker, PollScheduler, ShardWorker, WorkerConfig};

/// Poll for this peer's shards until `shutdown` fires. The shard in flight,
/// if any, is finished before returning.
pub async fn run_worker_loop(ctx: EngineContext, config: WorkerConfig, shutdown: CancellationToken) {
    let poll_interval = config.poll_interval;
    info!(
        peer_id = %config.peer_id,
        poll_ms = u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX),
        max_concurrent_jobs = config.max_concurrent_jobs,
        update_every_k = config.update_every_k,
        "starting job worker"
    );

    let mut scheduler = PollScheduler::new(Arc::new(ShardWorker::new(ctx, config)));
    scheduler.start(IntervalTicker::new(poll_interval));

    shutdown.cancelled().await;
    scheduler.stop().await;
}
