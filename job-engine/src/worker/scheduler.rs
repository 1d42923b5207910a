use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{error::AppError, storage::types::peer_shard::PeerShardState};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{interval, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    config::WorkerConfig,
    shard::{ShardOutcome, ShardRunner},
};
use crate::{context::EngineContext, job_index::jobs_for_peer};

/// Result of a single activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another activation is still advancing a shard.
    Busy,
    /// No eligible shard for this peer.
    Idle,
    Advanced { job_id: String, outcome: ShardOutcome },
}

/// One peer's view of the work queue. At most one shard is advanced at a time.
pub struct ShardWorker {
    ctx: EngineContext,
    runner: ShardRunner,
    busy: Mutex<()>,
}

impl ShardWorker {
    pub fn new(ctx: EngineContext, config: WorkerConfig) -> Self {
        Self {
            runner: ShardRunner::new(ctx.clone(), config),
            ctx,
            busy: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        self.runner.config()
    }

    /// Advance the oldest eligible shard, or skip when an activation is in flight.
    pub async fn poll_once(&self) -> Result<PollOutcome, AppError> {
        let Ok(_guard) = self.busy.try_lock() else {
            debug!("worker busy, skipping activation");
            return Ok(PollOutcome::Busy);
        };

        let config = self.runner.config();
        let state = &*self.ctx.state;
        let jobs = jobs_for_peer(state, &config.peer_id).await?;

        for job in jobs.iter().take(config.max_concurrent_jobs) {
            let Some(shard) = PeerShardState::load(state, &job.id, &config.peer_id).await? else {
                continue;
            };
            if shard.is_complete() {
                continue;
            }

            let outcome = self.runner.run_job_for_peer(&job.id).await?;
            return Ok(PollOutcome::Advanced {
                job_id: job.id.clone(),
                outcome,
            });
        }

        Ok(PollOutcome::Idle)
    }
}

/// Source of activations for the scheduler.
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next activation. `false` means no more will come.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticker; the first tick fires immediately and missed ticks are skipped.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticker stepped by hand through a [`ManualTickHandle`].
pub struct ManualTicker {
    rx: mpsc::Receiver<()>,
}

#[derive(Clone)]
pub struct ManualTickHandle {
    tx: mpsc::Sender<()>,
}

impl ManualTicker {
    pub fn channel() -> (Self, ManualTickHandle) {
        let (tx, rx) = mpsc::channel(16);
        (Self { rx }, ManualTickHandle { tx })
    }
}

impl ManualTickHandle {
    /// Queue one activation. Returns `false` once the scheduler is gone.
    pub async fn tick(&self) -> bool {
        self.tx.send(()).await.is_ok()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

/// Owns the poll loop of one worker process.
///
/// `stop` halts future activations and waits for the current one to finish;
/// it never interrupts a generation call.
pub struct PollScheduler {
    worker: Arc<ShardWorker>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollScheduler {
    pub fn new(worker: Arc<ShardWorker>) -> Self {
        Self {
            worker,
            token: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the loop. Returns `false` if it is already running.
    pub fn start<T>(&mut self, mut ticker: T) -> bool
    where
        T: Ticker + 'static,
    {
        if self.is_running() {
            return false;
        }

        self.token = CancellationToken::new();
        let token = self.token.clone();
        let worker = Arc::clone(&self.worker);
        let peer_id = worker.config().peer_id.clone();

        self.handle = Some(tokio::spawn(async move {
            info!(%peer_id, "job worker started");
            loop {
                let more = tokio::select! {
                    () = token.cancelled() => false,
                    more = ticker.tick() => more,
                };
                if !more {
                    break;
                }

                match worker.poll_once().await {
                    Ok(PollOutcome::Advanced { job_id, outcome }) => {
                        info!(%peer_id, %job_id, ?outcome, "shard advanced");
                    }
                    Ok(PollOutcome::Idle | PollOutcome::Busy) => {}
                    Err(err) => error!(%peer_id, error = %err, "job worker poll failed"),
                }
            }
            info!(%peer_id, "job worker stopped");
        }));
        true
    }

    /// Stop scheduling activations and wait for the loop to exit.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "job worker task ended abnormally");
            }
        }
    }
}
