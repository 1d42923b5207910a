mod config;
pub mod local_log;
mod scheduler;
mod shard;


pub use config::WorkerConfig;
pub use scheduler::{
    IntervalTicker, ManualTickHandle, ManualTicker, PollOutcome, PollScheduler, ShardWorker,
    Ticker,
};
pub use shard::{ShardOutcome, ShardRunner};
