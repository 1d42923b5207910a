use std::{path::PathBuf, time::Duration};

use common::utils::config::AppConfig;

/// Tuning of one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub peer_id: String,
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub update_every_k: u32,
    pub cache_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            peer_id: "peer-1".to_string(),
            poll_interval: Duration::from_secs(5),
            max_concurrent_jobs: 1,
            update_every_k: 5,
            cache_dir: PathBuf::from("./data/cache"),
        }
    }
}

impl WorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            peer_id: config.peer_id.clone(),
            poll_interval: Duration::from_secs(config.job_poll_seconds.max(1)),
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            update_every_k: config.update_every_k.max(1),
            cache_dir: PathBuf::from(&config.local_cache_dir),
        }
    }
}
