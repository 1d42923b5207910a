pub mod job;
pub mod job_details;
pub mod metrics;
pub mod peer_shard;
pub mod task;
pub mod user_settings;
