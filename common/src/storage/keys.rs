//! Key layout shared by every peer reading or writing job state.

pub const METRICS_KEY: &str = "datagen:metrics";

pub fn job_key(job_id: &str) -> String {
    format!("datagen:job:{job_id}")
}

/// Hash of `peer_id -> PeerShardState` for one job.
pub fn job_peers_key(job_id: &str) -> String {
    format!("datagen:job:{job_id}:peers")
}

/// Hash of `job_id -> created_at` for jobs a peer holds a shard of.
pub fn peer_jobs_key(peer_id: &str) -> String {
    format!("datagen:peer:{peer_id}:jobs")
}

pub fn user_jobs_key(owner: &str) -> String {
    format!("datagen:user:{owner}:jobs")
}

pub fn user_tasks_key(owner: &str) -> String {
    format!("datagen:user:{owner}:tasks")
}

pub fn user_settings_key(owner: &str) -> String {
    format!("datagen:user:{owner}:settings")
}
