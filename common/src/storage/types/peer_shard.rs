use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    storage::{
        keys::job_peers_key,
        kv::{hash_get_json, hash_set_json, StateStore},
    },
};

/// Half-open index range `[start, end)` of a job's records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardRange {
    pub start: u32,
    pub end: u32,
}

impl ShardRange {
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One failed record. Index `-1` marks a failure before any record existed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordError {
    pub index: i64,
    pub message: String,
}

/// Progress of one peer on one job. Only that peer writes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerShardState {
    pub peer_id: String,
    pub assigned: u32,
    pub range: ShardRange,
    pub generated_ok: u32,
    pub generated_failed: u32,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default)]
    pub last_update_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result_cid: Option<String>,
    #[serde(default)]
    pub errors_cid: Option<String>,
}

impl PeerShardState {
    pub fn new(peer_id: impl Into<String>, range: ShardRange) -> Self {
        Self {
            peer_id: peer_id.into(),
            assigned: range.len(),
            range,
            generated_ok: 0,
            generated_failed: 0,
            failed_attempts: 0,
            last_update_at: None,
            started_at: None,
            finished_at: None,
            result_cid: None,
            errors_cid: None,
        }
    }

    pub fn processed(&self) -> u32 {
        self.generated_ok.saturating_add(self.generated_failed)
    }

    /// Every assigned index has an outcome.
    pub fn is_exhausted(&self) -> bool {
        self.processed() >= self.assigned
    }

    /// Results uploaded; the shard will never be written again.
    pub fn is_finalized(&self) -> bool {
        self.result_cid
            .as_deref()
            .is_some_and(|cid| !cid.is_empty())
    }

    /// Counts toward job success.
    pub fn is_complete(&self) -> bool {
        self.is_exhausted() && self.is_finalized()
    }

    pub async fn load<S>(store: &S, job_id: &str, peer_id: &str) -> Result<Option<Self>, AppError>
    where
        S: StateStore + ?Sized,
    {
        hash_get_json(store, &job_peers_key(job_id), peer_id).await
    }

    /// All shards of a job, in the order of `peers`.
    pub async fn load_all<S>(
        store: &S,
        job_id: &str,
        peers: &[String],
    ) -> Result<Vec<Self>, AppError>
    where
        S: StateStore + ?Sized,
    {
        let mut shards = Vec::with_capacity(peers.len());
        for peer_id in peers {
            let shard = Self::load(store, job_id, peer_id).await?.ok_or_else(|| {
                AppError::NotFound(format!("shard for peer {peer_id} of job {job_id}"))
            })?;
            shards.push(shard);
        }
        Ok(shards)
    }

    pub async fn save<S>(&self, store: &S, job_id: &str) -> Result<(), AppError>
    where
        S: StateStore + ?Sized,
    {
        hash_set_json(store, &job_peers_key(job_id), &self.peer_id, self).await
    }
}
