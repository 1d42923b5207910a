//! Per-(job, peer) append log on local disk. It is the source of truth for
//! how far a shard got, and is owned by a single worker.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::types::peer_shard::{RecordError, ShardRange},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;

/// One line of `results.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub i: u32,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failed_attempts: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl LogEntry {
    pub fn success(index: u32, data: Value, failed_attempts: u32) -> Self {
        Self {
            i: index,
            ok: true,
            data: Some(data),
            error: None,
            failed_attempts,
        }
    }

    pub fn failure(index: u32, message: impl Into<String>) -> Self {
        Self {
            i: index,
            ok: false,
            data: None,
            error: Some(message.into()),
            failed_attempts: 0,
        }
    }
}

/// Counters recovered from the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalProgress {
    pub entries: u32,
    pub ok: u32,
    pub failed: u32,
    pub failed_attempts: u32,
    pub errors: Vec<RecordError>,
}

/// `state.json` written next to the log once a shard is finalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalStateSnapshot {
    pub generated_ok: u32,
    pub generated_failed: u32,
    pub failed_attempts: u32,
    pub result_cid: String,
    pub errors_cid: String,
    pub finished_at: DateTime<Utc>,
}

pub struct LocalShardLog {
    dir: PathBuf,
}

impl LocalShardLog {
    pub fn new(cache_dir: &Path, job_id: &str, peer_id: &str) -> Self {
        Self {
            dir: cache_dir.join(job_id).join(peer_id),
        }
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join("results.jsonl")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    /// Read the log, keeping the longest prefix of well-formed entries whose
    /// indices run `range.start, range.start + 1, ...` inside `range`. Anything
    /// after that prefix (a torn write, a duplicate) is cut off on disk.
    pub async fn open(&self, range: ShardRange) -> Result<LocalProgress, AppError> {
        fs::create_dir_all(&self.dir).await?;

        let raw = match fs::read_to_string(self.results_path()).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let mut progress = LocalProgress::default();
        let mut kept = String::with_capacity(raw.len());
        let mut dropped = 0_usize;

        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let expected = range.start.saturating_add(progress.entries);
            let entry = match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) if entry.i == expected && expected < range.end && dropped == 0 => entry,
                _ => {
                    dropped = dropped.saturating_add(1);
                    continue;
                }
            };

            if entry.ok {
                progress.ok = progress.ok.saturating_add(1);
                progress.failed_attempts = progress.failed_attempts.saturating_add(entry.failed_attempts);
            } else {
                progress.failed = progress.failed.saturating_add(1);
                progress.errors.push(RecordError {
                    index: i64::from(entry.i),
                    message: entry.error.unwrap_or_else(|| "error".to_string()),
                });
            }
            progress.entries = progress.entries.saturating_add(1);
            kept.push_str(line);
            kept.push('\n');
        }

        if dropped > 0 {
            warn!(
                path = %self.results_path().display(),
                dropped,
                kept = progress.entries,
                "truncating local results log"
            );
            fs::write(self.results_path(), kept).await?;
        }

        Ok(progress)
    }

    /// Append one entry and flush it to disk before returning.
    pub async fn append(&self, entry: &LogEntry) -> Result<(), AppError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.results_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    pub async fn read_raw(&self) -> Result<Vec<u8>, AppError> {
        match fs::read(self.results_path()).await {
            Ok(raw) => Ok(raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_state(&self, snapshot: &LocalStateSnapshot) -> Result<(), AppError> {
        fs::write(self.state_path(), serde_json::to_vec_pretty(snapshot)?).await?;
        Ok(())
    }
}
