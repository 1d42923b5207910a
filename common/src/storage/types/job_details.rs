use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::AppError, storage::store::BlobStore};

/// Where and how to call the generation endpoint for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceEndpoint {
    #[serde(default)]
    pub use_external_api: bool,
    pub base_url: String,
    pub path: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

/// Immutable payload of a job, stored once in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    pub id: String,
    pub owner: String,
    pub description: String,
    pub instructions: String,
    pub schema: Value,
    pub inference: InferenceEndpoint,
    #[serde(default)]
    pub dataset_mode: bool,
    pub created_at: DateTime<Utc>,
    pub schema_generated_at: DateTime<Utc>,
    pub schema_duration_ms: u64,
    pub schema_refreshes: u32,
}

impl JobDetails {
    pub fn blob_name(&self) -> String {
        format!("{}_details.json", self.id)
    }

    pub async fn upload<B>(&self, blobs: &B) -> Result<String, AppError>
    where
        B: BlobStore + ?Sized,
    {
        let content = serde_json::to_vec(self)?;
        blobs.upload(Bytes::from(content), &self.blob_name()).await
    }

    /// Fetch and decode the details behind `cid`.
    ///
    /// Missing or undecodable payloads are fatal for the job, so both surface
    /// as `AppError::Processing`.
    pub async fn download<B>(blobs: &B, cid: &str, expected_id: &str) -> Result<Self, AppError>
    where
        B: BlobStore + ?Sized,
    {
        let raw = blobs
            .download(cid)
            .await
            .map_err(|err| AppError::Processing(format!("job details unavailable: {err}")))?;
        let details: Self = serde_json::from_slice(&raw)
            .map_err(|err| AppError::Processing(format!("job details corrupt: {err}")))?;

        if details.id != expected_id {
            return Err(AppError::Processing(format!(
                "job details belong to {}, expected {expected_id}",
                details.id
            )));
        }

        Ok(details)
    }
}
