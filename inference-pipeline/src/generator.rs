use async_trait::async_trait;
use common::error::AppError;
use serde_json::Value;
use thiserror::Error;

use crate::config::InferenceConfig;

/// A generated value plus the attempts wasted before it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    pub failed_attempts: u32,
}

/// Every attempt failed. `error` is the last one seen.
#[derive(Debug, Error)]
#[error("{error} (after {failed_attempts} failed attempts)")]
pub struct InferenceFailure {
    pub failed_attempts: u32,
    #[source]
    pub error: AppError,
}

impl InferenceFailure {
    pub fn new(failed_attempts: u32, error: AppError) -> Self {
        Self {
            failed_attempts,
            error,
        }
    }
}

/// Produces schemas and records for jobs and tasks.
#[async_trait]
pub trait RecordGenerator: Send + Sync {
    async fn generate_schema(
        &self,
        prompt: &str,
        dataset_mode: bool,
        config: &InferenceConfig,
    ) -> Result<Generated<Value>, InferenceFailure>;

    async fn generate_record(
        &self,
        instructions: &str,
        schema: Option<&Value>,
        dataset_mode: bool,
        config: &InferenceConfig,
    ) -> Result<Generated<Value>, InferenceFailure>;
}
