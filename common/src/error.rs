use async_openai::error::OpenAIError;
use thiserror::Error;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Blob storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Not yet complete: {0}")]
    NotYetComplete(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Inference error: {0}")]
    Inference(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Job processing error: {0}")]
    Processing(String),
}

impl AppError {
    /// Errors raised by the generation endpoint or by reading its output.
    /// These are counted per record and never abort a shard.
    pub fn is_inference_failure(&self) -> bool {
        matches!(
            self,
            AppError::Inference(_)
                | AppError::LLMParsing(_)
                | AppError::Reqwest(_)
                | AppError::OpenAI(_)
        )
    }
}
