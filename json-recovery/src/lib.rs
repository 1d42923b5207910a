//! Recovers a JSON value from free-form model output.
//!
//! The raw text is split into candidate substrings (see [`collect_candidates`])
//! and each candidate is run through the ordered [`STRATEGIES`]. The first
//! value that parses wins.

mod candidates;
mod repair;
mod scan;

pub use candidates::{collect_candidates, strip_code_fences};
pub use repair::{
    append_missing_closers, close_dangling_string, normalize, Strategy, STRATEGIES,
};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("response contained no text")]
    Empty,
    #[error("Failed to parse inference response as JSON ({candidates} candidates tried)")]
    Unparseable { candidates: usize },
}

fn first_success(candidate: &str) -> Option<Value> {
    STRATEGIES
        .iter()
        .find_map(|(_, strategy)| strategy(candidate).ok())
}

fn looks_like_json_document(text: &str) -> bool {
    let trimmed = text.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// Parse a JSON-encoded string once more; anything else is returned as is.
pub fn unwrap_nested_json(value: Value) -> Value {
    match value {
        Value::String(text) if looks_like_json_document(&text) => {
            first_success(text.trim()).unwrap_or(Value::String(text))
        }
        other => other,
    }
}

/// Extract the JSON value carried by `raw`.
pub fn recover_json(raw: &str) -> Result<Value, RecoveryError> {
    if raw.trim().is_empty() {
        return Err(RecoveryError::Empty);
    }

    let candidates = collect_candidates(raw);
    candidates
        .iter()
        .find_map(|candidate| first_success(candidate))
        .map(unwrap_nested_json)
        .ok_or(RecoveryError::Unparseable {
            candidates: candidates.len(),
        })
}
