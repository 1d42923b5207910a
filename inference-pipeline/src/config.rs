use std::time::Duration;

use common::{
    error::AppError,
    storage::types::{job_details::InferenceEndpoint, user_settings::UserSettings},
    utils::config::{default_inference_path, AppConfig},
};
use serde_json::{Map, Value};

/// Process-wide defaults for talking to the generation endpoint.
#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub base_url: String,
    pub path: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub log_requests: bool,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            path: default_inference_path(),
            api_key: None,
            model: None,
            attempts: 1,
            retry_delay: Duration::from_millis(250),
            log_requests: false,
        }
    }
}

impl InferenceSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.inference_base_url.clone(),
            path: config.inference_path.clone(),
            api_key: config.inference_api_key.clone(),
            model: config.inference_model.clone(),
            attempts: config.inference_attempts(),
            retry_delay: Duration::from_millis(config.inference_retry_delay_ms),
            log_requests: config.log_inference_requests,
        }
    }
}

/// Per-call overrides, usually derived from a job or task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceConfig {
    pub base_url: Option<String>,
    pub path: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub parameters: Option<Map<String, Value>>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl InferenceConfig {
    /// Overrides for a stored job. Only external gateways replace the worker's
    /// own base URL, and they borrow the owner's API key.
    pub fn for_endpoint(endpoint: &InferenceEndpoint, owner_settings: Option<&UserSettings>) -> Self {
        if !endpoint.use_external_api {
            return Self {
                path: non_blank(Some(&endpoint.path)),
                model: non_blank(endpoint.model.as_deref()),
                parameters: endpoint.parameters.clone().filter(|p| !p.is_empty()),
                ..Self::default()
            };
        }

        Self {
            base_url: non_blank(Some(&endpoint.base_url)),
            path: non_blank(Some(&endpoint.path)),
            api_key: owner_settings.and_then(|s| non_blank(s.api_key.as_deref())),
            model: non_blank(endpoint.model.as_deref()),
            parameters: endpoint.parameters.clone().filter(|p| !p.is_empty()),
        }
    }

    /// Overrides for a task using the owner's custom gateway, task fields first.
    pub fn for_custom_gateway(
        base_url: Option<&str>,
        path: Option<&str>,
        model: Option<&str>,
        settings: &UserSettings,
    ) -> Option<Self> {
        let base_url = non_blank(base_url).or_else(|| non_blank(settings.base_url.as_deref()))?;
        Some(Self {
            base_url: Some(base_url),
            path: non_blank(path).or_else(|| non_blank(settings.path.as_deref())),
            api_key: non_blank(settings.api_key.as_deref()),
            model: non_blank(model).or_else(|| non_blank(settings.model.as_deref())),
            parameters: None,
        })
    }
}

/// Join base URL and path, defaulting the path and fixing its slashes.
pub fn build_url(settings: &InferenceSettings, config: &InferenceConfig) -> Result<String, AppError> {
    let base = config
        .base_url
        .as_deref()
        .or(Some(settings.base_url.as_str()))
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::Inference("inference base URL not configured".into()))?;
    let base = base.strip_suffix('/').unwrap_or(base);

    let path = config
        .path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(settings.path.as_str());

    if path.starts_with('/') {
        Ok(format!("{base}{path}"))
    } else {
        Ok(format!("{base}/{path}"))
    }
}
