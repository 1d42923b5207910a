use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use common::{error::AppError, utils::clock::Clock};
use rand::{rngs::StdRng, SeedableRng};
use serde_json::{json, Map, Value};
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{debug, info, warn};

use crate::{
    config::{build_url, InferenceConfig, InferenceSettings},
    envelope::extract_output,
    generator::{Generated, InferenceFailure, RecordGenerator},
    prompts::{
        conforming_record_message, record_system_message, schema_meta_schema,
        schema_system_message, schema_user_message,
    },
    request::{build_request_body, json_object_format, system_message, user_message},
    synthetic::post_process_record,
    transport::ChatTransport,
};

type Finisher = fn(Value) -> Result<Value, AppError>;

fn require_object(value: Value) -> Result<Value, AppError> {
    if value.is_object() {
        Ok(value)
    } else {
        Err(AppError::LLMParsing(
            "Expected a JSON object schema from the model".into(),
        ))
    }
}

fn accept_any(value: Value) -> Result<Value, AppError> {
    Ok(value)
}

fn schema_defaults() -> Map<String, Value> {
    let mut defaults = Map::new();
    defaults.insert("temperature".into(), json!(0.2));
    defaults.insert("max_tokens".into(), json!(1200));
    defaults
}

fn response_format_layer(schema: Option<&Value>) -> Map<String, Value> {
    let mut layer = Map::new();
    layer.insert("response_format".into(), json_object_format(schema));
    layer
}

/// Talks to the generation endpoint with bounded retries.
pub struct InferenceClient {
    transport: Arc<dyn ChatTransport>,
    settings: InferenceSettings,
    rng: Mutex<StdRng>,
    clock: Arc<dyn Clock>,
}

impl InferenceClient {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        settings: InferenceSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            settings,
            rng: Mutex::new(StdRng::from_entropy()),
            clock,
        }
    }

    /// Same as `new` but with a reproducible backfill RNG.
    pub fn with_seed(
        transport: Arc<dyn ChatTransport>,
        settings: InferenceSettings,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..Self::new(transport, settings, clock)
        }
    }

    pub fn settings(&self) -> &InferenceSettings {
        &self.settings
    }

    async fn attempt(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &Value,
        attempt: u32,
        finish: Finisher,
    ) -> Result<Value, AppError> {
        if self.settings.log_requests {
            info!(
                url,
                attempt,
                has_api_key = api_key.is_some(),
                body = %body,
                "Inference request"
            );
        }

        let outcome = match self.transport.post(url, api_key, body).await {
            Ok(envelope) => {
                if self.settings.log_requests {
                    info!(url, attempt, response = %envelope, "Inference response");
                }
                extract_output(&envelope).and_then(finish)
            }
            Err(err) => Err(err),
        };

        if let Err(err) = &outcome {
            warn!(url, attempt, error = %err, "Inference attempt failed");
        }
        outcome
    }

    async fn call(
        &self,
        config: &InferenceConfig,
        body: Value,
        finish: Finisher,
    ) -> Result<Generated<Value>, InferenceFailure> {
        let url = build_url(&self.settings, config).map_err(|err| InferenceFailure::new(1, err))?;
        let api_key = config
            .api_key
            .as_deref()
            .or(self.settings.api_key.as_deref())
            .filter(|k| !k.is_empty());

        let retries = usize::try_from(self.settings.attempts.saturating_sub(1)).unwrap_or(0);
        let strategy = FixedInterval::new(self.settings.retry_delay).take(retries);
        let attempts = AtomicU32::new(0);

        let result = Retry::spawn(strategy, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            self.attempt(&url, api_key, &body, attempt, finish)
        })
        .await;

        let used = attempts.load(Ordering::SeqCst);
        match result {
            Ok(value) => {
                debug!(url = %url, attempts = used, "Inference call succeeded");
                Ok(Generated {
                    value,
                    failed_attempts: used.saturating_sub(1),
                })
            }
            Err(error) => Err(InferenceFailure::new(used.max(1), error)),
        }
    }

    fn model<'a>(&'a self, config: &'a InferenceConfig) -> Option<&'a str> {
        config.model.as_deref().or(self.settings.model.as_deref())
    }
}

#[async_trait]
impl RecordGenerator for InferenceClient {
    async fn generate_schema(
        &self,
        prompt: &str,
        dataset_mode: bool,
        config: &InferenceConfig,
    ) -> Result<Generated<Value>, InferenceFailure> {
        let messages = vec![
            system_message(schema_system_message(dataset_mode)),
            user_message(schema_user_message(prompt)),
        ];
        let caller = config.parameters.clone().unwrap_or_default();
        let body = build_request_body(
            &messages,
            self.model(config),
            &[
                &schema_defaults(),
                &caller,
                &response_format_layer(Some(&schema_meta_schema())),
            ],
        )
        .map_err(|err| InferenceFailure::new(1, err))?;

        self.call(config, body, require_object).await
    }

    async fn generate_record(
        &self,
        instructions: &str,
        schema: Option<&Value>,
        dataset_mode: bool,
        config: &InferenceConfig,
    ) -> Result<Generated<Value>, InferenceFailure> {
        let mut messages = vec![
            system_message(record_system_message(dataset_mode)),
            user_message(instructions),
        ];
        if let Some(schema) = schema.filter(|s| s.is_object()) {
            messages.push(user_message(conforming_record_message(schema)));
        }

        let caller = config.parameters.clone().unwrap_or_default();
        let body = build_request_body(
            &messages,
            self.model(config),
            &[&caller, &response_format_layer(schema)],
        )
        .map_err(|err| InferenceFailure::new(1, err))?;

        let generated = self.call(config, body, accept_any).await?;
        let now = self.clock.now();
        let value = {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            post_process_record(generated.value, schema, &mut *rng, now)
        };

        Ok(Generated {
            value,
            failed_attempts: generated.failed_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::VecDeque, time::Duration};

    use chrono::Utc;
    use common::utils::clock::ManualClock;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct ScriptedTransport {
        responses: AsyncMutex<VecDeque<Result<Value, AppError>>>,
        calls: AsyncMutex<Vec<(String, Option<String>, Value)>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<Value, AppError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: AsyncMutex::new(responses.into()),
                calls: AsyncMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn post(
            &self,
            url: &str,
            api_key: Option<&str>,
            body: &Value,
        ) -> Result<Value, AppError> {
            self.calls
                .lock()
                .await
                .push((url.to_string(), api_key.map(str::to_string), body.clone()));
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Inference("no scripted response".into())))
        }
    }

    fn content(text: &str) -> Result<Value, AppError> {
        Ok(json!({"result": {"status": "ok", "FULL_OUTPUT": {"content": text}}}))
    }

    fn settings(attempts: u32) -> InferenceSettings {
        InferenceSettings {
            base_url: "http://inference.local/".into(),
            attempts,
            retry_delay: Duration::from_millis(0),
            ..Default::default()
        }
    }

    fn client(transport: Arc<ScriptedTransport>, attempts: u32) -> InferenceClient {
        InferenceClient::with_seed(
            transport,
            settings(attempts),
            Arc::new(ManualClock::new(Utc::now())),
            11,
        )
    }

    #[tokio::test]
    async fn schema_request_carries_defaults_and_meta_schema() {
        let transport = ScriptedTransport::new(vec![content(
            r#"{"type":"object","properties":{"name":{"type":"string"}}}"#,
        )]);
        let client = client(transport.clone(), 1);
        let config = InferenceConfig {
            parameters: json!({"temperature": 0.7}).as_object().cloned(),
            ..Default::default()
        };

        let schema = client
            .generate_schema("a customer", false, &config)
            .await
            .expect("schema");
        assert_eq!(schema.failed_attempts, 0);
        assert_eq!(schema.value["properties"]["name"]["type"], "string");

        let calls = transport.calls.lock().await;
        let (url, api_key, body) = &calls[0];
        assert_eq!(url, "http://inference.local/create_chat_completion");
        assert!(api_key.is_none());
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 1200);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["response_format"]["schema"]["required"], json!(["type", "properties"]));
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][1]["content"]
            .as_str()
            .is_some_and(|c| c.starts_with("a customer")));
    }

    #[tokio::test]
    async fn retry_mode_counts_wasted_attempts() {
        let transport = ScriptedTransport::new(vec![
            Err(AppError::Inference("Inference call failed with status 503".into())),
            content(r#"{"name": "Ada"}"#),
        ]);
        let client = client(transport.clone(), 2);

        let record = client
            .generate_record("a person", None, false, &InferenceConfig::default())
            .await
            .expect("record");
        assert_eq!(record.failed_attempts, 1);
        assert_eq!(record.value, json!({"name": "Ada"}));
        assert_eq!(transport.calls.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn single_attempt_failure_reports_one_attempt() {
        let transport = ScriptedTransport::new(vec![content("no json here"), content("{}")]);
        let client = client(transport.clone(), 1);

        let failure = client
            .generate_record("a person", None, false, &InferenceConfig::default())
            .await
            .expect_err("parse failure");
        assert_eq!(failure.failed_attempts, 1);
        assert!(matches!(failure.error, AppError::LLMParsing(_)));
        assert_eq!(transport.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_every_attempt() {
        let transport = ScriptedTransport::new(vec![
            Ok(json!({"result": {"error": "overloaded"}})),
            Ok(json!({"result": {"status": "failed", "FULL_OUTPUT": {"content": "{}"}}})),
        ]);
        let client = client(transport, 2);

        let failure = client
            .generate_schema("x", false, &InferenceConfig::default())
            .await
            .expect_err("failure");
        assert_eq!(failure.failed_attempts, 2);
        assert!(failure.error.is_inference_failure());
    }

    #[tokio::test]
    async fn non_object_schema_is_rejected() {
        let transport = ScriptedTransport::new(vec![content("[1, 2, 3]")]);
        let failure = client(transport, 1)
            .generate_schema("x", false, &InferenceConfig::default())
            .await
            .expect_err("failure");
        assert!(matches!(failure.error, AppError::LLMParsing(_)));
    }

    #[tokio::test]
    async fn record_request_binds_schema_and_backfills() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}
        });
        let transport = ScriptedTransport::new(vec![content(r#"{"name": "Ada",}"#)]);
        let client = client(transport.clone(), 1);
        let config = InferenceConfig {
            base_url: Some("https://gw.example.com".into()),
            path: Some("chat".into()),
            api_key: Some("secret".into()),
            model: Some("tiny".into()),
            parameters: None,
        };

        let record = client
            .generate_record("a person", Some(&schema), true, &config)
            .await
            .expect("record");
        assert_eq!(record.value["name"], "Ada");
        assert!(record.value["age"].is_i64());

        let calls = transport.calls.lock().await;
        let (url, api_key, body) = &calls[0];
        assert_eq!(url, "https://gw.example.com/chat");
        assert_eq!(api_key.as_deref(), Some("secret"));
        assert_eq!(body["model"], "tiny");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["response_format"]["schema"], schema);
    }

    #[tokio::test]
    async fn missing_base_url_fails_without_calling() {
        let transport = ScriptedTransport::new(vec![content("{}")]);
        let client = InferenceClient::new(
            transport.clone(),
            InferenceSettings::default(),
            Arc::new(ManualClock::new(Utc::now())),
        );

        let failure = client
            .generate_record("x", None, false, &InferenceConfig::default())
            .await
            .expect_err("failure");
        assert_eq!(failure.failed_attempts, 1);
        assert!(transport.calls.lock().await.is_empty());
    }
}
