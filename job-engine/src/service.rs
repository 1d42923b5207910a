use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::types::{
        job::{Job, JobStatus},
        job_details::{InferenceEndpoint, JobDetails},
        metrics::{Metrics, MetricsDelta},
        peer_shard::PeerShardState,
        user_settings::UserSettings,
    },
    utils::{
        clock::elapsed_ms,
        config::{default_inference_path, AppConfig},
    },
};
use inference_pipeline::InferenceConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    context::EngineContext,
    export::{merge_ordered, records_from_jsonl, render, ExportFormat},
    job_index::{index_job, jobs_for_peer, jobs_for_user, JobSummary},
    lifecycle::{record_metrics, JobProgress},
    schema::{sanitize_schema, validate_schema},
    splitter::split_assignments,
};

const MAX_PROMPT_CHARS: usize = 4000;
const MAX_TITLE_CHARS: usize = 80;

/// Limits and defaults the job service applies to every request.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub max_records_per_job: u32,
    pub peers: Vec<String>,
    pub default_base_url: String,
    pub default_path: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_records_per_job: 200,
            peers: vec!["peer-1".to_string()],
            default_base_url: String::new(),
            default_path: default_inference_path(),
        }
    }
}

impl ServiceSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_records_per_job: config.max_records_per_job,
            peers: config.peer_list(),
            default_base_url: config.inference_base_url.clone(),
            default_path: config.inference_path.clone(),
        }
    }
}

/// Which endpoint a job should call. Blank fields fall back to the owner's
/// saved settings for external gateways and to the defaults otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRequest {
    #[serde(default)]
    pub use_external_api: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftRequest {
    pub owner: String,
    pub prompt: String,
    pub total_records: u32,
    pub dataset_mode: bool,
    pub inference: EndpointRequest,
}

/// Generated schema awaiting confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub owner: String,
    pub title: String,
    pub description: String,
    pub instructions: String,
    pub schema: Value,
    pub total_records: u32,
    pub dataset_mode: bool,
    #[serde(default)]
    pub inference: EndpointRequest,
    pub schema_generated_at: DateTime<Utc>,
    pub schema_duration_ms: u64,
    pub schema_refreshes: u32,
    #[serde(default)]
    pub failed_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmRequest {
    pub draft: Draft,
    /// Overrides the configured peer list.
    pub peers: Option<Vec<String>>,
    /// Overrides the endpoint chosen at draft time.
    pub inference: Option<EndpointRequest>,
}

/// A job with its shards and aggregate progress.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job: Job,
    pub shards: Vec<PeerShardState>,
    pub progress: JobProgress,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn derive_title(schema: &Value, prompt: &str) -> String {
    if let Some(title) = non_blank(schema.get("title").and_then(Value::as_str)) {
        return title;
    }
    let first_line = prompt.lines().next().unwrap_or_default().trim();
    first_line.chars().take(MAX_TITLE_CHARS).collect()
}

fn new_job_id(now: DateTime<Utc>) -> String {
    let suffix: [u8; 3] = rand::thread_rng().gen();
    let hex: String = suffix.iter().map(|b| format!("{b:02x}")).collect();
    format!("job_{}_{hex}", now.timestamp_millis())
}

fn validate_peers(peers: &[String]) -> Result<Vec<String>, AppError> {
    let cleaned: Vec<String> = peers.iter().map(|p| p.trim().to_string()).collect();
    if cleaned.is_empty() {
        return Err(AppError::Validation("at least one peer is required".into()));
    }
    if cleaned.iter().any(String::is_empty) {
        return Err(AppError::Validation("peer identifiers must not be blank".into()));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = cleaned.iter().find(|p| !seen.insert(p.as_str())) {
        return Err(AppError::Validation(format!("duplicate peer: {duplicate}")));
    }
    Ok(cleaned)
}

fn validate_external_base_url(url: &str) -> Result<(), AppError> {
    let lower = url.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .ok_or_else(|| AppError::Validation("inference base URL must be http(s)".into()))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(AppError::Validation("inference base URL has no host".into()));
    }
    Ok(())
}

/// Draft, confirm, inspect and export jobs.
pub struct JobService {
    ctx: EngineContext,
    settings: ServiceSettings,
}

impl JobService {
    pub fn new(ctx: EngineContext, settings: ServiceSettings) -> Self {
        Self { ctx, settings }
    }

    fn check_record_count(&self, total_records: u32) -> Result<(), AppError> {
        if total_records == 0 || total_records > self.settings.max_records_per_job {
            return Err(AppError::Validation(format!(
                "record count must be between 1 and {}",
                self.settings.max_records_per_job
            )));
        }
        Ok(())
    }

    /// Resolve the stored endpoint for `owner`, plus the settings that supply
    /// its API key when an external gateway is used.
    async fn resolve_endpoint(
        &self,
        owner: &str,
        request: &EndpointRequest,
    ) -> Result<(InferenceEndpoint, Option<UserSettings>), AppError> {
        if !request.use_external_api {
            return Ok((
                InferenceEndpoint {
                    use_external_api: false,
                    base_url: self.settings.default_base_url.clone(),
                    path: self.settings.default_path.clone(),
                    model: None,
                    parameters: None,
                },
                None,
            ));
        }

        let saved = UserSettings::read(&*self.ctx.state, owner).await?;
        let base_url = non_blank(request.base_url.as_deref())
            .or_else(|| non_blank(saved.base_url.as_deref()))
            .ok_or_else(|| {
                AppError::Validation("external inference requires a base URL".into())
            })?;
        validate_external_base_url(&base_url)?;

        let path = non_blank(request.path.as_deref())
            .or_else(|| non_blank(saved.path.as_deref()))
            .unwrap_or_else(|| self.settings.default_path.clone());
        if path.starts_with("http") {
            return Err(AppError::Validation(
                "inference path must be relative, not a URL".into(),
            ));
        }

        let endpoint = InferenceEndpoint {
            use_external_api: true,
            base_url,
            path,
            model: non_blank(request.model.as_deref()).or_else(|| non_blank(saved.model.as_deref())),
            parameters: request.parameters.clone().filter(|p| !p.is_empty()),
        };
        Ok((endpoint, Some(saved)))
    }

    async fn generate_schema(
        &self,
        owner: &str,
        prompt: &str,
        dataset_mode: bool,
        endpoint: &EndpointRequest,
    ) -> Result<(Value, u64, u32, DateTime<Utc>), AppError> {
        let (resolved, saved) = self.resolve_endpoint(owner, endpoint).await?;
        let config = InferenceConfig::for_endpoint(&resolved, saved.as_ref());

        let started = self.ctx.clock.now();
        let generated = self
            .ctx
            .generator
            .generate_schema(prompt, dataset_mode, &config)
            .await
            .map_err(|failure| {
                warn!(
                    failed_attempts = failure.failed_attempts,
                    error = %failure.error,
                    "schema generation failed"
                );
                failure.error
            })?;
        let finished = self.ctx.clock.now();

        Ok((
            generated.value,
            elapsed_ms(started, finished),
            generated.failed_attempts,
            finished,
        ))
    }

    /// Generate the schema for a prompt. No job state is written.
    #[tracing::instrument(skip_all, fields(owner = %request.owner, dataset_mode = request.dataset_mode))]
    pub async fn draft(&self, request: DraftRequest) -> Result<Draft, AppError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::Validation("prompt is required".into()));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(AppError::Validation(format!(
                "prompt is longer than {MAX_PROMPT_CHARS} characters"
            )));
        }
        self.check_record_count(request.total_records)?;

        let (schema, schema_duration_ms, failed_attempts, generated_at) = self
            .generate_schema(&request.owner, prompt, request.dataset_mode, &request.inference)
            .await?;
        info!(schema_duration_ms, failed_attempts, "schema drafted");

        Ok(Draft {
            owner: request.owner,
            title: derive_title(&schema, prompt),
            description: prompt.to_string(),
            instructions: prompt.to_string(),
            schema,
            total_records: request.total_records,
            dataset_mode: request.dataset_mode,
            inference: request.inference,
            schema_generated_at: generated_at,
            schema_duration_ms,
            schema_refreshes: 0,
            failed_attempts,
        })
    }

    /// Regenerate the schema of an unconfirmed draft.
    pub async fn refresh_draft(&self, draft: Draft) -> Result<Draft, AppError> {
        let (schema, schema_duration_ms, failed_attempts, generated_at) = self
            .generate_schema(
                &draft.owner,
                &draft.instructions,
                draft.dataset_mode,
                &draft.inference,
            )
            .await?;

        Ok(Draft {
            title: derive_title(&schema, &draft.instructions),
            schema,
            schema_generated_at: generated_at,
            schema_duration_ms,
            schema_refreshes: draft.schema_refreshes.saturating_add(1),
            failed_attempts: draft.failed_attempts.saturating_add(failed_attempts),
            ..draft
        })
    }

    /// Validate a draft and register it as a queued job with one shard per peer.
    #[tracing::instrument(skip_all, fields(owner = %request.draft.owner))]
    pub async fn confirm(&self, request: ConfirmRequest) -> Result<Job, AppError> {
        let ConfirmRequest {
            draft,
            peers,
            inference,
        } = request;

        let sanitized = sanitize_schema(&draft.schema);
        if !sanitized.warnings.is_empty() {
            warn!(warnings = ?sanitized.warnings, "schema sanitized");
        }
        validate_schema(&sanitized.schema)?;
        self.check_record_count(draft.total_records)?;
        let peers = validate_peers(peers.as_deref().unwrap_or(self.settings.peers.as_slice()))?;

        let endpoint_request = inference.unwrap_or_else(|| draft.inference.clone());
        let (endpoint, _) = self.resolve_endpoint(&draft.owner, &endpoint_request).await?;

        let now = self.ctx.clock.now();
        let job_id = new_job_id(now);
        let assignments = split_assignments(draft.total_records, &peers);

        let details = JobDetails {
            id: job_id.clone(),
            owner: draft.owner.clone(),
            description: draft.description.clone(),
            instructions: draft.instructions.clone(),
            schema: sanitized.schema,
            inference: endpoint,
            dataset_mode: draft.dataset_mode,
            created_at: now,
            schema_generated_at: draft.schema_generated_at,
            schema_duration_ms: draft.schema_duration_ms,
            schema_refreshes: draft.schema_refreshes,
        };
        let job_details_cid = details.upload(&*self.ctx.blobs).await?;

        let state = &*self.ctx.state;
        for assignment in &assignments {
            PeerShardState::new(assignment.peer_id.clone(), assignment.range)
                .save(state, &job_id)
                .await?;
        }

        let job = Job {
            id: job_id.clone(),
            owner: draft.owner,
            title: draft.title,
            status: JobStatus::Queued,
            total_records: draft.total_records,
            dataset_mode: draft.dataset_mode,
            peer_count: peers.len(),
            peers,
            total_generated: 0,
            total_ok: 0,
            total_failed: 0,
            failed_attempts: 0,
            job_details_cid,
            created_at: now,
            schema_generated_at: draft.schema_generated_at,
            job_started_at: None,
            job_finished_at: None,
            schema_duration_ms: draft.schema_duration_ms,
            records_duration_ms: None,
            schema_refreshes: draft.schema_refreshes,
            updated_at: now,
        };
        job.save(state).await?;
        index_job(state, &job).await?;

        record_metrics(
            state,
            MetricsDelta {
                total_jobs: 1,
                total_records_requested: i64::from(job.total_records),
                last_job_at: Some(now),
                ..Default::default()
            },
        )
        .await;

        info!(
            %job_id,
            total_records = job.total_records,
            peer_count = job.peer_count,
            "job queued"
        );
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobView, AppError> {
        let state = &*self.ctx.state;
        let job = Job::get(state, job_id).await?;
        let shards = PeerShardState::load_all(state, job_id, &job.peers).await?;
        let progress = JobProgress::from_shards(&shards);
        Ok(JobView {
            job,
            shards,
            progress,
        })
    }

    pub async fn list_jobs_for_peer(&self, peer_id: &str) -> Result<Vec<Job>, AppError> {
        jobs_for_peer(&*self.ctx.state, peer_id).await
    }

    pub async fn list_jobs_for_user(&self, owner: &str) -> Result<Vec<JobSummary>, AppError> {
        jobs_for_user(&*self.ctx.state, owner).await
    }

    /// Successful records of a finished job, ordered by index.
    pub async fn export_records(&self, job_id: &str) -> Result<Vec<Value>, AppError> {
        let view = self.get_job(job_id).await?;
        if view.job.status != JobStatus::Succeeded {
            return Err(AppError::NotYetComplete(format!(
                "job {job_id} is {}",
                view.job.status
            )));
        }

        let mut records = Vec::new();
        for shard in &view.shards {
            let Some(cid) = shard.result_cid.as_deref().filter(|c| !c.is_empty()) else {
                continue;
            };
            let raw = self.ctx.blobs.download(cid).await?;
            records.extend(records_from_jsonl(&String::from_utf8_lossy(&raw)));
        }
        Ok(merge_ordered(records))
    }

    pub async fn export(&self, job_id: &str, format: ExportFormat) -> Result<String, AppError> {
        render(&self.export_records(job_id).await?, format)
    }

    pub async fn metrics(&self) -> Result<Metrics, AppError> {
        Metrics::get_current(&*self.ctx.state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use common::{
        storage::{kv::MemoryStateStore, store::StorageManager},
        utils::clock::ManualClock,
    };
    use inference_pipeline::{Generated, InferenceFailure, RecordGenerator};
    use serde_json::json;
    use tokio::sync::Mutex;

    struct SchemaOnly {
        schema: Value,
        configs: Mutex<Vec<InferenceConfig>>,
    }

    #[async_trait]
    impl RecordGenerator for SchemaOnly {
        async fn generate_schema(
            &self,
            _prompt: &str,
            _dataset_mode: bool,
            config: &InferenceConfig,
        ) -> Result<Generated<Value>, InferenceFailure> {
            self.configs.lock().await.push(config.clone());
            Ok(Generated {
                value: self.schema.clone(),
                failed_attempts: 1,
            })
        }

        async fn generate_record(
            &self,
            _instructions: &str,
            _schema: Option<&Value>,
            _dataset_mode: bool,
            _config: &InferenceConfig,
        ) -> Result<Generated<Value>, InferenceFailure> {
            Err(InferenceFailure::new(
                1,
                AppError::Inference("not used here".into()),
            ))
        }
    }

    fn service(schema: Value) -> (JobService, Arc<MemoryStateStore>, Arc<SchemaOnly>) {
        let state = Arc::new(MemoryStateStore::new());
        let generator = Arc::new(SchemaOnly {
            schema,
            configs: Mutex::new(Vec::new()),
        });
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().expect("date");
        let ctx = EngineContext::new(
            state.clone(),
            Arc::new(StorageManager::memory()),
            generator.clone(),
            Arc::new(ManualClock::new(start)),
        );
        let settings = ServiceSettings {
            max_records_per_job: 50,
            peers: vec!["p1".into(), "p2".into(), "p3".into()],
            default_base_url: "http://inference.local".into(),
            default_path: "/create_chat_completion".into(),
        };
        (JobService::new(ctx, settings), state, generator)
    }

    fn customer_schema() -> Value {
        json!({
            "title": "Customer",
            "type": "object",
            "properties": {
                "name": {"type": "string", "examples": ["Ada"]},
                "age": {"type": "integer"}
            },
            "required": ["name", "age"]
        })
    }

    fn draft_request(total_records: u32) -> DraftRequest {
        DraftRequest {
            owner: "alice".into(),
            prompt: "A retail customer".into(),
            total_records,
            dataset_mode: false,
            inference: EndpointRequest::default(),
        }
    }

    #[tokio::test]
    async fn draft_then_confirm_creates_job_and_shards() {
        let (service, state, _) = service(customer_schema());
        let draft = service.draft(draft_request(10)).await.expect("draft");
        assert_eq!(draft.title, "Customer");
        assert_eq!(draft.failed_attempts, 1);

        let job = service
            .confirm(ConfirmRequest {
                draft,
                peers: None,
                inference: None,
            })
            .await
            .expect("confirm");
        assert!(job.id.starts_with("job_1704164645000_"));
        assert_eq!(job.id.len(), "job_1704164645000_".len() + 6);
        assert_eq!(job.status, JobStatus::Queued);

        let view = service.get_job(&job.id).await.expect("view");
        let sizes: Vec<u32> = view.shards.iter().map(|s| s.assigned).collect();
        assert_eq!(sizes, vec![4, 3, 3]);

        let details = JobDetails::download(&*service.ctx.blobs, &job.job_details_cid, &job.id)
            .await
            .expect("details");
        assert!(details.schema["properties"]["name"].get("examples").is_none());
        assert_eq!(details.inference.base_url, "http://inference.local");

        let peer_jobs = service.list_jobs_for_peer("p2").await.expect("peer jobs");
        assert_eq!(peer_jobs.len(), 1);
        assert_eq!(service.list_jobs_for_user("alice").await.expect("user").len(), 1);

        let metrics = Metrics::get_current(&*state).await.expect("metrics");
        assert_eq!(metrics.total_jobs, 1);
        assert_eq!(metrics.total_records_requested, 10);
        assert_eq!(metrics.active_jobs, 0);
    }

    #[tokio::test]
    async fn refresh_counts_regenerations() {
        let (service, _, _) = service(customer_schema());
        let draft = service.draft(draft_request(3)).await.expect("draft");
        let refreshed = service.refresh_draft(draft).await.expect("refresh");
        assert_eq!(refreshed.schema_refreshes, 1);
        assert_eq!(refreshed.failed_attempts, 2);
    }

    #[tokio::test]
    async fn invalid_requests_leave_no_state() {
        let (service, state, _) = service(json!({"type": "array"}));
        assert!(matches!(
            service.draft(draft_request(0)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.draft(draft_request(51)).await,
            Err(AppError::Validation(_))
        ));

        let draft = service.draft(draft_request(5)).await.expect("draft");
        let result = service
            .confirm(ConfirmRequest {
                draft: draft.clone(),
                peers: None,
                inference: None,
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));

        let fixed = Draft {
            schema: customer_schema(),
            ..draft
        };
        for peers in [vec![], vec!["p1".to_string(), "p1".to_string()]] {
            let result = service
                .confirm(ConfirmRequest {
                    draft: fixed.clone(),
                    peers: Some(peers),
                    inference: None,
                })
                .await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }

        assert!(service.list_jobs_for_user("alice").await.expect("list").is_empty());
        assert_eq!(Metrics::get_current(&*state).await.expect("metrics").total_jobs, 0);
    }

    #[tokio::test]
    async fn external_gateway_uses_saved_settings() {
        let (service, state, generator) = service(customer_schema());
        UserSettings::save(
            &*state,
            "alice",
            UserSettings {
                base_url: Some("https://gw.example.com".into()),
                api_key: Some("secret".into()),
                model: Some("m1".into()),
                path: None,
            },
        )
        .await
        .expect("settings");

        let mut request = draft_request(2);
        request.inference.use_external_api = true;
        let draft = service.draft(request).await.expect("draft");

        let configs = generator.configs.lock().await;
        assert_eq!(configs[0].base_url.as_deref(), Some("https://gw.example.com"));
        assert_eq!(configs[0].api_key.as_deref(), Some("secret"));
        assert_eq!(configs[0].model.as_deref(), Some("m1"));
        drop(configs);

        let bad = EndpointRequest {
            use_external_api: true,
            base_url: Some("ftp://files.example.com".into()),
            ..Default::default()
        };
        let result = service
            .confirm(ConfirmRequest {
                draft,
                peers: None,
                inference: Some(bad),
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn export_waits_for_success() {
        let (service, _, _) = service(customer_schema());
        let draft = service.draft(draft_request(2)).await.expect("draft");
        let job = service
            .confirm(ConfirmRequest {
                draft,
                peers: Some(vec!["p1".into()]),
                inference: None,
            })
            .await
            .expect("confirm");

        assert!(matches!(
            service.export(&job.id, ExportFormat::Json).await,
            Err(AppError::NotYetComplete(_))
        ));
        assert!(matches!(
            service.get_job("job_missing").await,
            Err(AppError::NotFound(_))
        ));
    }
}
