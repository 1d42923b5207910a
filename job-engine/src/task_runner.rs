//! Single-process generation: one schema, then every record in order.

use common::{
    error::AppError,
    storage::types::{
        job::JobStatus,
        metrics::MetricsDelta,
        peer_shard::RecordError,
        task::{PhaseStatus, Task, TaskStep},
        user_settings::UserSettings,
    },
};
use inference_pipeline::InferenceConfig;
use tracing::{info, warn};

use crate::{
    context::EngineContext,
    export::{render, ExportFormat},
    lifecycle::record_metrics,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRequest {
    pub owner: String,
    pub prompt: String,
    pub count: u32,
    pub dataset_mode: bool,
    pub use_custom_inference: bool,
    pub inference_base_url: Option<String>,
    pub inference_path: Option<String>,
    pub inference_model: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct TaskRunner {
    ctx: EngineContext,
    max_records_per_job: u32,
}

impl TaskRunner {
    pub fn new(ctx: EngineContext, max_records_per_job: u32) -> Self {
        Self {
            ctx,
            max_records_per_job: max_records_per_job.max(1),
        }
    }

    /// Store a queued task. The count is clamped to `1..=max_records_per_job`.
    pub async fn create_task(&self, request: TaskRequest) -> Result<Task, AppError> {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::Validation("prompt is required".into()));
        }

        let inference_path = non_blank(request.inference_path);
        if inference_path.as_deref().is_some_and(|p| p.starts_with("http")) {
            return Err(AppError::Validation(
                "inference path must be relative, not a URL".into(),
            ));
        }
        let inference_base_url = non_blank(request.inference_base_url);
        if request.use_custom_inference {
            let saved = UserSettings::read(&*self.ctx.state, &request.owner).await?;
            if inference_base_url.is_none() && non_blank(saved.base_url).is_none() {
                return Err(AppError::Validation(
                    "custom inference requires a base URL".into(),
                ));
            }
        }

        let now = self.ctx.clock.now();
        let task = Task {
            id: format!("task_{}", now.timestamp_millis()),
            owner: request.owner,
            prompt,
            count: request.count.clamp(1, self.max_records_per_job),
            dataset_mode: request.dataset_mode,
            use_custom_inference: request.use_custom_inference,
            inference_base_url,
            inference_path,
            inference_model: non_blank(request.inference_model),
            created_at: now,
            started_at: None,
            finished_at: None,
            status: JobStatus::Queued,
            step: TaskStep::Schema,
            schema_status: PhaseStatus::Pending,
            schema: None,
            schema_error: None,
            completed: 0,
            failures: 0,
            results: Vec::new(),
            errors: Vec::new(),
        };
        task.persist(&*self.ctx.state).await?;
        Ok(task)
    }

    async fn inference_config(&self, task: &Task) -> Result<InferenceConfig, AppError> {
        if !task.use_custom_inference {
            return Ok(InferenceConfig::default());
        }
        let saved = UserSettings::read(&*self.ctx.state, &task.owner).await?;
        InferenceConfig::for_custom_gateway(
            task.inference_base_url.as_deref(),
            task.inference_path.as_deref(),
            task.inference_model.as_deref(),
            &saved,
        )
        .ok_or_else(|| AppError::Validation("custom inference requires a base URL".into()))
    }

    /// Run a queued task to completion. Per-record failures are recorded on
    /// the task; only store errors are returned.
    #[tracing::instrument(skip_all, fields(task_id = %task.id, count = task.count))]
    pub async fn run_task(&self, mut task: Task) -> Result<Task, AppError> {
        let state = &*self.ctx.state;
        let started = self.ctx.clock.now();

        task.start(started)?;
        task.persist(state).await?;
        record_metrics(
            state,
            MetricsDelta {
                total_jobs: 1,
                total_records_requested: i64::from(task.count),
                active_jobs: 1,
                last_job_at: Some(started),
                ..Default::default()
            },
        )
        .await;

        let schema = match self.inference_config(&task).await {
            Ok(config) => self
                .ctx
                .generator
                .generate_schema(&task.prompt, task.dataset_mode, &config)
                .await
                .map(|generated| (config, generated))
                .map_err(|failure| (failure.failed_attempts.max(1), failure.error)),
            Err(err) => Err((1, err)),
        };

        let (config, schema) = match schema {
            Ok((config, generated)) => {
                task.failures = task.failures.saturating_add(generated.failed_attempts);
                (config, generated.value)
            }
            Err((failed_attempts, err)) => {
                return self.fail_schema(task, failed_attempts, &err).await;
            }
        };

        task.schema = Some(schema.clone());
        task.schema_status = PhaseStatus::Succeeded;
        task.step = TaskStep::Records;
        task.persist(state).await?;

        for index in 0..task.count {
            match self
                .ctx
                .generator
                .generate_record(&task.prompt, Some(&schema), task.dataset_mode, &config)
                .await
            {
                Ok(generated) => {
                    task.results.push(generated.value);
                    task.completed = task.completed.saturating_add(1);
                    task.failures = task.failures.saturating_add(generated.failed_attempts);
                    record_metrics(
                        state,
                        MetricsDelta {
                            total_records_generated: 1,
                            ..Default::default()
                        },
                    )
                    .await;
                }
                Err(failure) => {
                    warn!(index, error = %failure.error, "task record failed");
                    task.failures = task.failures.saturating_add(failure.failed_attempts.max(1));
                    task.errors.push(RecordError {
                        index: i64::from(index),
                        message: failure.error.to_string(),
                    });
                }
            }
            task.persist(state).await?;
        }

        let succeeded = task.processed() == task.count;
        let finished = self.ctx.clock.now();
        task.step = TaskStep::Completed;
        if succeeded {
            task.succeed(finished)?;
        } else {
            task.fail(finished)?;
        }
        task.persist(state).await?;
        record_metrics(
            state,
            MetricsDelta {
                active_jobs: -1,
                failed_jobs: i64::from(!succeeded),
                ..Default::default()
            },
        )
        .await;

        info!(
            completed = task.completed,
            failures = task.failures,
            status = %task.status,
            "task finished"
        );
        Ok(task)
    }

    async fn fail_schema(
        &self,
        mut task: Task,
        failed_attempts: u32,
        err: &AppError,
    ) -> Result<Task, AppError> {
        let state = &*self.ctx.state;
        let message = err.to_string();
        warn!(failed_attempts, error = %message, "task schema generation failed");

        task.failures = task.failures.saturating_add(failed_attempts);
        task.schema_error = Some(message.clone());
        task.schema_status = PhaseStatus::Failed;
        task.errors.push(RecordError { index: -1, message });
        task.fail(self.ctx.clock.now())?;
        task.persist(state).await?;

        record_metrics(
            state,
            MetricsDelta {
                active_jobs: -1,
                failed_jobs: 1,
                ..Default::default()
            },
        )
        .await;
        Ok(task)
    }

    pub async fn get_task(&self, owner: &str, task_id: &str) -> Result<Task, AppError> {
        Task::get(&*self.ctx.state, owner, task_id).await
    }

    pub async fn list_tasks(&self, owner: &str) -> Result<Vec<Task>, AppError> {
        Task::list(&*self.ctx.state, owner).await
    }

    /// Export a task's records. Partial results of a failed task are allowed.
    pub async fn export(
        &self,
        owner: &str,
        task_id: &str,
        format: ExportFormat,
    ) -> Result<String, AppError> {
        let task = self.get_task(owner, task_id).await?;
        if task.status != JobStatus::Succeeded && task.results.is_empty() {
            return Err(AppError::NotYetComplete(format!(
                "task {task_id} has no results yet"
            )));
        }
        render(&task.results, format)
    }
}
