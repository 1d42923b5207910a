mod bootstrap;
mod cli;

use std::{path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use common::{
    storage::types::{job::JobStatus, user_settings::UserSettings},
    utils::config::{get_config, AppConfig},
};
use job_engine::{
    worker::PollOutcome, ConfirmRequest, Draft, DraftRequest, EngineContext, ExportFormat,
    JobService, ServiceSettings, ShardWorker, TaskRequest, TaskRunner, WorkerConfig,
};
use serde::Serialize;
use tracing::info;

use cli::{Cli, Command, OutputArgs, PromptArgs};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn write_output(body: &str, out: Option<&Path>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            tokio::fs::write(path, body)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Export written");
        }
        None => println!("{body}"),
    }
    Ok(())
}

async fn read_draft(path: &Path) -> anyhow::Result<Draft> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading draft {}", path.display()))?;
    Ok(serde_json::from_slice(&raw)?)
}

async fn write_draft(path: &Path, draft: &Draft) -> anyhow::Result<()> {
    tokio::fs::write(path, serde_json::to_vec_pretty(draft)?).await?;
    info!(path = %path.display(), title = %draft.title, "Draft saved");
    Ok(())
}

fn draft_request(prompt: PromptArgs, endpoint: cli::EndpointArgs) -> DraftRequest {
    DraftRequest {
        owner: prompt.owner,
        prompt: prompt.prompt,
        total_records: prompt.count,
        dataset_mode: prompt.dataset,
        inference: endpoint.into(),
    }
}

/// Run a freshly confirmed job on this process until it is terminal.
async fn run_locally(
    ctx: &EngineContext,
    config: &AppConfig,
    service: &JobService,
    job_id: &str,
) -> anyhow::Result<JobStatus> {
    let worker = ShardWorker::new(ctx.clone(), WorkerConfig::from_app_config(config));
    loop {
        let outcome = worker.poll_once().await?;
        let status = service.get_job(job_id).await?.job.status;
        if status.is_terminal() {
            return Ok(status);
        }
        if outcome == PollOutcome::Idle {
            bail!("job {job_id} is {status} but this peer has nothing left to run");
        }
    }
}

async fn export_job(
    service: &JobService,
    job_id: &str,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    let body = service
        .export(job_id, ExportFormat::from(output.format))
        .await?;
    write_output(&body, output.out.as_deref()).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_tracing();

    let cli = Cli::parse();
    let config = get_config()?;
    let ctx = bootstrap::build_context(&config).await?;
    let service = JobService::new(ctx.clone(), ServiceSettings::from_app_config(&config));
    let tasks = TaskRunner::new(ctx.clone(), config.max_records_per_job);

    match cli.command {
        Command::Draft {
            prompt,
            endpoint,
            out,
        } => {
            let draft = service.draft(draft_request(prompt, endpoint)).await?;
            write_draft(&out, &draft).await?;
            print_json(&draft)?;
        }
        Command::Refresh { draft } => {
            let refreshed = service.refresh_draft(read_draft(&draft).await?).await?;
            write_draft(&draft, &refreshed).await?;
            print_json(&refreshed)?;
        }
        Command::Confirm { draft, peers } => {
            let job = service
                .confirm(ConfirmRequest {
                    draft: read_draft(&draft).await?,
                    peers,
                    inference: None,
                })
                .await?;
            println!("{}", job.id);
        }
        Command::Status { job_id } => print_json(&service.get_job(&job_id).await?)?,
        Command::Jobs { owner, peer } => match (owner, peer) {
            (_, Some(peer)) => print_json(&service.list_jobs_for_peer(&peer).await?)?,
            (owner, None) => {
                let owner = owner.unwrap_or_else(|| "local".to_string());
                print_json(&service.list_jobs_for_user(&owner).await?)?;
            }
        },
        Command::Export { job_id, output } => export_job(&service, &job_id, &output).await?,
        Command::Generate {
            prompt,
            endpoint,
            output,
        } => {
            let draft = service.draft(draft_request(prompt, endpoint)).await?;
            let job = service
                .confirm(ConfirmRequest {
                    draft,
                    peers: Some(vec![config.peer_id.clone()]),
                    inference: None,
                })
                .await?;
            info!(job_id = %job.id, "Running job locally");

            match run_locally(&ctx, &config, &service, &job.id).await? {
                JobStatus::Succeeded => export_job(&service, &job.id, &output).await?,
                status => return Err(anyhow!("job {} ended as {status}", job.id)),
            }
        }
        Command::Task { prompt, endpoint } => {
            let task = tasks
                .create_task(TaskRequest {
                    owner: prompt.owner,
                    prompt: prompt.prompt,
                    count: prompt.count,
                    dataset_mode: prompt.dataset,
                    use_custom_inference: endpoint.external,
                    inference_base_url: endpoint.base_url,
                    inference_path: endpoint.path,
                    inference_model: endpoint.model,
                })
                .await?;
            print_json(&tasks.run_task(task).await?)?;
        }
        Command::Tasks { owner } => print_json(&tasks.list_tasks(&owner).await?)?,
        Command::TaskExport {
            task_id,
            owner,
            output,
        } => {
            let body = tasks
                .export(&owner, &task_id, ExportFormat::from(output.format))
                .await?;
            write_output(&body, output.out.as_deref()).await?;
        }
        Command::Settings {
            owner,
            base_url,
            api_key,
            model,
            path,
        } => {
            let state = &*ctx.state;
            let update = UserSettings {
                base_url,
                api_key,
                model,
                path,
            };
            let settings = if update == UserSettings::default() {
                UserSettings::read(state, &owner).await?
            } else {
                UserSettings::save(state, &owner, update).await?
            };
            print_json(&settings.public_view())?;
        }
        Command::Metrics => print_json(&service.metrics().await?)?,
    }

    Ok(())
}
