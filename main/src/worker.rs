mod bootstrap;

use common::utils::config::get_config;
use job_engine::{run_worker_loop, WorkerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let config = get_config()?;
    if config.disable_worker {
        info!("Worker disabled by configuration");
        return Ok(());
    }

    let ctx = bootstrap::build_context(&config).await?;
    let shutdown = bootstrap::shutdown_token();

    run_worker_loop(ctx, WorkerConfig::from_app_config(&config), shutdown).await;
    Ok(())
}
