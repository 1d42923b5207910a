use std::sync::Arc;

use common::{
    storage::{
        db::SurrealDbClient,
        kv::{MemoryStateStore, StateStore},
        store::StorageManager,
    },
    utils::{
        clock::{Clock, SystemClock},
        config::{AppConfig, StateStoreKind},
    },
};
use inference_pipeline::build_generator;
use job_engine::EngineContext;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

async fn build_state_store(config: &AppConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    match config.state_store {
        StateStoreKind::Surreal => {
            let db = SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?;
            db.ensure_initialized().await?;
            Ok(Arc::new(db))
        }
        StateStoreKind::Memory => {
            warn!("Using in-memory state store; jobs are lost on exit");
            Ok(Arc::new(MemoryStateStore::new()))
        }
    }
}

/// Stores, clock and generator wired from configuration.
pub async fn build_context(config: &AppConfig) -> anyhow::Result<EngineContext> {
    let state = build_state_store(config).await?;
    let blobs = Arc::new(StorageManager::new(config).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let generator = build_generator(config, Arc::clone(&clock));

    info!(
        state_store = ?config.state_store,
        storage = ?blobs.backend_kind(),
        peer_id = %config.peer_id,
        "Engine context initialized"
    );
    Ok(EngineContext::new(state, blobs, generator, clock))
}

/// Token cancelled on ctrl-c.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing current shard"),
            Err(err) => warn!(error = %err, "Could not listen for ctrl-c"),
        }
        trigger.cancel();
    });
    token
}
