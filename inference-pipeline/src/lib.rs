pub mod client;
pub mod config;
pub mod envelope;
pub mod generator;
pub mod offline;
pub mod prompts;
pub mod request;
pub mod synthetic;
pub mod transport;

use std::sync::Arc;

use common::utils::{clock::Clock, config::AppConfig};
use tracing::info;

pub use client::InferenceClient;
pub use config::{InferenceConfig, InferenceSettings};
pub use generator::{Generated, InferenceFailure, RecordGenerator};
pub use offline::OfflineGenerator;
pub use transport::{ChatTransport, HttpTransport};

/// Generator selected by configuration: offline when mocking, HTTP otherwise.
pub fn build_generator(config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<dyn RecordGenerator> {
    if config.mock_inference {
        info!(seed = ?config.offline_seed, "Using offline record generator");
        return Arc::new(OfflineGenerator::new(config.offline_seed, clock));
    }

    let settings = InferenceSettings::from_app_config(config);
    info!(
        base_url = %settings.base_url,
        attempts = settings.attempts,
        "Using HTTP record generator"
    );
    Arc::new(InferenceClient::new(
        Arc::new(HttpTransport::default()),
        settings,
        clock,
    ))
}
