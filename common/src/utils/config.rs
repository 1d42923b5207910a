use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Backend holding job, shard, task and metrics state.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateStoreKind {
    Surreal,
    Memory,
}

fn default_state_store_kind() -> StateStoreKind {
    StateStoreKind::Surreal
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_state_store_kind")]
    pub state_store: StateStoreKind,
    #[serde(default)]
    pub surrealdb_address: String,
    #[serde(default)]
    pub surrealdb_username: String,
    #[serde(default)]
    pub surrealdb_password: String,
    #[serde(default = "default_surreal_scope")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surreal_scope")]
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    #[serde(default = "default_peer_id")]
    pub peer_id: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_job_poll_seconds")]
    pub job_poll_seconds: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_update_every_k")]
    pub update_every_k: u32,
    #[serde(default = "default_local_cache_dir")]
    pub local_cache_dir: String,
    #[serde(default)]
    pub disable_worker: bool,
    #[serde(default = "default_max_records_per_job")]
    pub max_records_per_job: u32,

    #[serde(default)]
    pub inference_base_url: String,
    #[serde(default = "default_inference_path")]
    pub inference_path: String,
    #[serde(default)]
    pub inference_api_key: Option<String>,
    #[serde(default)]
    pub inference_model: Option<String>,
    #[serde(default)]
    pub mock_inference: bool,
    #[serde(default)]
    pub offline_seed: Option<u64>,
    #[serde(default)]
    pub retry_inference_on_failure: bool,
    #[serde(default = "default_inference_retry_delay_ms")]
    pub inference_retry_delay_ms: u64,
    #[serde(default)]
    pub log_inference_requests: bool,
}

fn default_surreal_scope() -> String {
    "datagen".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_peer_id() -> String {
    "peer-1".to_string()
}

fn default_job_poll_seconds() -> u64 {
    5
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_update_every_k() -> u32 {
    5
}

fn default_local_cache_dir() -> String {
    "./data/cache".to_string()
}

fn default_max_records_per_job() -> u32 {
    200
}

pub fn default_inference_path() -> String {
    "/create_chat_completion".to_string()
}

fn default_inference_retry_delay_ms() -> u64 {
    250
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_store: default_state_store_kind(),
            surrealdb_address: String::new(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: default_surreal_scope(),
            surrealdb_database: default_surreal_scope(),
            data_dir: default_data_dir(),
            storage: default_storage_kind(),
            peer_id: default_peer_id(),
            peers: Vec::new(),
            job_poll_seconds: default_job_poll_seconds(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            update_every_k: default_update_every_k(),
            local_cache_dir: default_local_cache_dir(),
            disable_worker: false,
            max_records_per_job: default_max_records_per_job(),
            inference_base_url: String::new(),
            inference_path: default_inference_path(),
            inference_api_key: None,
            inference_model: None,
            mock_inference: false,
            offline_seed: None,
            retry_inference_on_failure: false,
            inference_retry_delay_ms: default_inference_retry_delay_ms(),
            log_inference_requests: false,
        }
    }
}

impl AppConfig {
    /// Peers that jobs are split across. Falls back to this process alone.
    pub fn peer_list(&self) -> Vec<String> {
        let peers: Vec<String> = self
            .peers
            .iter()
            .map(|peer| peer.trim().to_string())
            .filter(|peer| !peer.is_empty())
            .collect();

        if peers.is_empty() {
            vec![self.peer_id.clone()]
        } else {
            peers
        }
    }

    pub fn inference_attempts(&self) -> u32 {
        if self.retry_inference_on_failure {
            2
        } else {
            1
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("peers"),
        )
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_list_falls_back_to_own_peer_id() {
        let config = AppConfig {
            peer_id: "solo".into(),
            ..Default::default()
        };
        assert_eq!(config.peer_list(), vec!["solo".to_string()]);
    }

    #[test]
    fn peer_list_trims_and_drops_blank_entries() {
        let config = AppConfig {
            peers: vec![" p1".into(), String::new(), "p2 ".into()],
            ..Default::default()
        };
        assert_eq!(config.peer_list(), vec!["p1".to_string(), "p2".to_string()]);
    }

    #[test]
    fn retry_mode_doubles_attempts() {
        let mut config = AppConfig::default();
        assert_eq!(config.inference_attempts(), 1);
        config.retry_inference_on_failure = true;
        assert_eq!(config.inference_attempts(), 2);
    }
}
