use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;

use crate::error::AppError;

/// Scalar and hash operations over the shared state store.
///
/// Values are opaque strings; callers store JSON documents through the
/// `*_json` helpers below.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set(&self, key: &str, value: String) -> Result<(), AppError>;

    async fn hash_get(&self, hash_key: &str, field: &str) -> Result<Option<String>, AppError>;

    async fn hash_set(&self, hash_key: &str, field: &str, value: String) -> Result<(), AppError>;

    async fn hash_keys(&self, hash_key: &str) -> Result<Vec<String>, AppError>;
}

pub async fn get_json<T, S>(store: &S, key: &str) -> Result<Option<T>, AppError>
where
    T: DeserializeOwned,
    S: StateStore + ?Sized,
{
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T, S>(store: &S, key: &str, value: &T) -> Result<(), AppError>
where
    T: Serialize + Sync,
    S: StateStore + ?Sized,
{
    store.set(key, serde_json::to_string(value)?).await
}

pub async fn hash_get_json<T, S>(
    store: &S,
    hash_key: &str,
    field: &str,
) -> Result<Option<T>, AppError>
where
    T: DeserializeOwned,
    S: StateStore + ?Sized,
{
    match store.hash_get(hash_key, field).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn hash_set_json<T, S>(
    store: &S,
    hash_key: &str,
    field: &str,
    value: &T,
) -> Result<(), AppError>
where
    T: Serialize + Sync,
    S: StateStore + ?Sized,
{
    store
        .hash_set(hash_key, field, serde_json::to_string(value)?)
        .await
}

/// Process-local store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    scalars: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.scalars.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), AppError> {
        self.scalars.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn hash_get(&self, hash_key: &str, field: &str) -> Result<Option<String>, AppError> {
        Ok(self
            .hashes
            .read()
            .await
            .get(hash_key)
            .and_then(|fields| fields.get(field).cloned()))
    }

    async fn hash_set(&self, hash_key: &str, field: &str, value: String) -> Result<(), AppError> {
        self.hashes
            .write()
            .await
            .entry(hash_key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_keys(&self, hash_key: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .hashes
            .read()
            .await
            .get(hash_key)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default())
    }
}
