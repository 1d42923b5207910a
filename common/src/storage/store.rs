use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::AppError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

const BLOB_PREFIX: &str = "blobs";

/// Immutable, content-identified uploads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `content` and return its content identifier. `name` is descriptive only.
    async fn upload(&self, content: Bytes, name: &str) -> Result<String, AppError>;

    async fn download(&self, cid: &str) -> Result<Bytes, AppError>;
}

/// Content identifier: lowercase hex SHA-256 of the bytes.
pub fn content_id(content: &[u8]) -> String {
    Sha256::digest(content)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Storage manager over an `object_store` backend.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Create a new StorageManager with the specified configuration.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Create a StorageManager with a custom storage backend.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    pub fn memory() -> Self {
        Self::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    fn blob_location(cid: &str) -> String {
        format!("{BLOB_PREFIX}/{cid}")
    }
}

#[async_trait]
impl BlobStore for StorageManager {
    async fn upload(&self, content: Bytes, name: &str) -> Result<String, AppError> {
        let cid = content_id(&content);
        let location = Self::blob_location(&cid);

        if self.exists(&location).await? {
            debug!(%cid, name, "blob already stored");
            return Ok(cid);
        }

        self.put(&location, content).await?;
        debug!(%cid, name, "uploaded blob");
        Ok(cid)
    }

    async fn download(&self, cid: &str) -> Result<Bytes, AppError> {
        if cid.is_empty() || !cid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::NotFound(format!("blob {cid}")));
        }

        match self.get(&Self::blob_location(cid)).await {
            Ok(bytes) => Ok(bytes),
            Err(object_store::Error::NotFound { .. }) => {
                Err(AppError::NotFound(format!("blob {cid}")))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Create a storage backend based on configuration.
async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Resolve the absolute base directory used for local storage from config.
///
/// If `data_dir` is relative, it is resolved against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_is_content_addressed() {
        let storage = StorageManager::memory();

        let first = storage
            .upload(Bytes::from_static(b"{\"a\":1}"), "first.json")
            .await
            .expect("upload");
        let second = storage
            .upload(Bytes::from_static(b"{\"a\":1}"), "second.json")
            .await
            .expect("upload again");
        let other = storage
            .upload(Bytes::from_static(b"{\"a\":2}"), "other.json")
            .await
            .expect("upload other");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 64);

        let fetched = storage.download(&first).await.expect("download");
        assert_eq!(fetched.as_ref(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_download_unknown_cid_is_not_found() {
        let storage = StorageManager::memory();
        let missing = content_id(b"never uploaded");

        assert!(matches!(
            storage.download(&missing).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            storage.download("../escape").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_backend_persists_under_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            storage: StorageKind::Local,
            ..Default::default()
        };
        let storage = StorageManager::new(&cfg).await.expect("local storage");
        assert_eq!(storage.local_base_path(), Some(dir.path()));

        let cid = storage
            .upload(Bytes::from_static(b"line\n"), "results.jsonl")
            .await
            .expect("upload");
        assert!(dir.path().join(BLOB_PREFIX).join(&cid).exists());
    }
}
