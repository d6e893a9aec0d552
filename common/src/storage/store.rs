use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Storage key for a document's raw upload, derived from its tenant and id.
pub fn document_storage_key(company_id: &str, document_id: &str) -> String {
    format!("documents/{company_id}/{document_id}.pdf")
}

/// Blob store over an `object_store` backend.
///
/// Holds the raw uploaded files between upload and vectorization. Keys are
/// opaque strings to callers; nothing outside this module assumes a layout.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
}

impl StorageManager {
    /// Create a new StorageManager with the backend named in the configuration.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let store = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
        })
    }

    /// Create a StorageManager with a custom storage backend.
    ///
    /// Useful for tests that want to inject a specific backend.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    /// Store bytes at the specified location.
    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Retrieve bytes from the specified location, fully buffered.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Delete the object at the specified location.
    ///
    /// A missing object is not an error; deletion is used for cleanup paths
    /// that may run more than once.
    pub async fn delete(&self, location: &str) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Check if an object exists at the specified location.
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
}

/// Create a storage backend based on configuration.
async fn create_storage_backend(cfg: &AppConfig) -> object_store::Result<DynStore> {
    match cfg.storage {
        StorageKind::Local => {
            let base = PathBuf::from(&cfg.data_dir);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base)?;
            Ok(Arc::new(store))
        }
        StorageKind::Memory => Ok(Arc::new(InMemory::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_storage() -> StorageManager {
        StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let storage = memory_storage();
        let key = document_storage_key("acme", "doc-1");

        storage
            .put(&key, Bytes::from_static(b"%PDF-1.5 test"))
            .await
            .expect("put failed");

        assert!(storage.exists(&key).await.expect("exists failed"));

        let fetched = storage.get(&key).await.expect("get failed");
        assert_eq!(fetched, Bytes::from_static(b"%PDF-1.5 test"));

        storage.delete(&key).await.expect("delete failed");
        assert!(!storage.exists(&key).await.expect("exists failed"));
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_ok() {
        let storage = memory_storage();
        storage
            .delete("documents/none/absent.pdf")
            .await
            .expect("deleting a missing object should not fail");
    }

    #[tokio::test]
    async fn test_local_backend_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            storage: StorageKind::Local,
            ..AppConfig::default()
        };

        let storage = StorageManager::new(&cfg).await.expect("local backend");
        let key = document_storage_key("acme", "doc-2");

        storage
            .put(&key, Bytes::from_static(b"contents"))
            .await
            .expect("put failed");
        let fetched = storage.get(&key).await.expect("get failed");
        assert_eq!(fetched, Bytes::from_static(b"contents"));
    }

    #[test]
    fn test_storage_key_layout() {
        assert_eq!(
            document_storage_key("acme", "abc-123"),
            "documents/acme/abc-123.pdf"
        );
    }
}
