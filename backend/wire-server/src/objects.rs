//! Object store contract
//!
//! Write-once blob storage for media. The production tier is external;
//! the in-memory implementation backs tests and local development.

use async_trait::async_trait;
use error_types::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob. Keys are write-once; a second put on the same key is
    /// rejected.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<()>;

    async fn get(&self, key: &str) -> AppResult<Option<StoredObject>>;
}

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<()> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(AppError::conflict("Object already exists"));
        }
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemoryObjectStore::new();
        store
            .put("media/1.jpg", vec![0xFF, 0xD8, 0xFF], "image/jpeg")
            .await
            .unwrap();

        let object = store.get("media/1.jpg").await.unwrap().unwrap();
        assert_eq!(object.content_type, "image/jpeg");
        assert_eq!(object.bytes, vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn test_keys_are_write_once() {
        let store = MemoryObjectStore::new();
        store.put("k", vec![1], "image/png").await.unwrap();
        let err = store.put("k", vec![2], "image/png").await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_missing_key_reads_none() {
        let store = MemoryObjectStore::new();
        assert!(store.get("absent").await.unwrap().is_none());
    }
}
