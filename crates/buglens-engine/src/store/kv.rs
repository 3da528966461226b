use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs;

pub const PROCESSED_ERRORS_KEY: &str = "processed_errors";
pub const PAUSE_UNTIL_KEY: &str = "ai_pause_until";
pub const ATTACHED_SESSIONS_KEY: &str = "attached_sessions";
pub const UNREAD_REPORTS_KEY: &str = "unread_reports";
pub const REPORTS_KEY: &str = "reports";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable key-value state. Every write goes straight through to the backing
/// medium.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn set_typed<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    store.set(key, serde_json::to_value(value)?).await
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// All keys live in one JSON document, rewritten (via a temp file and rename)
/// on every mutation.
pub struct FileKvStore {
    path: PathBuf,
    values: tokio::sync::Mutex<Map<String, Value>>,
}

impl FileKvStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let values = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&content)? {
                    Value::Object(map) => map,
                    _ => {
                        tracing::warn!(
                            "State file {} is not a JSON object, starting empty",
                            path.display()
                        );
                        Map::new()
                    }
                }
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: tokio::sync::Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, values: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(values)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut values = self.values.lock().await;
        values.insert(key.to_string(), value);
        self.flush(&values).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().await;
        if values.remove(key).is_some() {
            self.flush(&values).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trips_typed_values() {
        let store = MemoryKvStore::new();
        set_typed(&store, "count", &3u32).await.unwrap();
        let count: Option<u32> = get_typed(&store, "count").await.unwrap();
        assert_eq!(count, Some(3));
        store.remove("count").await.unwrap();
        assert!(store.get("count").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileKvStore::open(&path).await.unwrap();
        store
            .set(PAUSE_UNTIL_KEY, json!("2024-05-01T12:10:00Z"))
            .await
            .unwrap();
        store.set("other", json!({"a": 1})).await.unwrap();
        store.remove("other").await.unwrap();
        drop(store);

        let reopened = FileKvStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get(PAUSE_UNTIL_KEY).await.unwrap(),
            Some(json!("2024-05-01T12:10:00Z"))
        );
        assert!(reopened.get("other").await.unwrap().is_none());
    }
}
