mod file;

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use file::JsonFileStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record '{key}' could not be decoded: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Opaque key-value store. Values are JSON documents; keys are `/`-joined
/// paths built by [`keys`].
pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;
    /// Returns whether a value was removed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

pub mod keys {
    pub fn guidelines(brand_id: &str) -> String {
        format!("brands/{brand_id}/guidelines")
    }

    pub fn twin(brand_id: &str) -> String {
        format!("brands/{brand_id}/twin")
    }

    pub fn job(job_id: &str) -> String {
        format!("jobs/{job_id}")
    }

    pub fn job_cancel(job_id: &str) -> String {
        format!("jobs/{job_id}/cancel")
    }
}

pub fn load<T: DeserializeOwned>(store: &dyn ObjectStore, key: &str) -> Result<Option<T>, StoreError> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
}

pub fn save<T: Serialize>(store: &dyn ObjectStore, key: &str, value: &T) -> Result<(), StoreError> {
    store.put(key, serde_json::to_value(value)?)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.remove(key).is_some())
    }
}
