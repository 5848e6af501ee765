use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use super::{ObjectStore, StoreError};

/// Object store backed by a single pretty-printed JSON document.
///
/// Reads always refresh from disk. Writes re-read the document, apply the one
/// changed key and replace the file atomically through a sibling temp file,
/// so several processes sharing the file keep each other's keys. A write
/// refuses to touch a document it cannot parse.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ObjectStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(read_json_object(&self.path).remove(key))
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut on_disk = read_existing(&self.path)?;
        if on_disk.get(key) == Some(&value) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), value);
        write_json_object(&self.path, &on_disk)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut on_disk = read_existing(&self.path)?;
        if on_disk.remove(key).is_none() {
            return Ok(false);
        }
        write_json_object(&self.path, &on_disk)?;
        Ok(true)
    }
}

fn read_json_object(path: &Path) -> Map<String, Value> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Map::new();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "store file unreadable; treating as empty");
            Map::new()
        }
    }
}

/// Strict counterpart of [`read_json_object`] for the write path.
fn read_existing(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => return Err(err.into()),
    };
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    Ok(serde_json::from_str::<Map<String, Value>>(&raw)?)
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(serde_json::to_string_pretty(payload)?.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}
