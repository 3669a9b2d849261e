//! Durable "local state" preferences.
//!
//! The scheduler persists one ordered list of timestamps; the store itself is
//! generic over named lists of numbers. Every write is flushed before it
//! returns so a crash never loses rate-limit history.

use crate::error::{ErrorContext, Result, UploaderError};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub trait LocalStateStore: Send {
    /// Read a list of numbers. An absent key reads as an empty list.
    fn get_number_list(&self, key: &str) -> Result<Vec<f64>>;

    /// Replace a list of numbers and flush it to durable storage.
    fn set_number_list(&mut self, key: &str, values: &[f64]) -> Result<()>;
}

/// JSON-file backed store, locked exclusively for its lifetime.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    values: Map<String, Value>,
    _lock: File,
}

impl JsonFileStateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create local state directory")?;
        }

        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context(&format!("Failed to open lock file {}", lock_path.display()))?;
        lock.try_lock_exclusive().map_err(|e| {
            UploaderError::State(format!(
                "Local state {} is locked by another process: {}",
                path.display(),
                e
            ))
        })?;

        let values = read_state_file(&path)
            .context(&format!("Failed to load local state {}", path.display()))?;

        Ok(Self {
            path,
            values,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(&Value::Object(self.values.clone()))?;

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&content)?;
            tmp.sync_all()?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(&tmp_path)?.permissions();
            permissions.set_mode(0o600);
            fs::set_permissions(&tmp_path, permissions)?;
        }

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn read_state_file(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }

    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map),
        other => Err(UploaderError::State(format!(
            "Local state {} is not a JSON object (found {})",
            path.display(),
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn number_list(value: Option<&Value>) -> Vec<f64> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_f64)
            .filter(|v| v.is_finite())
            .collect(),
        _ => Vec::new(),
    }
}

impl LocalStateStore for JsonFileStateStore {
    fn get_number_list(&self, key: &str) -> Result<Vec<f64>> {
        Ok(number_list(self.values.get(key)))
    }

    fn set_number_list(&mut self, key: &str, values: &[f64]) -> Result<()> {
        let list = values
            .iter()
            .filter_map(|v| serde_json::Number::from_f64(*v).map(Value::Number))
            .collect();
        self.values.insert(key.to_string(), Value::Array(list));
        self.flush()
    }
}

/// Shared in-memory store; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    lists: Arc<Mutex<HashMap<String, Vec<f64>>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(key: &str, values: Vec<f64>) -> Self {
        let store = Self::new();
        if let Ok(mut lists) = store.lists.lock() {
            lists.insert(key.to_string(), values);
        }
        store
    }

    /// Number of committed writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }
}

impl LocalStateStore for MemoryStateStore {
    fn get_number_list(&self, key: &str) -> Result<Vec<f64>> {
        let lists = self.lists.lock()?;
        Ok(lists.get(key).cloned().unwrap_or_default())
    }

    fn set_number_list(&mut self, key: &str, values: &[f64]) -> Result<()> {
        self.lists.lock()?.insert(key.to_string(), values.to_vec());
        *self.writes.lock()? += 1;
        Ok(())
    }
}
