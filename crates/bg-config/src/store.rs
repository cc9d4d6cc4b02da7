//! Nested configuration tree with dotted-path lookup
//!
//! The backing file is read on first access only. Every successful lookup is
//! memoized by its literal path string and never invalidated, so a file that
//! changes at runtime is not picked up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use crate::{ConfigError, Result};

pub const DEFAULT_SEPARATOR: &str = ".";

pub struct ConfigStore {
    path: Option<PathBuf>,
    separator: String,
    tree: RwLock<Option<Arc<Value>>>,
    cache: Mutex<HashMap<String, Value>>,
    loads: AtomicUsize,
    traversals: AtomicUsize,
}

impl ConfigStore {
    /// Lazily backed by the JSON (or `.toml`) file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_separator(path, DEFAULT_SEPARATOR)
    }

    pub fn with_separator(path: impl Into<PathBuf>, separator: impl Into<String>) -> Self {
        let path = path.into();
        debug!(path = %path.display(), "Config created");
        Self {
            path: Some(path),
            separator: separator.into(),
            tree: RwLock::new(None),
            cache: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
            traversals: AtomicUsize::new(0),
        }
    }

    /// Already-loaded tree, mostly useful for tests and embedding
    pub fn from_value(tree: Value) -> Self {
        Self {
            path: None,
            separator: DEFAULT_SEPARATOR.to_string(),
            tree: RwLock::new(Some(Arc::new(tree))),
            cache: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
            traversals: AtomicUsize::new(0),
        }
    }

    /// Force the initial load, surfacing file errors early
    pub fn load(&self) -> Result<()> {
        self.tree().map(|_| ())
    }

    /// Value at `key`, walking one tree level per separator-delimited segment
    pub fn get(&self, key: &str) -> Result<Value> {
        if let Some(hit) = self.cache.lock().get(key) {
            return Ok(hit.clone());
        }

        let tree = self.tree()?;
        self.traversals.fetch_add(1, Ordering::Relaxed);

        let mut current: &Value = &tree;
        for segment in key.split(self.separator.as_str()) {
            current = current
                .as_object()
                .and_then(|obj| obj.get(segment))
                .ok_or_else(|| ConfigError::not_found(key))?;
        }

        debug!(key = %key, value = %current, "Config lookup");

        let value = current.clone();
        self.cache.lock().insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Like `get`, but a missing key is `None` instead of an error
    pub fn get_opt(&self, key: &str) -> Result<Option<Value>> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<String> {
        match self.get(key)? {
            Value::String(s) => Ok(s),
            _ => Err(ConfigError::type_mismatch(key, "a string")),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<u64> {
        self.get(key)?
            .as_u64()
            .ok_or_else(|| ConfigError::type_mismatch(key, "a non-negative integer"))
    }

    pub fn get_string_list(&self, key: &str) -> Result<Vec<String>> {
        let value = self.get(key)?;
        let items = value
            .as_array()
            .ok_or_else(|| ConfigError::type_mismatch(key, "a list"))?;

        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ConfigError::type_mismatch(key, "a list of strings"))
            })
            .collect()
    }

    /// Number of times the backing file has been read
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of uncached tree walks performed by `get`
    pub fn traversal_count(&self) -> usize {
        self.traversals.load(Ordering::Relaxed)
    }

    fn tree(&self) -> Result<Arc<Value>> {
        if let Some(tree) = self.tree.read().as_ref() {
            return Ok(tree.clone());
        }

        let mut slot = self.tree.write();
        if let Some(tree) = slot.as_ref() {
            return Ok(tree.clone());
        }

        let path = self
            .path
            .as_ref()
            .ok_or_else(|| ConfigError::not_found("<config file>"))?;
        let tree = Arc::new(read_tree(path)?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        *slot = Some(tree.clone());
        Ok(tree)
    }
}

/// Copies share the immutable loaded tree but start with an empty cache
impl Clone for ConfigStore {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            separator: self.separator.clone(),
            tree: RwLock::new(self.tree.read().clone()),
            cache: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
            traversals: AtomicUsize::new(0),
        }
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("separator", &self.separator)
            .field("loaded", &self.tree.read().is_some())
            .finish()
    }
}

fn read_tree(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        toml::from_str::<Value>(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    } else {
        serde_json::from_str::<Value>(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
