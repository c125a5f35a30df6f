use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

use super::AgentId;

/// Key holding the list of known agents
pub const AGENTS_KEY: &str = "agent-pulse.agents";
/// Key holding per-agent presentation hints (palette, seat); written by the UI
pub const AGENT_SEATS_KEY: &str = "agent-pulse.agentSeats";
/// Key holding the saved office layout
pub const LAYOUT_KEY: &str = "agent-pulse.layout";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access workspace state at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode workspace state: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable projection of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAgent {
    pub id: AgentId,
}

/// Workspace-scoped key/value state
pub trait WorkspaceStore: Send {
    fn get(&self, key: &str) -> Option<Value>;
    fn update(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Read a typed value, falling back to the default when missing or malformed
pub fn read_or_default<T: DeserializeOwned + Default>(store: &dyn WorkspaceStore, key: &str) -> T {
    match store.get(key) {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(key, error = %e, "Ignoring malformed workspace state");
            T::default()
        }),
        None => T::default(),
    }
}

/// All keys stored in one JSON object file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    /// Open the store, treating a missing or corrupt file as empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(values) => values,
                Err(e) => {
                    // The next write replaces the whole snapshot
                    warn!(path = %path.display(), error = %e, "Workspace state is corrupt, starting empty");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, values })
    }

    /// Per-workspace state file under the user's data directory
    pub fn default_path(workspace: &Path) -> PathBuf {
        let slug: String = workspace
            .display()
            .to_string()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let slug = slug.trim_matches('_');
        let slug = if slug.is_empty() { "default" } else { slug };

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agent-pulse")
            .join("workspaces")
            .join(format!("{}.json", slug))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&self.values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl WorkspaceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn update(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        self.write()
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<String, Value>,
    writes: usize,
}

/// In-memory store; clones share the same contents
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of successful updates so far
    pub fn writes(&self) -> usize {
        self.lock().writes
    }
}

impl WorkspaceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    fn update(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.values.insert(key.to_string(), value);
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(AGENTS_KEY), None);
        store.update(AGENTS_KEY, json!([{"id": 0}, {"id": 3}])).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let agents: Vec<PersistedAgent> = read_or_default(&reopened, AGENTS_KEY);
        assert_eq!(agents, vec![PersistedAgent { id: 0 }, PersistedAgent { id: 3 }]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let mut store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(AGENTS_KEY), None);
        store.update(AGENTS_KEY, json!([])).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<Value>(&raw).is_ok());
    }

    #[test]
    fn test_malformed_value_reads_as_default() {
        let mut store = MemoryStore::new();
        store.update(AGENTS_KEY, json!("oops")).unwrap();
        let agents: Vec<PersistedAgent> = read_or_default(&store, AGENTS_KEY);
        assert!(agents.is_empty());
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        writer.update(LAYOUT_KEY, json!({"cols": 4})).unwrap();

        assert_eq!(store.get(LAYOUT_KEY), Some(json!({"cols": 4})));
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn test_default_path_is_per_workspace() {
        let a = JsonFileStore::default_path(Path::new("/home/me/proj-a"));
        let b = JsonFileStore::default_path(Path::new("/home/me/proj-b"));
        assert_ne!(a, b);
        assert!(a.ends_with("home_me_proj_a.json"));
    }
}
