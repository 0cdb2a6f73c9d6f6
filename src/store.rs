//! # Persistence of accepted process definitions.
//!
//! The registry persists the **original** (unresolved) config, the current
//! order, and the metadata of every task, plus registry-level metadata.
//! Resolved forms and argument vectors are recomputed on load.
//!
//! [`JsonStore`] is the file-backed reference implementation;
//! [`MemoryStore`] backs tests and embedders that persist elsewhere.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Error;
use crate::process::ProcessConfig;
use crate::state::Order;

/// One persisted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProcess {
    pub config: ProcessConfig,
    pub order: Order,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Everything the registry persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub processes: Vec<StoredProcess>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Persistence seam consumed by the registry.
///
/// Called on registry init and after every accepted mutation; failures
/// surface as [`Error::Unavailable`] from the mutating call.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self) -> Result<StoreData, Error>;
    async fn store(&self, data: &StoreData) -> Result<(), Error>;
}

/// JSON file store. Writes go to a temporary file first and are moved into
/// place, so a crash never leaves a half-written state behind.
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn load(&self) -> Result<StoreData, Error> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreData::default());
            }
            Err(e) => {
                return Err(Error::unavailable(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice(&raw)
            .map_err(|e| Error::unavailable(format!("decoding {}: {e}", self.path.display())))
    }

    async fn store(&self, data: &StoreData) -> Result<(), Error> {
        let raw = serde_json::to_vec_pretty(data)
            .map_err(|e| Error::unavailable(format!("encoding store data: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| Error::unavailable(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::unavailable(format!("replacing {}: {e}", self.path.display())))
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self) -> Result<StoreData, Error> {
        Ok(self.data.lock().await.clone())
    }

    async fn store(&self, data: &StoreData) -> Result<(), Error> {
        *self.data.lock().await = data.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_store_round_trips() {
        let dir = std::env::temp_dir().join(format!("streamvisor-store-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = JsonStore::new(dir.join("db.json"));

        // Missing file loads as empty.
        let empty = store.load().await.unwrap();
        assert!(empty.processes.is_empty());

        let mut data = StoreData::default();
        data.processes.push(StoredProcess {
            config: ProcessConfig {
                id: "p1".to_string(),
                ..Default::default()
            },
            order: Order::Start,
            metadata: HashMap::new(),
        });
        data.metadata
            .insert("k".to_string(), serde_json::json!({"v": 1}));

        store.store(&data).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.processes.len(), 1);
        assert_eq!(loaded.processes[0].config.id, "p1");
        assert_eq!(loaded.processes[0].order, Order::Start);
        assert_eq!(loaded.metadata["k"], serde_json::json!({"v": 1}));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
