//! Persisted extension enablement.
//!
//! The enablement store is an external collaborator owning the
//! `{id: {enabled, name}}` map. Discovery merges it in at startup and the
//! loader writes the recomputed summary back on every change.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::manifest::ExtensionId;
use crate::error::Result;

/// Persisted per-extension enablement entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnablementEntry {
    pub enabled: bool,
    pub name: String,
}

/// Store of the persisted enablement flags.
#[async_trait]
pub trait EnablementStore: Send + Sync {
    /// Current `{id: {enabled, name}}` map.
    async fn all(&self) -> HashMap<ExtensionId, EnablementEntry>;

    /// Replace the persisted map with a freshly computed summary.
    async fn set_all(&self, entries: HashMap<ExtensionId, EnablementEntry>) -> Result<()>;
}

/// JSON-file-backed enablement store.
pub struct JsonEnablementStore {
    path: PathBuf,
    cache: RwLock<HashMap<ExtensionId, EnablementEntry>>,
}

impl JsonEnablementStore {
    /// Open the store, reading any existing file. A missing file starts the
    /// store empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }
}

#[async_trait]
impl EnablementStore for JsonEnablementStore {
    async fn all(&self) -> HashMap<ExtensionId, EnablementEntry> {
        self.cache.read().await.clone()
    }

    async fn set_all(&self, entries: HashMap<ExtensionId, EnablementEntry>) -> Result<()> {
        {
            let mut cache = self.cache.write().await;
            if *cache == entries {
                return Ok(());
            }
            *cache = entries.clone();
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&self.path, content).await?;
        debug!(path = %self.path.display(), "persisted enablement entries");
        Ok(())
    }
}

/// In-memory store for tests and embedders without persistence.
#[derive(Default)]
pub struct MemoryEnablementStore {
    entries: RwLock<HashMap<ExtensionId, EnablementEntry>>,
}

impl MemoryEnablementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed an entry, typically before discovery runs.
    pub async fn insert(&self, id: impl Into<ExtensionId>, enabled: bool, name: impl Into<String>) {
        self.entries.write().await.insert(
            id.into(),
            EnablementEntry {
                enabled,
                name: name.into(),
            },
        );
    }
}

#[async_trait]
impl EnablementStore for MemoryEnablementStore {
    async fn all(&self) -> HashMap<ExtensionId, EnablementEntry> {
        self.entries.read().await.clone()
    }

    async fn set_all(&self, entries: HashMap<ExtensionId, EnablementEntry>) -> Result<()> {
        *self.entries.write().await = entries;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let store = JsonEnablementStore::open(tmp.path().join("enablement.json")).unwrap();
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_all_round_trips_through_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("enablement.json");

        let mut entries = HashMap::new();
        entries.insert(
            "/p/node_modules/my-ext/package.json".to_string(),
            EnablementEntry {
                enabled: true,
                name: "my-ext".to_string(),
            },
        );

        let store = JsonEnablementStore::open(&path).unwrap();
        store.set_all(entries.clone()).await.unwrap();

        let reopened = JsonEnablementStore::open(&path).unwrap();
        assert_eq!(reopened.all().await, entries);
    }
}
