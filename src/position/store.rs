//! Live and dust holding stores
//!
//! Minimal `(owner, mint) -> {size_ui, decimals}` mapping. The engine keeps
//! one store for live positions and a second one for dust remainders.
//! Callers treat every store failure as non-fatal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Stored holding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub size_ui: f64,
    pub decimals: u8,
}

/// Persistent holding map
#[async_trait]
pub trait HoldingStore: Send + Sync {
    async fn update(&self, owner: &str, mint: &str, holding: Holding) -> Result<()>;
    async fn remove(&self, owner: &str, mint: &str) -> Result<()>;
    async fn list_for_owner(&self, owner: &str) -> Result<Vec<(String, Holding)>>;
}

type OwnerMap = HashMap<String, HashMap<String, Holding>>;

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<OwnerMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, owner: &str, mint: &str) -> Option<Holding> {
        self.entries
            .read()
            .await
            .get(owner)
            .and_then(|m| m.get(mint))
            .copied()
    }
}

#[async_trait]
impl HoldingStore for MemoryStore {
    async fn update(&self, owner: &str, mint: &str, holding: Holding) -> Result<()> {
        self.entries
            .write()
            .await
            .entry(owner.to_string())
            .or_default()
            .insert(mint.to_string(), holding);
        Ok(())
    }

    async fn remove(&self, owner: &str, mint: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(m) = entries.get_mut(owner) {
            m.remove(mint);
            if m.is_empty() {
                entries.remove(owner);
            }
        }
        Ok(())
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<(String, Holding)>> {
        Ok(self
            .entries
            .read()
            .await
            .get(owner)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default())
    }
}

/// JSON-file backed store; the whole map is rewritten on every change
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<OwnerMap>,
}

impl JsonFileStore {
    /// Open (or create on first write) the store at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::PositionPersistence(e.to_string()))?;
            let entries: OwnerMap = serde_json::from_str(&data)
                .map_err(|e| Error::PositionPersistence(e.to_string()))?;
            info!("Loaded holdings for {} owners from {}", entries.len(), path.display());
            entries
        } else {
            OwnerMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn flush(&self, entries: &OwnerMap) -> Result<()> {
        let data = serde_json::to_string_pretty(entries)
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::PositionPersistence(e.to_string()))?;
            }
        }
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;
        debug!("Saved holdings to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl HoldingStore for JsonFileStore {
    async fn update(&self, owner: &str, mint: &str, holding: Holding) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .entry(owner.to_string())
            .or_default()
            .insert(mint.to_string(), holding);
        self.flush(&entries).await
    }

    async fn remove(&self, owner: &str, mint: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let removed = match entries.get_mut(owner) {
            Some(m) => m.remove(mint).is_some(),
            None => false,
        };
        if entries.get(owner).is_some_and(|m| m.is_empty()) {
            entries.remove(owner);
        }
        if removed {
            self.flush(&entries).await?;
        }
        Ok(())
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<(String, Holding)>> {
        Ok(self
            .entries
            .read()
            .await
            .get(owner)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default())
    }
}

/// Update a store, logging instead of failing
pub async fn update_logged(store: &dyn HoldingStore, label: &str, owner: &str, mint: &str, holding: Holding) {
    if let Err(e) = store.update(owner, mint, holding).await {
        warn!(store = label, mint, "holding store update failed: {}", e);
    }
}

/// Remove from a store, logging instead of failing
pub async fn remove_logged(store: &dyn HoldingStore, label: &str, owner: &str, mint: &str) {
    if let Err(e) = store.remove(owner, mint).await {
        warn!(store = label, mint, "holding store remove failed: {}", e);
    }
}
