//! Keyed persistence layer
//!
//! The core persists everything through a simple keyed store supplied by
//! the host: JSON values addressed by string keys, listable by prefix.
//! Layout: `profiles:{userId}`, `sessions:{sessionId}`,
//! `notifications:{userId}`, `cooldowns:{observerId}:{sessionId}:{type}`,
//! plus a `schema_version` marker maintained by the migration step.

pub mod migrate;
pub mod notifications;
pub mod profiles;
pub mod relations;

pub use migrate::{run_migrations, CURRENT_SCHEMA_VERSION};
pub use notifications::NotificationStore;
pub use profiles::{KeyedProfileStore, ProfileStore};
pub use relations::{KeyedRelationStore, RelationStore};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// A flat JSON key/value store with prefix listing.
///
/// Implementations must be safe to share across tasks; callers that need
/// read-then-write atomicity serialize access themselves.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> CoreResult<()>;
    async fn remove(&self, key: &str) -> CoreResult<()>;
    /// All entries whose key starts with `prefix`, in key order
    async fn list_prefix(&self, prefix: &str) -> CoreResult<Vec<(String, Value)>>;
}

/// In-memory keyed store, used in tests and as a cache-less default
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, ready to hand to the store facades
    pub fn shared() -> Arc<dyn KeyedStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> CoreResult<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> CoreResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> CoreResult<Vec<(String, Value)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Keyed store backed by a single JSON file.
///
/// The full map lives in memory; every mutation rewrites the file. Fine
/// for the data volumes of one dashboard installation.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open the store, loading existing entries if the file is present
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(CoreError::persistence)?;
        }

        let entries = if path.exists() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(CoreError::persistence)?;
            serde_json::from_str(&raw).map_err(CoreError::persistence)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), "opened keyed store");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn flush(&self, entries: &BTreeMap<String, Value>) -> CoreResult<()> {
        let raw = serde_json::to_string_pretty(entries).map_err(CoreError::persistence)?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(CoreError::persistence)
    }
}

#[async_trait]
impl KeyedStore for JsonFileStore {
    async fn get(&self, key: &str) -> CoreResult<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> CoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        self.flush(&entries).await
    }

    async fn list_prefix(&self, prefix: &str) -> CoreResult<Vec<(String, Value)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
