//! Versioned schema migration
//!
//! Run once at startup, before any store facade touches the data. Each
//! step transforms the previous layout into the next one in place; data
//! is never discarded on a version mismatch. A store written by a newer
//! build is an error, not a wipe.

use serde_json::{json, Value};
use tracing::info;

use super::KeyedStore;
use crate::error::{CoreError, CoreResult};

/// Schema version produced by this build
pub const CURRENT_SCHEMA_VERSION: u64 = 2;

const VERSION_KEY: &str = "schema_version";

/// Bring the store up to [`CURRENT_SCHEMA_VERSION`], returning the
/// version that was found before migrating.
pub async fn run_migrations(store: &dyn KeyedStore) -> CoreResult<u64> {
    let found = match store.get(VERSION_KEY).await? {
        Some(value) => value.as_u64().ok_or_else(|| {
            CoreError::Persistence(format!("schema_version is not an integer: {value}"))
        })?,
        // Stores from before versioning carry v1 data
        None => 1,
    };

    if found > CURRENT_SCHEMA_VERSION {
        return Err(CoreError::Persistence(format!(
            "store schema v{found} is newer than supported v{CURRENT_SCHEMA_VERSION}"
        )));
    }

    let mut version = found;
    while version < CURRENT_SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(store).await?,
            _ => unreachable!("no migration registered from v{version}"),
        }
        version += 1;
        store.set(VERSION_KEY, json!(version)).await?;
        info!(version, "store schema migrated");
    }

    Ok(found)
}

/// v1 notifications predate grouping and lack `group_count`; backfill it
/// from the number of source users.
async fn migrate_v1_to_v2(store: &dyn KeyedStore) -> CoreResult<()> {
    let inboxes = store.list_prefix("notifications:").await?;
    for (key, mut value) in inboxes {
        let entries = value
            .as_array_mut()
            .ok_or_else(|| CoreError::Persistence(format!("{key} is not an array")))?;
        let mut changed = false;
        for entry in entries.iter_mut() {
            if entry.get("group_count").is_none() {
                let sources = entry
                    .get("source_user_ids")
                    .and_then(Value::as_array)
                    .map_or(1, |s| s.len().max(1));
                entry["group_count"] = json!(sources);
                changed = true;
            }
        }
        if changed {
            store.set(&key, value).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NotificationStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn fresh_store_migrates_to_current_version() {
        let store = MemoryStore::new();
        let found = run_migrations(&store).await.unwrap();
        assert_eq!(found, 1);
        assert_eq!(
            store.get(VERSION_KEY).await.unwrap().unwrap().as_u64(),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[tokio::test]
    async fn v1_notifications_gain_group_count_without_losing_entries() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        store
            .set(
                "notifications:u1",
                json!([{
                    "id": "5f0c1a9e-3b77-4f46-9f57-0c2b4f9f4d0e",
                    "kind": "single-peer-in-session",
                    "source_user_ids": ["a", "b"],
                    "target_user_id": "u1",
                    "session_id": "s1",
                    "course_id": "gauss",
                    "created_at": "2026-08-01T10:00:00Z",
                    "priority": "normal",
                    "is_read": false
                }]),
            )
            .await
            .unwrap();

        run_migrations(store.as_ref()).await.unwrap();

        // the migrated entry now deserializes through the store facade
        let notifications = NotificationStore::new(store.clone());
        let inbox = notifications.list_by_user("u1").await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].group_count, 2);
    }

    #[tokio::test]
    async fn migration_is_idempotent() {
        let store = MemoryStore::new();
        run_migrations(&store).await.unwrap();
        let found = run_migrations(&store).await.unwrap();
        assert_eq!(found, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn newer_schema_errors_instead_of_wiping() {
        let store = MemoryStore::new();
        store.set(VERSION_KEY, json!(99)).await.unwrap();
        store.set("notifications:u1", json!([])).await.unwrap();

        let err = run_migrations(&store).await.unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));
        // data untouched
        assert!(store.get("notifications:u1").await.unwrap().is_some());
    }
}
