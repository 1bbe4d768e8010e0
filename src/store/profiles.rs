//! Profile store facade
//!
//! Profiles arrive from the registration collaborator; this crate reads
//! them for scoring and notification routing. Writes validate at the
//! boundary so malformed records never reach the scoring code.

use async_trait::async_trait;
use std::sync::Arc;

use super::KeyedStore;
use crate::error::{CoreError, CoreResult};
use crate::types::Profile;

const KEY_PREFIX: &str = "profiles:";

fn profile_key(user_id: &str) -> String {
    format!("{KEY_PREFIX}{user_id}")
}

/// Read/write access to learner profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: &str) -> CoreResult<Option<Profile>>;
    /// Insert or replace a profile; rejects malformed input
    async fn put(&self, profile: Profile) -> CoreResult<()>;
    /// All profiles, archived ones included
    async fn list(&self) -> CoreResult<Vec<Profile>>;
}

/// Profile store over the host-supplied keyed store
pub struct KeyedProfileStore {
    store: Arc<dyn KeyedStore>,
}

impl KeyedProfileStore {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProfileStore for KeyedProfileStore {
    async fn get(&self, user_id: &str) -> CoreResult<Option<Profile>> {
        match self.store.get(&profile_key(user_id)).await? {
            Some(value) => {
                let profile = serde_json::from_value(value).map_err(CoreError::persistence)?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, profile: Profile) -> CoreResult<()> {
        profile.validate()?;
        let key = profile_key(&profile.user_id);
        let value = serde_json::to_value(&profile).map_err(CoreError::persistence)?;
        self.store.set(&key, value).await
    }

    async fn list(&self) -> CoreResult<Vec<Profile>> {
        let entries = self.store.list_prefix(KEY_PREFIX).await?;
        entries
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(CoreError::persistence))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn profile(user_id: &str) -> Profile {
        Profile {
            user_id: user_id.to_string(),
            name: format!("Learner {user_id}"),
            faculty: "Sciences".to_string(),
            courses: BTreeSet::new(),
            completed_lessons: BTreeMap::new(),
            total_xp: 0,
            level: 1,
            badges: BTreeSet::new(),
            last_activity_at: Utc::now(),
            session_participations: 0,
            session_creations: 0,
            avg_session_minutes: 0.0,
            preferred_time_slots: BTreeSet::new(),
            existing_buddies: BTreeSet::new(),
            responsiveness: 50,
            helpfulness: 50,
            archived: false,
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_the_profile() {
        let store = KeyedProfileStore::new(MemoryStore::shared());
        store.put(profile("u1")).await.unwrap();

        let loaded = store.get("u1").await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_profile_is_rejected_at_the_boundary() {
        let store = KeyedProfileStore::new(MemoryStore::shared());
        let mut bad = profile("u1");
        bad.helpfulness = 200;

        let err = store.put(bad).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(store.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_all_profiles() {
        let store = KeyedProfileStore::new(MemoryStore::shared());
        store.put(profile("u1")).await.unwrap();
        store.put(profile("u2")).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
