//! Buddy relation store facade
//!
//! Relation mutation (request/accept/decline) belongs to the social
//! collaborator; this crate reads edges to apply discovery exclusions and
//! to find who should hear about a peer's presence. Edges are stored per
//! owning user under `relations:{userId}`.

use async_trait::async_trait;
use std::sync::Arc;

use super::KeyedStore;
use crate::error::{CoreError, CoreResult};
use crate::types::{BuddyRelation, RelationStatus};

const KEY_PREFIX: &str = "relations:";

fn relation_key(user_id: &str) -> String {
    format!("{KEY_PREFIX}{user_id}")
}

/// Read access to buddy relations, plus the write used by seeding
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// All edges owned by `user_id` (any status)
    async fn list_for(&self, user_id: &str) -> CoreResult<Vec<BuddyRelation>>;
    /// Accepted edges pointing at `buddy_id`, i.e. the users who watch
    /// this learner and hold the consent flags for what they receive
    async fn watchers_of(&self, buddy_id: &str) -> CoreResult<Vec<BuddyRelation>>;
    /// Insert or replace an edge; duplicates per `(user, buddy)` collapse
    async fn put(&self, relation: BuddyRelation) -> CoreResult<()>;
}

/// Relation store over the host-supplied keyed store
pub struct KeyedRelationStore {
    store: Arc<dyn KeyedStore>,
}

impl KeyedRelationStore {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    async fn load(&self, user_id: &str) -> CoreResult<Vec<BuddyRelation>> {
        match self.store.get(&relation_key(user_id)).await? {
            Some(value) => serde_json::from_value(value).map_err(CoreError::persistence),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl RelationStore for KeyedRelationStore {
    async fn list_for(&self, user_id: &str) -> CoreResult<Vec<BuddyRelation>> {
        self.load(user_id).await
    }

    async fn watchers_of(&self, buddy_id: &str) -> CoreResult<Vec<BuddyRelation>> {
        let entries = self.store.list_prefix(KEY_PREFIX).await?;
        let mut watchers = Vec::new();
        for (_, value) in entries {
            let edges: Vec<BuddyRelation> =
                serde_json::from_value(value).map_err(CoreError::persistence)?;
            watchers.extend(
                edges
                    .into_iter()
                    .filter(|e| e.buddy_id == buddy_id && e.status == RelationStatus::Accepted),
            );
        }
        Ok(watchers)
    }

    async fn put(&self, relation: BuddyRelation) -> CoreResult<()> {
        let mut edges = self.load(&relation.user_id).await?;
        edges.retain(|e| e.buddy_id != relation.buddy_id);
        let key = relation_key(&relation.user_id);
        edges.push(relation);
        let value = serde_json::to_value(&edges).map_err(CoreError::persistence)?;
        self.store.set(&key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Consents;
    use chrono::Utc;

    fn relation(user_id: &str, buddy_id: &str, status: RelationStatus) -> BuddyRelation {
        BuddyRelation {
            user_id: user_id.to_string(),
            buddy_id: buddy_id.to_string(),
            status,
            consents: Consents::default(),
            created_at: Utc::now(),
            accepted_at: None,
        }
    }

    #[tokio::test]
    async fn list_for_returns_owned_edges_only() {
        let store = KeyedRelationStore::new(MemoryStore::shared());
        store
            .put(relation("a", "b", RelationStatus::Accepted))
            .await
            .unwrap();
        store
            .put(relation("b", "a", RelationStatus::Accepted))
            .await
            .unwrap();

        let edges = store.list_for("a").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].buddy_id, "b");
    }

    #[tokio::test]
    async fn watchers_are_accepted_edges_pointing_at_the_buddy() {
        let store = KeyedRelationStore::new(MemoryStore::shared());
        store
            .put(relation("a", "c", RelationStatus::Accepted))
            .await
            .unwrap();
        store
            .put(relation("b", "c", RelationStatus::Pending))
            .await
            .unwrap();

        let watchers = store.watchers_of("c").await.unwrap();
        assert_eq!(watchers.len(), 1);
        assert_eq!(watchers[0].user_id, "a");
    }

    #[tokio::test]
    async fn put_replaces_the_existing_edge_for_the_pair() {
        let store = KeyedRelationStore::new(MemoryStore::shared());
        store
            .put(relation("a", "b", RelationStatus::Pending))
            .await
            .unwrap();
        store
            .put(relation("a", "b", RelationStatus::Accepted))
            .await
            .unwrap();

        let edges = store.list_for("a").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].status, RelationStatus::Accepted);
    }
}
