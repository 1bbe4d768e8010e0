//! Notification persistence
//!
//! Per-user notification inboxes over the keyed store, one entry per user
//! under `notifications:{userId}`. Expired entries are pruned lazily when
//! an inbox is listed. Ids are unique across the whole store.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::KeyedStore;
use crate::error::{CoreError, CoreResult};
use crate::types::NotificationEvent;

const KEY_PREFIX: &str = "notifications:";

fn inbox_key(user_id: &str) -> String {
    format!("{KEY_PREFIX}{user_id}")
}

/// Store for per-user notification inboxes
pub struct NotificationStore {
    store: Arc<dyn KeyedStore>,
}

impl NotificationStore {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    async fn load(&self, user_id: &str) -> CoreResult<Vec<NotificationEvent>> {
        match self.store.get(&inbox_key(user_id)).await? {
            Some(value) => serde_json::from_value(value).map_err(CoreError::persistence),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, user_id: &str, inbox: &[NotificationEvent]) -> CoreResult<()> {
        let value = serde_json::to_value(inbox).map_err(CoreError::persistence)?;
        self.store.set(&inbox_key(user_id), value).await
    }

    /// Append a notification to its target's inbox
    pub async fn append(&self, notification: NotificationEvent) -> CoreResult<()> {
        let mut inbox = self.load(&notification.target_user_id).await?;
        let user_id = notification.target_user_id.clone();
        inbox.push(notification);
        self.save(&user_id, &inbox).await
    }

    /// A user's notifications, newest first.
    ///
    /// Entries whose `expires_at` has passed are pruned here, not by a
    /// background job.
    pub async fn list_by_user(&self, user_id: &str) -> CoreResult<Vec<NotificationEvent>> {
        self.list_by_user_at(user_id, Utc::now()).await
    }

    /// Same as [`list_by_user`](Self::list_by_user) with an explicit clock
    pub async fn list_by_user_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<NotificationEvent>> {
        let mut inbox = self.load(user_id).await?;
        let before = inbox.len();
        inbox.retain(|n| n.expires_at.map_or(true, |at| at >= now));
        if inbox.len() != before {
            self.save(user_id, &inbox).await?;
        }
        inbox.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(inbox)
    }

    /// Mark one notification as read
    pub async fn mark_read(&self, id: Uuid) -> CoreResult<()> {
        self.update_by_id(id, |n| n.is_read = true).await
    }

    /// Delete one notification
    pub async fn delete(&self, id: Uuid) -> CoreResult<()> {
        let entries = self.store.list_prefix(KEY_PREFIX).await?;
        for (key, value) in entries {
            let mut inbox: Vec<NotificationEvent> =
                serde_json::from_value(value).map_err(CoreError::persistence)?;
            let before = inbox.len();
            inbox.retain(|n| n.id != id);
            if inbox.len() != before {
                let value = serde_json::to_value(&inbox).map_err(CoreError::persistence)?;
                return self.store.set(&key, value).await;
            }
        }
        Err(CoreError::NotFound(format!("notification {id}")))
    }

    /// Number of unread notifications for a user
    pub async fn count_unread(&self, user_id: &str) -> CoreResult<usize> {
        let inbox = self.load(user_id).await?;
        let now = Utc::now();
        Ok(inbox
            .iter()
            .filter(|n| !n.is_read && n.expires_at.map_or(true, |at| at >= now))
            .count())
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        mutate: impl Fn(&mut NotificationEvent),
    ) -> CoreResult<()> {
        let entries = self.store.list_prefix(KEY_PREFIX).await?;
        for (key, value) in entries {
            let mut inbox: Vec<NotificationEvent> =
                serde_json::from_value(value).map_err(CoreError::persistence)?;
            if let Some(notification) = inbox.iter_mut().find(|n| n.id == id) {
                mutate(notification);
                let value = serde_json::to_value(&inbox).map_err(CoreError::persistence)?;
                return self.store.set(&key, value).await;
            }
        }
        Err(CoreError::NotFound(format!("notification {id}")))
    }
}
