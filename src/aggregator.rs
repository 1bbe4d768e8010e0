//! Presence-driven notification aggregation
//!
//! Consumes presence-change events and turns them into inbox
//! notifications for consenting buddies, de-duplicated by a cooldown
//! window and merged within a grouping window. Also appends activity
//! notifications (XP, badges, recommendations), which take neither
//! cooldown nor grouping.
//!
//! The cooldown check-and-set runs under a single mutex, so concurrent
//! events for the same join cannot both pass the gate. The cooldown key
//! carries the joining peer in its type segment
//! (`cooldowns:{observer}:{session}:presence:{joiner}`): re-observing the
//! same peer in the same session is suppressed, while a different peer
//! joining moments later still merges into a grouped notification.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::presence::{PresenceReceiver, PresenceTracker};
use crate::store::{KeyedStore, NotificationStore, ProfileStore, RelationStore};
use crate::types::{
    ActivityEvent, NotificationEvent, NotificationKind, NotificationPriority,
    PresenceChangeEvent, PresenceKind, Profile,
};

/// Turns presence and activity events into stored notifications
pub struct NotificationAggregator {
    profiles: Arc<dyn ProfileStore>,
    relations: Arc<dyn RelationStore>,
    notifications: Arc<NotificationStore>,
    keyed: Arc<dyn KeyedStore>,
    config: Config,
    /// In-memory cooldown timestamps; the keyed store mirrors them so a
    /// restart does not forget recent notifications. Guarded by one
    /// mutex so check-then-set is atomic.
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl NotificationAggregator {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        relations: Arc<dyn RelationStore>,
        notifications: Arc<NotificationStore>,
        keyed: Arc<dyn KeyedStore>,
        config: Config,
    ) -> Self {
        Self {
            profiles,
            relations,
            notifications,
            keyed,
            config,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Consume the presence channel until it closes
    pub async fn run(self: Arc<Self>, mut events: PresenceReceiver) {
        info!("notification aggregator started");
        while let Some(event) = events.recv().await {
            if let Err(err) = self.handle_presence(&event).await {
                warn!(%err, session_id = %event.session_id, "presence event failed");
            }
        }
        info!("presence channel closed, aggregator stopping");
    }

    /// Spawn [`run`](Self::run) as a background task
    pub fn spawn(self: Arc<Self>, events: PresenceReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Handle one presence change with the current clock
    pub async fn handle_presence(&self, event: &PresenceChangeEvent) -> CoreResult<()> {
        self.handle_presence_at(event, Utc::now()).await
    }

    /// Handle one presence change with an explicit clock
    pub async fn handle_presence_at(
        &self,
        event: &PresenceChangeEvent,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if event.kind != PresenceKind::Joined {
            return Ok(());
        }

        let Some(joiner) = self.profiles.get(&event.user_id).await? else {
            debug!(user_id = %event.user_id, "join from unknown profile ignored");
            return Ok(());
        };
        if !joiner.courses.contains(&event.course_id) {
            debug!(
                user_id = %event.user_id,
                course_id = %event.course_id,
                "joiner is not enrolled in the session course"
            );
            return Ok(());
        }

        for edge in self.relations.watchers_of(&event.user_id).await? {
            let observer_id = edge.user_id.clone();
            if observer_id == event.user_id {
                continue;
            }
            if !edge.consents.session_invites {
                // consent off is a silent skip, not an error
                debug!(observer = %observer_id, "session-invite consent disabled");
                continue;
            }
            let Some(observer) = self.profiles.get(&observer_id).await? else {
                debug!(observer = %observer_id, "watcher has no profile");
                continue;
            };
            if !observer.courses.contains(&event.course_id) {
                continue;
            }

            if !self.cooldown_passes(&observer_id, event, now).await? {
                debug!(observer = %observer_id, session_id = %event.session_id, "suppressed by cooldown");
                continue;
            }

            self.notify_presence(&observer, &joiner, event, now).await;
        }
        Ok(())
    }

    /// Atomic cooldown gate. Returns false when the key fired within the
    /// window; otherwise records `now` for the key (mirrored to the
    /// keyed store) and returns true.
    async fn cooldown_passes(
        &self,
        observer_id: &str,
        event: &PresenceChangeEvent,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let key = format!(
            "cooldowns:{observer_id}:{}:presence:{}",
            event.session_id, event.user_id
        );
        let mut cooldowns = self.cooldowns.lock().await;

        let last = match cooldowns.get(&key) {
            Some(at) => Some(*at),
            None => self
                .keyed
                .get(&key)
                .await?
                .and_then(|v| v.as_str().and_then(|s| s.parse::<DateTime<Utc>>().ok())),
        };
        if let Some(last) = last {
            if now - last < self.config.cooldown_window() {
                return Ok(false);
            }
        }

        cooldowns.insert(key.clone(), now);
        self.keyed.set(&key, json!(now.to_rfc3339())).await?;
        Ok(true)
    }

    /// Create a fresh notification or merge into an unread one for the
    /// same (observer, session) within the grouping window.
    async fn notify_presence(
        &self,
        observer: &Profile,
        joiner: &Profile,
        event: &PresenceChangeEvent,
        now: DateTime<Utc>,
    ) {
        let prior = match self
            .find_groupable(&observer.user_id, &event.session_id, now)
            .await
        {
            Ok(prior) => prior,
            Err(err) => {
                warn!(%err, observer = %observer.user_id, "could not inspect inbox, creating fresh notification");
                None
            }
        };

        let mut notification = NotificationEvent {
            id: Uuid::new_v4(),
            kind: NotificationKind::SinglePeerInSession,
            source_user_ids: [joiner.user_id.clone()].into_iter().collect(),
            target_user_id: observer.user_id.clone(),
            session_id: Some(event.session_id.clone()),
            course_id: Some(event.course_id.clone()),
            created_at: now,
            expires_at: Some(now + self.config.presence_ttl()),
            priority: NotificationPriority::Normal,
            is_read: false,
            group_count: 1,
        };

        let prior_id = prior.map(|p| {
            notification.kind = NotificationKind::GroupedPeersInSession;
            notification.source_user_ids.extend(p.source_user_ids);
            notification.group_count = notification.source_user_ids.len() as u32;
            p.id
        });

        self.write_with_retry(prior_id, notification).await;
    }

    async fn find_groupable(
        &self,
        observer_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<NotificationEvent>> {
        let window = self.config.grouping_window();
        let inbox = self.notifications.list_by_user_at(observer_id, now).await?;
        Ok(inbox.into_iter().find(|n| {
            !n.is_read
                && n.session_id.as_deref() == Some(session_id)
                && matches!(
                    n.kind,
                    NotificationKind::SinglePeerInSession
                        | NotificationKind::GroupedPeersInSession
                )
                && now - n.created_at <= window
        }))
    }

    /// Persist a notification, replacing `prior_id` when merging. One
    /// retry on persistence failure, then the notification is dropped
    /// and logged; the pipeline never dies on a failed write.
    async fn write_with_retry(&self, prior_id: Option<Uuid>, notification: NotificationEvent) {
        for attempt in 0..2 {
            match self.write_once(prior_id, &notification).await {
                Ok(()) => return,
                Err(err) if attempt == 0 => {
                    warn!(%err, "notification write failed, retrying once");
                }
                Err(err) => {
                    warn!(
                        %err,
                        target = %notification.target_user_id,
                        "notification dropped after retry"
                    );
                }
            }
        }
    }

    async fn write_once(
        &self,
        prior_id: Option<Uuid>,
        notification: &NotificationEvent,
    ) -> CoreResult<()> {
        if let Some(id) = prior_id {
            match self.notifications.delete(id).await {
                // a concurrent merge may have removed it already
                Ok(()) | Err(CoreError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        self.notifications.append(notification.clone()).await
    }

    /// Handle a non-presence activity event: appended directly, no
    /// cooldown and no grouping.
    pub async fn handle_activity(&self, event: &ActivityEvent) -> CoreResult<()> {
        self.handle_activity_at(event, Utc::now()).await
    }

    /// [`handle_activity`](Self::handle_activity) with an explicit clock
    pub async fn handle_activity_at(
        &self,
        event: &ActivityEvent,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        match event {
            ActivityEvent::XpEarned { user_id, course_id, .. } => {
                self.fan_out_activity(user_id, course_id.clone(), now).await
            }
            ActivityEvent::BadgeUnlocked { user_id, .. } => {
                self.fan_out_activity(user_id, None, now).await
            }
            ActivityEvent::CourseRecommendation {
                target_user_id,
                course_id,
            } => {
                let notification = NotificationEvent {
                    id: Uuid::new_v4(),
                    kind: NotificationKind::Recommendation,
                    source_user_ids: Default::default(),
                    target_user_id: target_user_id.clone(),
                    session_id: None,
                    course_id: Some(course_id.clone()),
                    created_at: now,
                    expires_at: None,
                    priority: NotificationPriority::Normal,
                    is_read: false,
                    group_count: 1,
                };
                self.write_with_retry(None, notification).await;
                Ok(())
            }
        }
    }

    /// XP/badge updates go to every accepted watcher whose activity
    /// consent is on.
    async fn fan_out_activity(
        &self,
        user_id: &str,
        course_id: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        for edge in self.relations.watchers_of(user_id).await? {
            if !edge.consents.activity {
                continue;
            }
            let notification = NotificationEvent {
                id: Uuid::new_v4(),
                kind: NotificationKind::Activity,
                source_user_ids: [user_id.to_string()].into_iter().collect(),
                target_user_id: edge.user_id.clone(),
                session_id: None,
                course_id: course_id.clone(),
                created_at: now,
                expires_at: None,
                priority: NotificationPriority::Low,
                is_read: false,
                group_count: 1,
            };
            self.write_with_retry(None, notification).await;
        }
        Ok(())
    }

    /// One best-effort pass over the live sessions: re-observe every
    /// active participant as a join. The cooldown makes re-observation
    /// idempotent; a skipped cycle only delays a notification.
    pub async fn sweep(&self, tracker: &PresenceTracker) -> CoreResult<()> {
        self.sweep_at(tracker, Utc::now()).await
    }

    /// [`sweep`](Self::sweep) with an explicit clock
    pub async fn sweep_at(&self, tracker: &PresenceTracker, now: DateTime<Utc>) -> CoreResult<()> {
        for session in tracker.live_sessions().await {
            for user_id in session.active_user_ids() {
                let event = PresenceChangeEvent {
                    session_id: session.id.clone(),
                    course_id: session.course_id.clone(),
                    user_id,
                    kind: PresenceKind::Joined,
                    occurred_at: now,
                };
                if let Err(err) = self.handle_presence_at(&event, now).await {
                    warn!(%err, session_id = %session.id, "sweep observation failed");
                }
            }
        }
        Ok(())
    }

    /// Spawn the periodic sweep on the configured interval
    pub fn spawn_sweeper(self: Arc<Self>, tracker: Arc<PresenceTracker>) -> JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.notifications.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep(&tracker).await {
                    warn!(%err, "presence sweep failed");
                }
            }
        })
    }
}
