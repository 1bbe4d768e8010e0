//! Learning session presence tracking
//!
//! Owns the session lifecycle state machine and publishes join/leave
//! occurrences to an event channel consumed by the notification
//! aggregator. Each session sits behind its own mutex, so concurrent
//! joins on one session are linearized and the capacity check cannot
//! race past the limit, while unrelated sessions proceed in parallel.
//!
//! Lifecycle: scheduled → live on the first join (which also covers a
//! `starts_at` already in the past); live → ended when the last active
//! participant leaves; scheduled/live → cancelled by explicit moderation.
//! Ended and cancelled are terminal.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::store::RelationStore;
use crate::types::{
    LearningSession, Participant, PresenceChangeEvent, PresenceKind, SessionStatus,
};

/// Receiving side of the presence event channel
pub type PresenceReceiver = mpsc::UnboundedReceiver<PresenceChangeEvent>;

/// Tracks session occupancy and emits presence-change events
pub struct PresenceTracker {
    sessions: RwLock<HashMap<String, Arc<Mutex<LearningSession>>>>,
    relations: Arc<dyn RelationStore>,
    events_tx: mpsc::UnboundedSender<PresenceChangeEvent>,
}

impl PresenceTracker {
    /// Create a tracker and the receiver the aggregator will consume
    pub fn new(relations: Arc<dyn RelationStore>) -> (Self, PresenceReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions: RwLock::new(HashMap::new()),
                relations,
                events_tx,
            },
            events_rx,
        )
    }

    /// Register a scheduled session
    pub async fn schedule(&self, session: LearningSession) -> CoreResult<()> {
        if session.id.trim().is_empty() {
            return Err(CoreError::Validation("session id is empty".into()));
        }
        if session.status != SessionStatus::Scheduled {
            return Err(CoreError::Validation(format!(
                "session {} must be scheduled, was {}",
                session.id, session.status
            )));
        }
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), Arc::new(Mutex::new(session)));
        Ok(())
    }

    async fn session_handle(&self, session_id: &str) -> CoreResult<Arc<Mutex<LearningSession>>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))
    }

    /// A user enters the session (invoked by the session transport)
    pub async fn join(&self, session_id: &str, user_id: &str) -> CoreResult<()> {
        self.join_at(session_id, user_id, Utc::now()).await
    }

    /// [`join`](Self::join) with an explicit clock
    pub async fn join_at(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let handle = self.session_handle(session_id).await?;
        let mut session = handle.lock().await;

        if session.status.is_terminal() {
            return Err(CoreError::NotFound(format!(
                "session {session_id} is {}",
                session.status
            )));
        }
        if session.is_active_participant(user_id) {
            // at-least-once transport can replay a join
            debug!(session_id, user_id, "duplicate join ignored");
            return Ok(());
        }
        if let Some(capacity) = session.capacity {
            if session.active_count() >= capacity {
                return Err(CoreError::CapacityExceeded {
                    session_id: session_id.to_string(),
                    capacity,
                });
            }
        }

        let buddies = self.relations.list_for(user_id).await?;
        let is_buddy_of = session
            .active_user_ids()
            .into_iter()
            .filter(|other| {
                buddies.iter().any(|r| {
                    r.buddy_id == *other && r.status == crate::types::RelationStatus::Accepted
                })
            })
            .collect();

        session.participants.push(Participant {
            user_id: user_id.to_string(),
            joined_at: now,
            left_at: None,
            is_buddy_of,
        });

        if session.status == SessionStatus::Scheduled {
            session.status = SessionStatus::Live;
            info!(session_id, "session went live");
        }

        let event = PresenceChangeEvent {
            session_id: session_id.to_string(),
            course_id: session.course_id.clone(),
            user_id: user_id.to_string(),
            kind: PresenceKind::Joined,
            occurred_at: now,
        };
        // receiver dropped means nobody is listening; presence state is
        // still correct, so this is not an error
        let _ = self.events_tx.send(event);
        Ok(())
    }

    /// A user exits the session; leaving a session one is not in is a
    /// logged no-op.
    pub async fn leave(&self, session_id: &str, user_id: &str) -> CoreResult<()> {
        self.leave_at(session_id, user_id, Utc::now()).await
    }

    /// [`leave`](Self::leave) with an explicit clock
    pub async fn leave_at(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let handle = self.session_handle(session_id).await?;
        let mut session = handle.lock().await;

        let Some(participant) = session
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id && p.is_active())
        else {
            debug!(session_id, user_id, "leave for non-participant ignored");
            return Ok(());
        };
        participant.left_at = Some(now);

        if session.status == SessionStatus::Live && session.active_count() == 0 {
            session.status = SessionStatus::Ended;
            info!(session_id, "session ended, last participant left");
        }

        let event = PresenceChangeEvent {
            session_id: session_id.to_string(),
            course_id: session.course_id.clone(),
            user_id: user_id.to_string(),
            kind: PresenceKind::Left,
            occurred_at: now,
        };
        let _ = self.events_tx.send(event);
        Ok(())
    }

    /// Moderation action; terminal from scheduled or live
    pub async fn cancel(&self, session_id: &str) -> CoreResult<()> {
        let handle = self.session_handle(session_id).await?;
        let mut session = handle.lock().await;
        if session.status.is_terminal() {
            return Err(CoreError::Validation(format!(
                "session {session_id} is already {}",
                session.status
            )));
        }
        session.status = SessionStatus::Cancelled;
        info!(session_id, "session cancelled");
        Ok(())
    }

    /// Snapshot of one session
    pub async fn get(&self, session_id: &str) -> CoreResult<LearningSession> {
        let handle = self.session_handle(session_id).await?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    /// Snapshots of all currently live sessions, for the best-effort sweep
    pub async fn live_sessions(&self) -> Vec<LearningSession> {
        let handles: Vec<Arc<Mutex<LearningSession>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut live = Vec::new();
        for handle in handles {
            let session = handle.lock().await;
            if session.status == SessionStatus::Live {
                live.push(session.clone());
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyedRelationStore, MemoryStore};
    use chrono::Duration;

    fn session(id: &str, capacity: Option<usize>) -> LearningSession {
        LearningSession {
            id: id.to_string(),
            course_id: "gauss".to_string(),
            status: SessionStatus::Scheduled,
            starts_at: Utc::now() - Duration::minutes(5),
            capacity,
            participants: vec![],
        }
    }

    fn tracker() -> (PresenceTracker, PresenceReceiver) {
        let relations = Arc::new(KeyedRelationStore::new(MemoryStore::shared()));
        PresenceTracker::new(relations)
    }

    #[tokio::test]
    async fn first_join_takes_a_scheduled_session_live() {
        let (tracker, mut rx) = tracker();
        tracker.schedule(session("s1", None)).await.unwrap();

        tracker.join("s1", "a").await.unwrap();
        let snapshot = tracker.get("s1").await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Live);
        assert_eq!(snapshot.active_count(), 1);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, PresenceKind::Joined);
        assert_eq!(event.user_id, "a");
        assert_eq!(event.course_id, "gauss");
    }

    #[tokio::test]
    async fn capacity_is_enforced_and_participants_unchanged() {
        let (tracker, _rx) = tracker();
        tracker.schedule(session("s1", Some(2))).await.unwrap();
        tracker.join("s1", "a").await.unwrap();
        tracker.join("s1", "b").await.unwrap();

        let err = tracker.join("s1", "c").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::CapacityExceeded { capacity: 2, .. }
        ));
        let snapshot = tracker.get("s1").await.unwrap();
        assert_eq!(snapshot.participants.len(), 2);
    }

    #[tokio::test]
    async fn last_leave_ends_the_session() {
        let (tracker, mut rx) = tracker();
        tracker.schedule(session("s1", None)).await.unwrap();
        tracker.join("s1", "a").await.unwrap();
        tracker.join("s1", "b").await.unwrap();

        tracker.leave("s1", "a").await.unwrap();
        assert_eq!(tracker.get("s1").await.unwrap().status, SessionStatus::Live);

        tracker.leave("s1", "b").await.unwrap();
        assert_eq!(
            tracker.get("s1").await.unwrap().status,
            SessionStatus::Ended
        );

        let kinds: Vec<PresenceKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                PresenceKind::Joined,
                PresenceKind::Joined,
                PresenceKind::Left,
                PresenceKind::Left
            ]
        );
    }

    #[tokio::test]
    async fn leave_of_non_participant_is_a_no_op() {
        let (tracker, mut rx) = tracker();
        tracker.schedule(session("s1", None)).await.unwrap();

        tracker.leave("s1", "ghost").await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(
            tracker.get("s1").await.unwrap().status,
            SessionStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn replayed_join_does_not_duplicate_the_participant() {
        let (tracker, mut rx) = tracker();
        tracker.schedule(session("s1", None)).await.unwrap();
        tracker.join("s1", "a").await.unwrap();
        tracker.join("s1", "a").await.unwrap();

        assert_eq!(tracker.get("s1").await.unwrap().participants.len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_session_rejects_joins() {
        let (tracker, _rx) = tracker();
        tracker.schedule(session("s1", None)).await.unwrap();
        tracker.cancel("s1").await.unwrap();

        let err = tracker.join("s1", "a").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let err = tracker.cancel("s1").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (tracker, _rx) = tracker();
        let err = tracker.join("nope", "a").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn joiners_record_their_buddies_already_present() {
        let keyed = MemoryStore::shared();
        let relations = Arc::new(KeyedRelationStore::new(keyed));
        use crate::store::RelationStore as _;
        use crate::types::{BuddyRelation, Consents, RelationStatus};
        relations
            .put(BuddyRelation {
                user_id: "b".to_string(),
                buddy_id: "a".to_string(),
                status: RelationStatus::Accepted,
                consents: Consents::default(),
                created_at: Utc::now(),
                accepted_at: Some(Utc::now()),
            })
            .await
            .unwrap();

        let (tracker, _rx) = PresenceTracker::new(relations);
        tracker.schedule(session("s1", None)).await.unwrap();
        tracker.join("s1", "a").await.unwrap();
        tracker.join("s1", "b").await.unwrap();

        let snapshot = tracker.get("s1").await.unwrap();
        let b = snapshot
            .participants
            .iter()
            .find(|p| p.user_id == "b")
            .unwrap();
        assert!(b.is_buddy_of.contains("a"));
    }

    #[tokio::test]
    async fn concurrent_joins_cannot_exceed_capacity() {
        let (tracker, _rx) = tracker();
        let tracker = Arc::new(tracker);
        tracker.schedule(session("s1", Some(3))).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.join("s1", &format!("u{i}")).await
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
        assert_eq!(tracker.get("s1").await.unwrap().active_count(), 3);
    }
}
