//! End-to-end tests for the presence → aggregation → inbox pipeline

use chrono::{Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use studylink::store::{
    run_migrations, JsonFileStore, KeyedProfileStore, KeyedRelationStore, KeyedStore, MemoryStore,
    NotificationStore, ProfileStore, RelationStore,
};
use studylink::{
    BuddyRelation, Config, Consents, LearningSession, NotificationAggregator, NotificationKind,
    PresenceTracker, Profile, RelationStatus, SessionStatus,
};

fn profile(user_id: &str, courses: &[&str]) -> Profile {
    Profile {
        user_id: user_id.to_string(),
        name: format!("Learner {user_id}"),
        faculty: "Sciences".to_string(),
        courses: courses.iter().map(|c| c.to_string()).collect(),
        completed_lessons: BTreeMap::new(),
        total_xp: 1000,
        level: 5,
        badges: BTreeSet::new(),
        last_activity_at: Utc::now(),
        session_participations: 0,
        session_creations: 0,
        avg_session_minutes: 30.0,
        preferred_time_slots: BTreeSet::new(),
        existing_buddies: BTreeSet::new(),
        responsiveness: 50,
        helpfulness: 50,
        archived: false,
    }
}

fn accepted(observer: &str, buddy: &str) -> BuddyRelation {
    BuddyRelation {
        user_id: observer.to_string(),
        buddy_id: buddy.to_string(),
        status: RelationStatus::Accepted,
        consents: Consents::default(),
        created_at: Utc::now(),
        accepted_at: Some(Utc::now()),
    }
}

fn session(id: &str, course: &str) -> LearningSession {
    LearningSession {
        id: id.to_string(),
        course_id: course.to_string(),
        status: SessionStatus::Scheduled,
        starts_at: Utc::now() - Duration::minutes(10),
        capacity: None,
        participants: vec![],
    }
}

struct Stack {
    keyed: Arc<dyn KeyedStore>,
    profiles: Arc<KeyedProfileStore>,
    relations: Arc<KeyedRelationStore>,
    notifications: Arc<NotificationStore>,
}

async fn stack(keyed: Arc<dyn KeyedStore>) -> Stack {
    run_migrations(keyed.as_ref()).await.unwrap();
    Stack {
        profiles: Arc::new(KeyedProfileStore::new(keyed.clone())),
        relations: Arc::new(KeyedRelationStore::new(keyed.clone())),
        notifications: Arc::new(NotificationStore::new(keyed.clone())),
        keyed,
    }
}

impl Stack {
    fn aggregator(&self) -> Arc<NotificationAggregator> {
        Arc::new(NotificationAggregator::new(
            self.profiles.clone(),
            self.relations.clone(),
            self.notifications.clone(),
            self.keyed.clone(),
            Config::default(),
        ))
    }

    async fn seed_observer_and_buddies(&self) {
        self.profiles.put(profile("obs", &["gauss"])).await.unwrap();
        self.profiles.put(profile("amy", &["gauss"])).await.unwrap();
        self.profiles.put(profile("ben", &["gauss"])).await.unwrap();
        self.relations.put(accepted("obs", "amy")).await.unwrap();
        self.relations.put(accepted("obs", "ben")).await.unwrap();
    }
}

#[tokio::test]
async fn join_flows_through_the_channel_into_the_inbox() {
    let s = stack(MemoryStore::shared()).await;
    s.seed_observer_and_buddies().await;

    let (tracker, events) = PresenceTracker::new(s.relations.clone());
    let consumer = s.aggregator().spawn(events);

    tracker.schedule(session("s1", "gauss")).await.unwrap();
    tracker.join("s1", "amy").await.unwrap();
    assert_eq!(
        tracker.get("s1").await.unwrap().status,
        SessionStatus::Live
    );

    // dropping the tracker closes the channel and drains the consumer
    drop(tracker);
    consumer.await.unwrap();

    let inbox = s.notifications.list_by_user("obs").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::SinglePeerInSession);
    assert_eq!(s.notifications.count_unread("obs").await.unwrap(), 1);
}

#[tokio::test]
async fn two_buddy_joins_group_through_the_full_stack() {
    let s = stack(MemoryStore::shared()).await;
    s.seed_observer_and_buddies().await;

    let (tracker, events) = PresenceTracker::new(s.relations.clone());
    let consumer = s.aggregator().spawn(events);

    tracker.schedule(session("s1", "gauss")).await.unwrap();
    tracker.join("s1", "amy").await.unwrap();
    tracker.join("s1", "ben").await.unwrap();
    drop(tracker);
    consumer.await.unwrap();

    let inbox = s.notifications.list_by_user("obs").await.unwrap();
    assert_eq!(inbox.len(), 1);
    let grouped = &inbox[0];
    assert_eq!(grouped.kind, NotificationKind::GroupedPeersInSession);
    assert_eq!(grouped.group_count, 2);
    assert!(grouped.source_user_ids.contains("amy"));
    assert!(grouped.source_user_ids.contains("ben"));
    assert!(!grouped.is_read);
}

#[tokio::test]
async fn sweeping_an_unchanged_session_adds_nothing() {
    let s = stack(MemoryStore::shared()).await;
    s.seed_observer_and_buddies().await;
    let aggregator = s.aggregator();

    let (tracker, mut events) = PresenceTracker::new(s.relations.clone());
    tracker.schedule(session("s1", "gauss")).await.unwrap();
    tracker.join("s1", "amy").await.unwrap();
    while let Ok(event) = events.try_recv() {
        aggregator.handle_presence(&event).await.unwrap();
    }
    assert_eq!(s.notifications.list_by_user("obs").await.unwrap().len(), 1);

    aggregator.sweep(&tracker).await.unwrap();
    aggregator.sweep(&tracker).await.unwrap();

    let inbox = s.notifications.list_by_user("obs").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].group_count, 1);
}

#[tokio::test]
async fn ended_sessions_are_ignored_by_the_sweep() {
    let s = stack(MemoryStore::shared()).await;
    s.seed_observer_and_buddies().await;
    let aggregator = s.aggregator();

    let (tracker, mut events) = PresenceTracker::new(s.relations.clone());
    tracker.schedule(session("s1", "gauss")).await.unwrap();
    tracker.join("s1", "amy").await.unwrap();
    tracker.leave("s1", "amy").await.unwrap();
    assert_eq!(
        tracker.get("s1").await.unwrap().status,
        SessionStatus::Ended
    );

    // discard the original events; only the sweep runs
    while events.try_recv().is_ok() {}
    aggregator.sweep(&tracker).await.unwrap();

    assert!(s.notifications.list_by_user("obs").await.unwrap().is_empty());
}

#[tokio::test]
async fn startup_migration_upgrades_a_v1_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("studylink-data.json");
    std::fs::write(
        &path,
        serde_json::json!({
            "notifications:obs": [{
                "id": "5f0c1a9e-3b77-4f46-9f57-0c2b4f9f4d0e",
                "kind": "grouped-peers-in-session",
                "source_user_ids": ["amy", "ben"],
                "target_user_id": "obs",
                "session_id": "s1",
                "course_id": "gauss",
                "created_at": "2026-08-01T10:00:00Z",
                "priority": "normal",
                "is_read": false
            }]
        })
        .to_string(),
    )
    .unwrap();

    let keyed: Arc<dyn KeyedStore> = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let s = stack(keyed).await;

    let inbox = s.notifications.list_by_user("obs").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].group_count, 2);

    // reopening sees the recorded schema version and migrates no further
    drop(s);
    let reopened: Arc<dyn KeyedStore> = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let found = run_migrations(reopened.as_ref()).await.unwrap();
    assert_eq!(found, studylink::store::CURRENT_SCHEMA_VERSION);
}
