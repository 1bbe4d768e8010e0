//! Shared domain types used across modules
//!
//! This module contains the learner, relation, session, and notification
//! types that are used by multiple modules to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::CoreError;

/// Preferred study time slot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
    Night,
}

/// A learner's identity and activity snapshot
///
/// Created at registration and mutated by activity events. Profiles are
/// never deleted, only archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Unique learner identifier
    pub user_id: String,
    /// Display name
    pub name: String,
    /// Faculty or department
    pub faculty: String,
    /// Enrolled course ids
    #[serde(default)]
    pub courses: BTreeSet<String>,
    /// Completed lesson count per course
    #[serde(default)]
    pub completed_lessons: BTreeMap<String, u32>,
    /// Lifetime experience points
    #[serde(default)]
    pub total_xp: u32,
    /// Gamification level
    #[serde(default)]
    pub level: u32,
    /// Unlocked badge ids
    #[serde(default)]
    pub badges: BTreeSet<String>,
    /// Timestamp of the most recent activity
    pub last_activity_at: DateTime<Utc>,
    /// Number of learning sessions joined
    #[serde(default)]
    pub session_participations: u32,
    /// Number of learning sessions created
    #[serde(default)]
    pub session_creations: u32,
    /// Average session length in minutes
    #[serde(default)]
    pub avg_session_minutes: f64,
    /// Preferred study time slots
    #[serde(default)]
    pub preferred_time_slots: BTreeSet<TimeSlot>,
    /// Accepted buddies of this learner
    #[serde(default)]
    pub existing_buddies: BTreeSet<String>,
    /// How quickly the learner tends to respond, 0..=100
    #[serde(default)]
    pub responsiveness: u8,
    /// How helpful the learner is rated by peers, 0..=100
    #[serde(default)]
    pub helpfulness: u8,
    /// Archived profiles are kept but excluded from discovery
    #[serde(default)]
    pub archived: bool,
}

impl Profile {
    /// Validate a profile at the boundary.
    ///
    /// Malformed input is rejected here with a `Validation` error rather
    /// than defaulted away inside the scoring code.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.user_id.trim().is_empty() {
            return Err(CoreError::Validation("profile user_id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "profile {} has an empty name",
                self.user_id
            )));
        }
        if self.responsiveness > 100 {
            return Err(CoreError::Validation(format!(
                "profile {} responsiveness {} out of range 0..=100",
                self.user_id, self.responsiveness
            )));
        }
        if self.helpfulness > 100 {
            return Err(CoreError::Validation(format!(
                "profile {} helpfulness {} out of range 0..=100",
                self.user_id, self.helpfulness
            )));
        }
        if !self.avg_session_minutes.is_finite() || self.avg_session_minutes < 0.0 {
            return Err(CoreError::Validation(format!(
                "profile {} avg_session_minutes must be a non-negative number",
                self.user_id
            )));
        }
        Ok(())
    }
}

/// Status of a buddy relation edge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelationStatus {
    Pending,
    Accepted,
    Declined,
}

/// Per-relation consent flags controlling which notification categories
/// may be sent to the owning user about the buddy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Consents {
    /// XP and badge activity updates
    pub activity: bool,
    /// General notifications
    pub notifications: bool,
    /// "Your buddy is in a session" invites
    pub session_invites: bool,
    /// Study planning alerts
    pub planning_alerts: bool,
}

impl Default for Consents {
    fn default() -> Self {
        Self {
            activity: true,
            notifications: true,
            session_invites: true,
            planning_alerts: true,
        }
    }
}

/// A directed buddy edge from `user_id` to `buddy_id`
///
/// Acceptance of a pending relation creates the reciprocal accepted edge.
/// No `(user_id, buddy_id)` pair may be pending and accepted simultaneously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyRelation {
    pub user_id: String,
    pub buddy_id: String,
    pub status: RelationStatus,
    #[serde(default)]
    pub consents: Consents,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a learning session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Live,
    Ended,
    Cancelled,
}

impl SessionStatus {
    /// Ended and cancelled sessions never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Cancelled)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Scheduled => write!(f, "scheduled"),
            SessionStatus::Live => write!(f, "live"),
            SessionStatus::Ended => write!(f, "ended"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A user's membership interval in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub left_at: Option<DateTime<Utc>>,
    /// Other participants this user has an accepted relation with
    #[serde(default)]
    pub is_buddy_of: BTreeSet<String>,
}

impl Participant {
    /// Still present in the session
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// A scheduled or live shared learning gathering tied to a course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSession {
    pub id: String,
    pub course_id: String,
    pub status: SessionStatus,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl LearningSession {
    /// Number of participants who have joined and not yet left
    pub fn active_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_active()).count()
    }

    /// Whether the user is currently an active participant
    pub fn is_active_participant(&self, user_id: &str) -> bool {
        self.participants
            .iter()
            .any(|p| p.user_id == user_id && p.is_active())
    }

    /// Active participant user ids, in join order
    pub fn active_user_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.user_id.clone())
            .collect()
    }
}

/// Category of a stored notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    SinglePeerInSession,
    GroupedPeersInSession,
    Activity,
    Recommendation,
}

/// Delivery priority of a notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
}

/// A notification persisted for one target user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Unique id; no two notifications share one
    pub id: Uuid,
    pub kind: NotificationKind,
    /// Users this notification is about
    pub source_user_ids: BTreeSet<String>,
    /// User whose inbox this notification lands in
    pub target_user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub course_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: NotificationPriority,
    #[serde(default)]
    pub is_read: bool,
    /// Number of peers folded into this notification
    #[serde(default = "default_group_count")]
    pub group_count: u32,
}

fn default_group_count() -> u32 {
    1
}

/// Direction of a presence change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    Joined,
    Left,
}

/// A join/leave occurrence in a learning session, published by the
/// presence tracker and consumed by the notification aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceChangeEvent {
    pub session_id: String,
    pub course_id: String,
    pub user_id: String,
    pub kind: PresenceKind,
    pub occurred_at: DateTime<Utc>,
}

/// Non-presence activity that turns into notifications without
/// cooldown or grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActivityEvent {
    /// A learner earned experience points
    XpEarned {
        user_id: String,
        amount: u32,
        #[serde(default)]
        course_id: Option<String>,
    },
    /// A learner unlocked a badge
    BadgeUnlocked { user_id: String, badge_id: String },
    /// The platform recommends a course to a specific learner
    CourseRecommendation {
        target_user_id: String,
        course_id: String,
    },
}
