//! StudyLink core - peer matching and presence notifications
//!
//! The buddy layer of the StudyLink learning dashboard:
//! - Deterministic multi-factor compatibility scoring for peer discovery
//! - Presence tracking over live learning sessions
//! - Presence-driven notification aggregation with cooldown and grouping
//! - Keyed persistence with explicit, versioned schema migration
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use studylink::store::{KeyedProfileStore, KeyedRelationStore, MemoryStore, NotificationStore};
//! use studylink::{Config, NotificationAggregator, PresenceTracker};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let keyed = MemoryStore::shared();
//!     studylink::store::run_migrations(keyed.as_ref()).await?;
//!
//!     let relations = Arc::new(KeyedRelationStore::new(keyed.clone()));
//!     let (tracker, events) = PresenceTracker::new(relations.clone());
//!     let aggregator = Arc::new(NotificationAggregator::new(
//!         Arc::new(KeyedProfileStore::new(keyed.clone())),
//!         relations,
//!         Arc::new(NotificationStore::new(keyed.clone())),
//!         keyed,
//!         Config::default(),
//!     ));
//!     aggregator.spawn(events);
//!
//!     tracker.join("session-1", "amy").await?;
//!     Ok(())
//! }
//! ```

// Core modules (types first; everything depends on them)
pub mod types;
pub mod error;
pub mod config;
pub mod store;

// Scoring and ranking (pure, stateless)
pub mod compat;
pub mod discovery;

// Presence pipeline (stateful, event-driven)
pub mod presence;
pub mod aggregator;

pub mod cli;

// Re-export commonly used types for convenience
pub use aggregator::NotificationAggregator;
pub use compat::{score, score_at, Compatibility};
pub use config::Config;
pub use discovery::{Discovery, DiscoveryCandidate};
pub use error::{CoreError, CoreResult};
pub use presence::{PresenceReceiver, PresenceTracker};
pub use types::{
    ActivityEvent, BuddyRelation, Consents, LearningSession, NotificationEvent,
    NotificationKind, PresenceChangeEvent, PresenceKind, Profile, RelationStatus,
    SessionStatus, TimeSlot,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
