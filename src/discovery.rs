//! Peer discovery ranking
//!
//! Filters a candidate pool through relation exclusions, scores the rest
//! with the compatibility engine, and returns a deterministic ranking.
//! An empty pool or a fully-excluded pool yields an empty list, never an
//! error.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::compat;
use crate::error::{CoreError, CoreResult};
use crate::store::{ProfileStore, RelationStore};
use crate::types::{BuddyRelation, Profile, RelationStatus};

/// A scored candidate, recomputed per request and never persisted
#[derive(Debug, Clone)]
pub struct DiscoveryCandidate {
    pub profile: Profile,
    /// Compatibility score in [0, 1]
    pub score: f64,
    /// Match reasons, in check order
    pub reasons: Vec<String>,
}

/// Rank `pool` as study-buddy candidates for `requester`.
///
/// Excluded: the requester themself, archived profiles, and anyone the
/// requester already has a pending or accepted relation with. The output
/// is sorted by score descending with ties broken by user id ascending,
/// then truncated to `limit`.
pub fn rank(
    requester: &Profile,
    pool: &[Profile],
    relations: &[BuddyRelation],
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<DiscoveryCandidate> {
    let excluded: HashSet<&str> = relations
        .iter()
        .filter(|r| {
            r.user_id == requester.user_id
                && matches!(r.status, RelationStatus::Pending | RelationStatus::Accepted)
        })
        .map(|r| r.buddy_id.as_str())
        .collect();

    let mut candidates: Vec<DiscoveryCandidate> = pool
        .iter()
        .filter(|p| p.user_id != requester.user_id)
        .filter(|p| !p.archived)
        .filter(|p| !excluded.contains(p.user_id.as_str()))
        .map(|p| {
            let result = compat::score_at(requester, p, now);
            DiscoveryCandidate {
                profile: p.clone(),
                score: result.score,
                reasons: result.reasons,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        // scores are finite; totalize anyway so the sort never panics
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.profile.user_id.cmp(&b.profile.user_id))
    });
    candidates.truncate(limit);
    candidates
}

/// Discovery façade over the profile and relation stores
pub struct Discovery {
    profiles: Arc<dyn ProfileStore>,
    relations: Arc<dyn RelationStore>,
}

impl Discovery {
    pub fn new(profiles: Arc<dyn ProfileStore>, relations: Arc<dyn RelationStore>) -> Self {
        Self {
            profiles,
            relations,
        }
    }

    /// Ranked candidates for a user, as consumed by the "find peers" UI
    pub async fn discover(
        &self,
        user_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<DiscoveryCandidate>> {
        let requester = self
            .profiles
            .get(user_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("profile {user_id}")))?;
        let pool = self.profiles.list().await?;
        let relations = self.relations.list_for(user_id).await?;
        Ok(rank(&requester, &pool, &relations, limit, Utc::now()))
    }
}
