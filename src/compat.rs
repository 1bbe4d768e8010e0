//! Peer compatibility scoring
//!
//! A pure, total, deterministic multi-factor score for a (requester,
//! candidate) pair. No I/O, no randomness, and no errors: every division
//! is guarded and missing collections count as empty, so the function
//! returns a value in [0, 1] for any pair of valid profiles.
//!
//! The responsiveness term reads only the candidate's value. This is
//! intentional: discovery should favor peers who answer, regardless of
//! how responsive the requester is.

use chrono::{DateTime, Utc};

use crate::types::Profile;

/// Weight of each sub-score; they sum to 1.0.
pub const WEIGHT_COMMON_COURSES: f64 = 0.25;
pub const WEIGHT_PROGRESSION: f64 = 0.20;
pub const WEIGHT_ACTIVITY: f64 = 0.15;
pub const WEIGHT_STUDY_TIME: f64 = 0.15;
pub const WEIGHT_SOCIAL: f64 = 0.10;
pub const WEIGHT_GAMIFICATION: f64 = 0.10;
pub const WEIGHT_RESPONSIVENESS: f64 = 0.05;

/// Result of scoring one candidate against a requester
#[derive(Debug, Clone, PartialEq)]
pub struct Compatibility {
    /// Weighted total in [0, 1]
    pub score: f64,
    /// Human-readable match reasons, in check order
    pub reasons: Vec<String>,
}

/// Score `candidate` as a study buddy for `requester` at the given instant.
///
/// `now` only feeds the activity-recency term; passing it explicitly keeps
/// the function deterministic and testable.
pub fn score_at(requester: &Profile, candidate: &Profile, now: DateTime<Utc>) -> Compatibility {
    let common = common_courses(requester, candidate);
    let progression = progression_similarity(requester, candidate);
    let activity = activity_level(requester, candidate, now);
    let study_time = study_time_compatibility(requester, candidate);
    let social = social_compatibility(requester, candidate);
    let gamification = gamification_alignment(requester, candidate);
    let responsiveness = f64::from(candidate.responsiveness) / 100.0;

    let score = common * WEIGHT_COMMON_COURSES
        + progression * WEIGHT_PROGRESSION
        + activity * WEIGHT_ACTIVITY
        + study_time * WEIGHT_STUDY_TIME
        + social * WEIGHT_SOCIAL
        + gamification * WEIGHT_GAMIFICATION
        + responsiveness * WEIGHT_RESPONSIVENESS;

    Compatibility {
        score: score.clamp(0.0, 1.0),
        reasons: reasons(requester, candidate, now),
    }
}

/// Convenience wrapper over [`score_at`] using the current time
pub fn score(requester: &Profile, candidate: &Profile) -> Compatibility {
    score_at(requester, candidate, Utc::now())
}

/// Shared-course ratio with a bonus for three or more shared courses
fn common_courses(a: &Profile, b: &Profile) -> f64 {
    let larger = a.courses.len().max(b.courses.len());
    if larger == 0 {
        return 0.0;
    }
    let shared = a.courses.intersection(&b.courses).count();
    let mut score = shared as f64 / larger as f64;
    if shared >= 3 {
        score += 0.2;
    }
    score.min(1.0)
}

/// Blend of level proximity and per-course lesson progress proximity
fn progression_similarity(a: &Profile, b: &Profile) -> f64 {
    let level_gap = f64::from(a.level.abs_diff(b.level));
    let level_similarity = (1.0 - level_gap / 20.0).max(0.0);

    let shared: Vec<&String> = a.courses.intersection(&b.courses).collect();
    let lesson_similarity = if shared.is_empty() {
        0.0
    } else {
        let total: f64 = shared
            .iter()
            .map(|course| {
                let lessons_a = a.completed_lessons.get(*course).copied().unwrap_or(0);
                let lessons_b = b.completed_lessons.get(*course).copied().unwrap_or(0);
                let gap = f64::from(lessons_a.abs_diff(lessons_b));
                let scale = f64::from(lessons_a.max(lessons_b).max(10));
                1.0 - gap / scale
            })
            .sum();
        total / shared.len() as f64
    };

    0.4 * level_similarity + 0.6 * lesson_similarity
}

/// How recently both sides were active, plus session-length match
fn activity_level(a: &Profile, b: &Profile, now: DateTime<Utc>) -> f64 {
    let duration_gap = (a.avg_session_minutes - b.avg_session_minutes).abs();
    let duration_match = (1.0 - duration_gap / 120.0).max(0.0);
    0.3 * recency(a, now) + 0.3 * recency(b, now) + 0.4 * duration_match
}

/// 1.0 for activity right now, decaying to 0 over a week
fn recency(profile: &Profile, now: DateTime<Utc>) -> f64 {
    let days = days_since(profile.last_activity_at, now);
    (1.0 - days / 7.0).max(0.0)
}

fn days_since(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - then).num_seconds().max(0);
    seconds as f64 / 86_400.0
}

/// Preferred-slot overlap; neutral 0.5 when neither side declared slots
fn study_time_compatibility(a: &Profile, b: &Profile) -> f64 {
    let larger = a.preferred_time_slots.len().max(b.preferred_time_slots.len());
    if larger == 0 {
        return 0.5;
    }
    let shared = a
        .preferred_time_slots
        .intersection(&b.preferred_time_slots)
        .count();
    shared as f64 / larger as f64
}

/// Helpfulness proximity with a bonus when either side is well-connected
fn social_compatibility(a: &Profile, b: &Profile) -> f64 {
    let gap = f64::from(a.helpfulness.abs_diff(b.helpfulness));
    let mut score = 1.0 - gap / 100.0;
    if a.existing_buddies.len().max(b.existing_buddies.len()) >= 5 {
        score += 0.2;
    }
    score.min(1.0)
}

/// Badge overlap plus XP proximity
fn gamification_alignment(a: &Profile, b: &Profile) -> f64 {
    let badge_overlap = if a.badges.is_empty() && b.badges.is_empty() {
        0.5
    } else {
        let shared = a.badges.intersection(&b.badges).count();
        let union = a.badges.union(&b.badges).count();
        shared as f64 / union.max(1) as f64
    };

    let xp_gap = f64::from(a.total_xp.abs_diff(b.total_xp));
    let xp_scale = f64::from(a.total_xp.max(b.total_xp).max(1000));
    let xp_similarity = 1.0 - (xp_gap / xp_scale).min(1.0);

    0.6 * badge_overlap + 0.4 * xp_similarity
}

/// Build the reason tags, in fixed check order
fn reasons(requester: &Profile, candidate: &Profile, now: DateTime<Utc>) -> Vec<String> {
    let mut reasons = Vec::new();

    let shared_courses = requester.courses.intersection(&candidate.courses).count();
    if shared_courses >= 2 {
        reasons.push(format!("{shared_courses} courses in common"));
    }
    if requester.level.abs_diff(candidate.level) <= 3 {
        reasons.push("similar level".to_string());
    }
    let shared_slots = requester
        .preferred_time_slots
        .intersection(&candidate.preferred_time_slots)
        .count();
    if shared_slots >= 2 {
        reasons.push("matching study times".to_string());
    }
    if candidate.responsiveness >= 80 {
        reasons.push("responds quickly".to_string());
    }
    if candidate.helpfulness >= 80 {
        reasons.push("known to be helpful".to_string());
    }
    if days_since(candidate.last_activity_at, now) <= 1.0 {
        reasons.push("recently active".to_string());
    }

    reasons
}
