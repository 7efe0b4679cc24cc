use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Per-condition result of evaluating a profile against one position
/// requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetail {
    pub condition: String,
    pub user_value: String,
    pub required: String,
    pub is_match: bool,
    /// Whether this condition gates eligibility.
    pub is_hard_match: bool,
    pub score: i32,
    pub max_score: i32,
    pub weight: i32,
}

/// Persistent match result keyed by (user, position).
///
/// Freshness contract: the entry is only valid when the stored
/// `profile_version` and `position_version` equal the current versions of
/// both entities and `expires_at` is in the future. Stale entries
/// self-invalidate on the next read; writers never invalidate peers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchCacheEntry {
    pub id: i64,
    pub user_id: i64,
    pub position_id: String,
    pub match_score: i32,
    pub hard_score: i32,
    pub soft_score: i32,
    pub star_level: i32,
    pub match_level: String,
    pub is_eligible: bool,
    pub match_details: Json<Vec<MatchDetail>>,
    pub unmatch_reasons: Json<Vec<String>>,
    pub suggestions: Json<Vec<String>>,
    pub profile_version: i64,
    pub position_version: i64,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchCacheEntry {
    /// Freshness predicate from the cache contract: stored versions equal
    /// current versions and the TTL has not elapsed.
    pub fn is_fresh(&self, profile_version: i64, position_version: i64, now: DateTime<Utc>) -> bool {
        self.profile_version == profile_version
            && self.position_version == position_version
            && now < self.expires_at
    }
}

/// Rolling cache statistics. Hit rate comes from in-process counters; the
/// rest is aggregated from the table.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCacheStats {
    pub total: i64,
    pub expired: i64,
    pub hit_rate: f64,
    pub avg_match_score: f64,
    pub eligible_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(profile_version: i64, position_version: i64, expires_at: DateTime<Utc>) -> MatchCacheEntry {
        MatchCacheEntry {
            id: 1,
            user_id: 7,
            position_id: "p-1".to_string(),
            match_score: 88,
            hard_score: 90,
            soft_score: 80,
            star_level: 5,
            match_level: "极高".to_string(),
            is_eligible: true,
            match_details: Json(vec![]),
            unmatch_reasons: Json(vec![]),
            suggestions: Json(vec![]),
            profile_version,
            position_version,
            expires_at,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_fresh_when_versions_match_and_not_expired() {
        let now = Utc::now();
        let e = entry(10, 20, now + Duration::hours(1));
        assert!(e.is_fresh(10, 20, now));
    }

    #[test]
    fn test_stale_on_profile_version_mismatch() {
        let now = Utc::now();
        let e = entry(10, 20, now + Duration::hours(1));
        assert!(!e.is_fresh(11, 20, now));
    }

    #[test]
    fn test_stale_on_position_version_mismatch() {
        let now = Utc::now();
        let e = entry(10, 20, now + Duration::hours(1));
        assert!(!e.is_fresh(10, 21, now));
    }

    #[test]
    fn test_stale_when_expired_even_with_matching_versions() {
        let now = Utc::now();
        let e = entry(10, 20, now - Duration::seconds(1));
        assert!(!e.is_fresh(10, 20, now));
    }
}
