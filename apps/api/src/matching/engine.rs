//! Read-through match engine: cache lookup, freshness check, recompute on
//! miss, last-write-wins store.

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::debug;

use crate::errors::AppError;
use crate::matching::aggregator::{aggregate, MatchOutcome};
use crate::matching::cache::{self, CacheCounters};
use crate::matching::evaluator::evaluate;
use crate::models::match_cache::{MatchCacheEntry, MatchCacheStats, MatchDetail};
use crate::models::position::Position;
use crate::models::profile::{MatchStrategy, UserPreference, UserProfile};

/// Match result returned to clients. Either replayed from a fresh cache
/// entry or freshly computed.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    pub position_id: String,
    pub match_score: i32,
    pub hard_score: i32,
    pub soft_score: i32,
    pub star_level: i32,
    pub match_level: String,
    pub is_eligible: bool,
    pub match_details: Vec<MatchDetail>,
    pub unmatch_reasons: Vec<String>,
    pub suggestions: Vec<String>,
    pub from_cache: bool,
}

impl MatchResponse {
    fn from_entry(entry: MatchCacheEntry) -> Self {
        MatchResponse {
            position_id: entry.position_id,
            match_score: entry.match_score,
            hard_score: entry.hard_score,
            soft_score: entry.soft_score,
            star_level: entry.star_level,
            match_level: entry.match_level,
            is_eligible: entry.is_eligible,
            match_details: entry.match_details.0,
            unmatch_reasons: entry.unmatch_reasons.0,
            suggestions: entry.suggestions.0,
            from_cache: true,
        }
    }

    fn from_outcome(position_id: String, outcome: MatchOutcome) -> Self {
        MatchResponse {
            position_id,
            match_score: outcome.match_score,
            hard_score: outcome.hard_score,
            soft_score: outcome.soft_score,
            star_level: outcome.star_level,
            match_level: outcome.match_level,
            is_eligible: outcome.is_eligible,
            match_details: outcome.details,
            unmatch_reasons: outcome.unmatch_reasons,
            suggestions: outcome.suggestions,
            from_cache: false,
        }
    }
}

pub struct MatchEngine {
    pool: PgPool,
    counters: CacheCounters,
    /// Cache lifetime for entries computed without user preferences.
    ttl: Duration,
    /// Shorter lifetime when preferences contributed to the result, since
    /// preference changes are not captured by the version pair.
    short_ttl: Duration,
}

impl MatchEngine {
    pub fn new(pool: PgPool, ttl_days: i64, short_ttl_days: i64) -> Self {
        MatchEngine {
            pool,
            counters: CacheCounters::default(),
            ttl: Duration::days(ttl_days),
            short_ttl: Duration::days(short_ttl_days),
        }
    }

    async fn load_profile(&self, user_id: i64) -> Result<UserProfile, AppError> {
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("profile for user {user_id}")))
    }

    async fn load_preference(&self, user_id: i64) -> Result<Option<UserPreference>, AppError> {
        let pref =
            sqlx::query_as::<_, UserPreference>("SELECT * FROM user_preferences WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(pref)
    }

    async fn load_position(&self, position_id: &str) -> Result<Position, AppError> {
        sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE position_id = $1")
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("position {position_id}")))
    }

    /// Computes (or replays) the match for one (user, position) pair.
    ///
    /// `force` skips the cache read but still writes the result back.
    /// `strategy` overrides the user's stored strategy for this call only.
    pub async fn compute(
        &self,
        user_id: i64,
        position_id: &str,
        strategy: Option<MatchStrategy>,
        force: bool,
    ) -> Result<MatchResponse, AppError> {
        let profile = self.load_profile(user_id).await?;
        let position = self.load_position(position_id).await?;
        let now = Utc::now();

        if !force {
            if let Some(entry) = cache::lookup(&self.pool, user_id, position_id).await? {
                if entry.is_fresh(profile.version(), position.version(), now) {
                    self.counters.record_hit();
                    debug!("match cache hit for user {user_id} position {position_id}");
                    return Ok(MatchResponse::from_entry(entry));
                }
            }
        }
        self.counters.record_miss();

        let preference = self.load_preference(user_id).await?;
        let effective = strategy
            .or_else(|| preference.as_ref().map(|p| p.match_strategy))
            .unwrap_or_default();

        let eval = evaluate(
            &profile,
            preference.as_ref(),
            &position,
            effective,
            now.date_naive(),
        );
        let outcome = aggregate(eval);

        let ttl = if preference.is_some() { self.short_ttl } else { self.ttl };
        cache::put(
            &self.pool,
            user_id,
            position_id,
            &outcome,
            profile.version(),
            position.version(),
            now + ttl,
        )
        .await?;

        Ok(MatchResponse::from_outcome(position_id.to_string(), outcome))
    }

    /// Computes matches for many positions, best first.
    pub async fn compute_batch(
        &self,
        user_id: i64,
        position_ids: &[String],
        strategy: Option<MatchStrategy>,
        force: bool,
    ) -> Result<Vec<MatchResponse>, AppError> {
        let mut results = Vec::with_capacity(position_ids.len());
        for position_id in position_ids {
            match self.compute(user_id, position_id, strategy, force).await {
                Ok(r) => results.push(r),
                // A missing position in a batch is skipped, not fatal.
                Err(AppError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        results.sort_by(|a, b| b.match_score.cmp(&a.match_score));
        Ok(results)
    }

    pub async fn cache_stats(&self) -> Result<MatchCacheStats, AppError> {
        cache::stats(&self.pool, &self.counters).await
    }

    pub async fn sweep_expired(&self) -> Result<u64, AppError> {
        cache::sweep_expired(&self.pool).await
    }

    pub async fn invalidate_user(&self, user_id: i64) -> Result<u64, AppError> {
        cache::invalidate_by_user(&self.pool, user_id).await
    }

    pub async fn invalidate_position(&self, position_id: &str) -> Result<u64, AppError> {
        cache::invalidate_by_position(&self.pool, position_id).await
    }
}
