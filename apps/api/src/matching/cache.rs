//! Persistent match-result cache keyed by (user, position).
//!
//! Writes are last-write-wins upserts; readers validate freshness themselves
//! via [`MatchCacheEntry::is_fresh`], so concurrent recomputes of the same
//! pair are harmless.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

use crate::errors::AppError;
use crate::matching::aggregator::MatchOutcome;
use crate::models::match_cache::{MatchCacheEntry, MatchCacheStats};

/// In-process hit/miss counters. A fresh entry on lookup is a hit; anything
/// else (absent, stale, expired) is a miss.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub async fn lookup(
    pool: &PgPool,
    user_id: i64,
    position_id: &str,
) -> Result<Option<MatchCacheEntry>, AppError> {
    let entry = sqlx::query_as::<_, MatchCacheEntry>(
        "SELECT * FROM match_cache WHERE user_id = $1 AND position_id = $2",
    )
    .bind(user_id)
    .bind(position_id)
    .fetch_optional(pool)
    .await?;
    Ok(entry)
}

/// Stores a computed outcome, overwriting any previous row for the pair.
#[allow(clippy::too_many_arguments)]
pub async fn put(
    pool: &PgPool,
    user_id: i64,
    position_id: &str,
    outcome: &MatchOutcome,
    profile_version: i64,
    position_version: i64,
    expires_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO match_cache
            (user_id, position_id, match_score, hard_score, soft_score,
             star_level, match_level, is_eligible, match_details,
             unmatch_reasons, suggestions, profile_version, position_version,
             expires_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
        ON CONFLICT (user_id, position_id) DO UPDATE SET
            match_score = EXCLUDED.match_score,
            hard_score = EXCLUDED.hard_score,
            soft_score = EXCLUDED.soft_score,
            star_level = EXCLUDED.star_level,
            match_level = EXCLUDED.match_level,
            is_eligible = EXCLUDED.is_eligible,
            match_details = EXCLUDED.match_details,
            unmatch_reasons = EXCLUDED.unmatch_reasons,
            suggestions = EXCLUDED.suggestions,
            profile_version = EXCLUDED.profile_version,
            position_version = EXCLUDED.position_version,
            expires_at = EXCLUDED.expires_at,
            updated_at = now()
        "#,
    )
    .bind(user_id)
    .bind(position_id)
    .bind(outcome.match_score)
    .bind(outcome.hard_score)
    .bind(outcome.soft_score)
    .bind(outcome.star_level)
    .bind(&outcome.match_level)
    .bind(outcome.is_eligible)
    .bind(Json(&outcome.details))
    .bind(Json(&outcome.unmatch_reasons))
    .bind(Json(&outcome.suggestions))
    .bind(profile_version)
    .bind(position_version)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Drops every cached result for a user. Called when the profile or the
/// preferences change.
pub async fn invalidate_by_user(pool: &PgPool, user_id: i64) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM match_cache WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    debug!("invalidated {} cached matches for user {user_id}", result.rows_affected());
    Ok(result.rows_affected())
}

/// Drops every cached result for a position. Called after a re-parse updates
/// the position.
pub async fn invalidate_by_position(pool: &PgPool, position_id: &str) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM match_cache WHERE position_id = $1")
        .bind(position_id)
        .execute(pool)
        .await?;
    debug!(
        "invalidated {} cached matches for position {position_id}",
        result.rows_affected()
    );
    Ok(result.rows_affected())
}

/// Deletes expired rows. Run periodically from the background sweeper.
pub async fn sweep_expired(pool: &PgPool) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM match_cache WHERE expires_at < now()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Aggregate statistics over the whole cache table plus the in-process hit
/// rate.
pub async fn stats(pool: &PgPool, counters: &CacheCounters) -> Result<MatchCacheStats, AppError> {
    let (total, expired, avg_match_score, eligible_rate): (i64, i64, Option<f64>, Option<f64>) =
        sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE expires_at < now()),
                AVG(match_score)::float8,
                AVG(CASE WHEN is_eligible THEN 1.0 ELSE 0.0 END)::float8
            FROM match_cache
            "#,
        )
        .fetch_one(pool)
        .await?;

    Ok(MatchCacheStats {
        total,
        expired,
        hit_rate: counters.hit_rate(),
        avg_match_score: avg_match_score.unwrap_or(0.0),
        eligible_rate: eligible_rate.unwrap_or(0.0),
    })
}
