//! Durable ingestion queue backed by Postgres.
//!
//! Discovery is idempotent on `external_id`. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never hand out the same
//! record twice, and status transitions are conditional updates so a stale
//! writer loses instead of regressing the status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::errors::AppError;
use crate::models::ingestion::{
    CrawlStatus, IngestionRecord, ParseStep, ParseSummary, ParseTask, ParseTaskStatus,
};

/// An announcement found on a list page, before any detail crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredRecord {
    pub external_id: String,
    pub title: String,
    pub list_url: Option<String>,
    #[serde(default)]
    pub region_code: String,
    #[serde(default)]
    pub exam_type: String,
    pub year: i32,
    #[serde(default)]
    pub sync_to_position: bool,
}

/// Queue depth per status, for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionStats {
    pub pending: i64,
    pub list_crawled: i64,
    pub detail_crawled: i64,
    pub tasks_pending: i64,
    pub tasks_running: i64,
    pub tasks_completed: i64,
    pub tasks_failed: i64,
}

/// Inserts newly discovered records; re-discovery of a known `external_id`
/// is a no-op. Returns how many rows were actually inserted.
pub async fn discover(pool: &PgPool, records: &[DiscoveredRecord]) -> Result<u64, AppError> {
    let mut inserted = 0;
    for r in records {
        // A record arriving with its page URL was found on a list page and
        // is already list-crawled; one carrying only codes stays pending
        // until the discover step derives a URL for it.
        let status = if r.list_url.is_some() {
            CrawlStatus::ListCrawled
        } else {
            CrawlStatus::Pending
        };
        let result = sqlx::query(
            r#"
            INSERT INTO ingestion_records
                (external_id, title, list_url, region_code, exam_type, year,
                 crawl_status, sync_to_position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(&r.external_id)
        .bind(&r.title)
        .bind(&r.list_url)
        .bind(&r.region_code)
        .bind(&r.exam_type)
        .bind(r.year)
        .bind(status)
        .bind(r.sync_to_position)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    if inserted > 0 {
        info!("discovered {inserted} new ingestion records");
    }
    Ok(inserted)
}

/// Claims up to `limit` unclaimed records that still need a detail crawl
/// and have no parse task yet. `SKIP LOCKED` keeps concurrent claimers from
/// blocking on each other.
pub async fn claim_batch(pool: &PgPool, limit: i64) -> Result<Vec<IngestionRecord>, AppError> {
    let records = sqlx::query_as::<_, IngestionRecord>(
        r#"
        UPDATE ingestion_records SET claimed_at = now(), updated_at = now()
        WHERE id IN (
            SELECT id FROM ingestion_records r
            WHERE r.claimed_at IS NULL
              AND r.crawl_status <> 'detail_crawled'
              AND NOT EXISTS (SELECT 1 FROM parse_tasks t WHERE t.record_id = r.id)
            ORDER BY r.id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Returns a claimed record to the queue without changing its status.
pub async fn release(pool: &PgPool, record_id: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE ingestion_records SET claimed_at = NULL, updated_at = now() WHERE id = $1")
        .bind(record_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Releases records claimed before `cutoff`. Recovers work lost to a worker
/// that died mid-crawl.
pub async fn release_stale_claims(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE ingestion_records SET claimed_at = NULL, updated_at = now() WHERE claimed_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        info!("released {} stale ingestion claims", result.rows_affected());
    }
    Ok(result.rows_affected())
}

/// Advances crawl status from `from` to `to`, storing any URLs resolved
/// along the way. Fails with a conflict when the record is not in `from`,
/// so status never moves backwards.
pub async fn advance_status(
    pool: &PgPool,
    record_id: i64,
    from: CrawlStatus,
    to: CrawlStatus,
    original_url: Option<&str>,
    final_url: Option<&str>,
) -> Result<(), AppError> {
    if to < from {
        return Err(AppError::Conflict(format!(
            "crawl status cannot move backwards on record {record_id}"
        )));
    }
    let result = sqlx::query(
        r#"
        UPDATE ingestion_records SET
            crawl_status = $1,
            original_url = COALESCE($2, original_url),
            final_url = COALESCE($3, final_url),
            updated_at = now()
        WHERE id = $4 AND crawl_status = $5
        "#,
    )
    .bind(to)
    .bind(original_url)
    .bind(final_url)
    .bind(record_id)
    .bind(from)
    .execute(pool)
    .await?;
    if result.rows_affected() != 1 {
        return Err(AppError::Conflict(format!(
            "record {record_id} is no longer in status {from:?}"
        )));
    }
    debug!("record {record_id} advanced {from:?} -> {to:?}");
    Ok(())
}

/// Persists resolved URLs on the record so a resumed task does not redo the
/// resolution steps.
pub async fn store_urls(
    pool: &PgPool,
    record_id: i64,
    original_url: Option<&str>,
    final_url: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE ingestion_records SET
            original_url = COALESCE($1, original_url),
            final_url = COALESCE($2, final_url),
            updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(original_url)
    .bind(final_url)
    .bind(record_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Stores the list-page URL the discover step derived for a pending record.
pub async fn store_list_url(pool: &PgPool, record_id: i64, url: &str) -> Result<(), AppError> {
    sqlx::query("UPDATE ingestion_records SET list_url = $1, updated_at = now() WHERE id = $2")
        .bind(url)
        .bind(record_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Links the record to its lead position and flags it as synced. The flag
/// is what downstream consumers filter on for fully ingested announcements.
pub async fn mark_synced(
    pool: &PgPool,
    record_id: i64,
    position_id: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE ingestion_records SET
            linked_position_id = $1,
            sync_to_position = TRUE,
            updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(position_id)
    .bind(record_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_record(pool: &PgPool, record_id: i64) -> Result<IngestionRecord, AppError> {
    sqlx::query_as::<_, IngestionRecord>("SELECT * FROM ingestion_records WHERE id = $1")
        .bind(record_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ingestion record {record_id}")))
}

// ---- parse tasks ----

/// Creates a pending parse task for a record. A record with a non-terminal
/// task already queued does not get a second one.
pub async fn create_task(pool: &PgPool, record_id: i64) -> Result<ParseTask, AppError> {
    let open: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM parse_tasks
        WHERE record_id = $1 AND status IN ('pending', 'running', 'parsing')
        LIMIT 1
        "#,
    )
    .bind(record_id)
    .fetch_optional(pool)
    .await?;
    if let Some(task_id) = open {
        return Err(AppError::Conflict(format!(
            "record {record_id} already has open parse task {task_id}"
        )));
    }

    let task = sqlx::query_as::<_, ParseTask>(
        r#"
        INSERT INTO parse_tasks (record_id, status, message, steps, summary)
        VALUES ($1, 'pending', '', '[]'::jsonb, '{"positions_created":0,"positions_updated":0}'::jsonb)
        RETURNING *
        "#,
    )
    .bind(record_id)
    .fetch_one(pool)
    .await?;
    info!("created parse task {} for record {record_id}", task.id);
    Ok(task)
}

pub async fn get_task(pool: &PgPool, task_id: i64) -> Result<ParseTask, AppError> {
    sqlx::query_as::<_, ParseTask>("SELECT * FROM parse_tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("parse task {task_id}")))
}

/// Claims the oldest pending task, marking it running. Returns None when
/// the queue is empty.
pub async fn claim_next_task(pool: &PgPool) -> Result<Option<ParseTask>, AppError> {
    let task = sqlx::query_as::<_, ParseTask>(
        r#"
        UPDATE parse_tasks SET status = 'running', updated_at = now()
        WHERE id = (
            SELECT id FROM parse_tasks
            WHERE status = 'pending'
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .fetch_optional(pool)
    .await?;
    Ok(task)
}

/// Persists the task's step array. Called before and after every step so a
/// crash leaves an accurate trail to resume from.
pub async fn save_steps(
    pool: &PgPool,
    task_id: i64,
    status: ParseTaskStatus,
    steps: &[ParseStep],
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE parse_tasks SET status = $1, steps = $2, updated_at = now() WHERE id = $3",
    )
    .bind(status)
    .bind(Json(steps))
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finish_task(
    pool: &PgPool,
    task_id: i64,
    status: ParseTaskStatus,
    message: &str,
    steps: &[ParseStep],
    summary: &ParseSummary,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE parse_tasks SET
            status = $1, message = $2, steps = $3, summary = $4, updated_at = now()
        WHERE id = $5
        "#,
    )
    .bind(status)
    .bind(message)
    .bind(Json(steps))
    .bind(Json(summary))
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Reopens tasks left mid-run by a dead worker so another worker can resume
/// them. Recorded steps are kept; the runner skips the done ones.
pub async fn requeue_interrupted_tasks(pool: &PgPool) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE parse_tasks SET status = 'pending', updated_at = now() WHERE status IN ('running', 'parsing')",
    )
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        info!("requeued {} interrupted parse tasks", result.rows_affected());
    }
    Ok(result.rows_affected())
}

pub async fn stats(pool: &PgPool) -> Result<IngestionStats, AppError> {
    let (pending, list_crawled, detail_crawled): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE crawl_status = 'pending'),
            COUNT(*) FILTER (WHERE crawl_status = 'list_crawled'),
            COUNT(*) FILTER (WHERE crawl_status = 'detail_crawled')
        FROM ingestion_records
        "#,
    )
    .fetch_one(pool)
    .await?;
    let (tasks_pending, tasks_running, tasks_completed, tasks_failed): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status IN ('running', 'parsing')),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM parse_tasks
            "#,
        )
        .fetch_one(pool)
        .await?;

    Ok(IngestionStats {
        pending,
        list_crawled,
        detail_crawled,
        tasks_pending,
        tasks_running,
        tasks_completed,
        tasks_failed,
    })
}

/// Scheduler loop: revives stale claims, then claims records that still
/// need a detail crawl and queues a parse task for each. The claim covers
/// only the window between selection and task creation; once the task row
/// exists, the open-task check in [`create_task`] is the duplicate guard.
pub async fn run_claimer(
    pool: PgPool,
    batch: i64,
    interval: std::time::Duration,
    stale_after: chrono::Duration,
    shutdown: crate::ingestion::runner::CancelFlag,
) {
    loop {
        if shutdown.is_cancelled() {
            info!("record claimer shutting down");
            return;
        }
        if let Err(e) = release_stale_claims(&pool, Utc::now() - stale_after).await {
            error!("stale claim release failed: {e}");
        }
        match claim_batch(&pool, batch).await {
            Ok(records) => {
                for record in records {
                    match create_task(&pool, record.id).await {
                        Ok(task) => {
                            debug!("queued parse task {} for record {}", task.id, record.id)
                        }
                        // Lost the race to an operator-created task.
                        Err(AppError::Conflict(_)) => {}
                        Err(e) => error!("task creation failed for record {}: {e}", record.id),
                    }
                    if let Err(e) = release(&pool, record.id).await {
                        error!("claim release failed for record {}: {e}", record.id);
                    }
                }
            }
            Err(e) => error!("record claim failed: {e}"),
        }
        tokio::time::sleep(interval).await;
    }
}
