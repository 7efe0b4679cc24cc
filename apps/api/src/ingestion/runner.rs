//! Parse task execution: the six-step pipeline turning a crawled record into
//! persisted positions.
//!
//! Every step is appended to the task's step array and saved BEFORE it runs,
//! then updated in place when it finishes. A worker that dies mid-task
//! leaves an accurate trail; the next worker resumes at the first step that
//! is not done. Transient failures retry with exponential backoff inside the
//! step; permanent failures fail the whole task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::calendar::projection;
use crate::errors::AppError;
use crate::ingestion::fetcher::ContentFetcher;
use crate::ingestion::queue;
use crate::ingestion::resolver::ListPageResolver;
use crate::llm_client::{AnnouncementParser, ParsedAnnouncement};
use crate::matching::cache;
use crate::models::ingestion::{
    is_canonical_prefix, resume_index, CrawlStatus, IngestionRecord, ParseStep, ParseSummary,
    ParseTask, ParseTaskStatus, StepName, StepStatus,
};
use crate::models::position::{Position, PositionUpsert};
use crate::positions::store;

/// Exponential backoff for transient step failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts already ran.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let secs = self.base_delay.as_secs_f64()
            * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

/// Step failure classification. Transient failures retry; permanent ones
/// fail the task immediately.
#[derive(Debug)]
pub enum StepFailure {
    Transient(String),
    Permanent(String),
}

impl StepFailure {
    fn message(&self) -> &str {
        match self {
            StepFailure::Transient(m) | StepFailure::Permanent(m) => m,
        }
    }
}

/// Retries `op` per the policy. Returns the value plus the attempt count,
/// or the last failure once attempts are exhausted or a permanent failure
/// occurs.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<(T, u32), (StepFailure, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StepFailure>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(v) => return Ok((v, attempts)),
            Err(StepFailure::Permanent(m)) => return Err((StepFailure::Permanent(m), attempts)),
            Err(StepFailure::Transient(m)) => {
                if attempts >= policy.max_attempts {
                    return Err((StepFailure::Transient(m), attempts));
                }
                let delay = policy.next_delay(attempts);
                warn!("transient step failure (attempt {attempts}): {m}; retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Cooperative cancellation, checked at step boundaries only. A running
/// step always finishes or fails on its own.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tracks the cancel flag of every in-flight task so the cancel endpoint
/// can reach it.
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry(Arc<std::sync::Mutex<std::collections::HashMap<i64, CancelFlag>>>);

impl CancelRegistry {
    pub fn register(&self, task_id: i64) -> CancelFlag {
        let flag = CancelFlag::default();
        self.0.lock().unwrap().insert(task_id, flag.clone());
        flag
    }

    pub fn remove(&self, task_id: i64) {
        self.0.lock().unwrap().remove(&task_id);
    }

    /// Cancels a running task. Returns false when the task is not in
    /// flight on this process.
    pub fn cancel(&self, task_id: i64) -> bool {
        match self.0.lock().unwrap().get(&task_id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }
}

/// Persistence seam for the runner: everything the steps read and write
/// goes through here, so the pipeline can run against an in-memory double.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load_record(&self, record_id: i64) -> Result<IngestionRecord, AppError>;

    async fn save_steps(
        &self,
        task_id: i64,
        status: ParseTaskStatus,
        steps: &[ParseStep],
    ) -> Result<(), AppError>;

    async fn finish_task(
        &self,
        task_id: i64,
        status: ParseTaskStatus,
        message: &str,
        steps: &[ParseStep],
        summary: &ParseSummary,
    ) -> Result<(), AppError>;

    async fn store_list_url(&self, record_id: i64, url: &str) -> Result<(), AppError>;

    async fn store_urls(
        &self,
        record_id: i64,
        original_url: Option<&str>,
        final_url: Option<&str>,
    ) -> Result<(), AppError>;

    async fn advance_status(
        &self,
        record_id: i64,
        from: CrawlStatus,
        to: CrawlStatus,
    ) -> Result<(), AppError>;

    async fn persist_positions(
        &self,
        items: &[PositionUpsert],
    ) -> Result<(ParseSummary, Vec<(Position, bool)>), AppError>;

    /// Links the record to its lead position and flags it as synced.
    async fn mark_synced(&self, record_id: i64, position_id: &str) -> Result<(), AppError>;

    /// Invalidates cached matches for an updated position and moves its
    /// projected calendar events to the new dates.
    async fn reconcile_updated(&self, position: &Position) -> Result<(), AppError>;
}

/// Production [`TaskStore`] over Postgres, delegating to the queue and the
/// position store.
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        PgTaskStore { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn load_record(&self, record_id: i64) -> Result<IngestionRecord, AppError> {
        queue::get_record(&self.pool, record_id).await
    }

    async fn save_steps(
        &self,
        task_id: i64,
        status: ParseTaskStatus,
        steps: &[ParseStep],
    ) -> Result<(), AppError> {
        queue::save_steps(&self.pool, task_id, status, steps).await
    }

    async fn finish_task(
        &self,
        task_id: i64,
        status: ParseTaskStatus,
        message: &str,
        steps: &[ParseStep],
        summary: &ParseSummary,
    ) -> Result<(), AppError> {
        queue::finish_task(&self.pool, task_id, status, message, steps, summary).await
    }

    async fn store_list_url(&self, record_id: i64, url: &str) -> Result<(), AppError> {
        queue::store_list_url(&self.pool, record_id, url).await
    }

    async fn store_urls(
        &self,
        record_id: i64,
        original_url: Option<&str>,
        final_url: Option<&str>,
    ) -> Result<(), AppError> {
        queue::store_urls(&self.pool, record_id, original_url, final_url).await
    }

    async fn advance_status(
        &self,
        record_id: i64,
        from: CrawlStatus,
        to: CrawlStatus,
    ) -> Result<(), AppError> {
        queue::advance_status(&self.pool, record_id, from, to, None, None).await
    }

    async fn persist_positions(
        &self,
        items: &[PositionUpsert],
    ) -> Result<(ParseSummary, Vec<(Position, bool)>), AppError> {
        store::upsert_many(&self.pool, items).await
    }

    async fn mark_synced(&self, record_id: i64, position_id: &str) -> Result<(), AppError> {
        queue::mark_synced(&self.pool, record_id, position_id).await
    }

    async fn reconcile_updated(&self, position: &Position) -> Result<(), AppError> {
        cache::invalidate_by_position(&self.pool, &position.position_id).await?;
        projection::reproject_position(&self.pool, position).await?;
        Ok(())
    }
}

/// Mutable state threaded through the steps. URLs are persisted on the
/// record; the parsed announcement is persisted in the llm_parse step data,
/// so a resumed task can rebuild this from storage.
#[derive(Default)]
struct RunContext {
    content: Option<String>,
    parsed: Option<ParsedAnnouncement>,
}

pub struct ParseRunner {
    store: Arc<dyn TaskStore>,
    fetcher: Arc<dyn ContentFetcher>,
    resolver: Arc<dyn ListPageResolver>,
    parser: Arc<dyn AnnouncementParser>,
    /// Global cap on concurrent language-model calls.
    llm_gate: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl ParseRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        fetcher: Arc<dyn ContentFetcher>,
        resolver: Arc<dyn ListPageResolver>,
        parser: Arc<dyn AnnouncementParser>,
        llm_gate: Arc<Semaphore>,
    ) -> Self {
        ParseRunner {
            store,
            fetcher,
            resolver,
            parser,
            llm_gate,
            retry: RetryPolicy::default(),
        }
    }

    /// Runs one task to a terminal status. Never returns Err for step
    /// failures; those are recorded on the task itself.
    pub async fn run_task(&self, task: ParseTask, cancel: &CancelFlag) -> Result<(), AppError> {
        let task_id = task.id;
        let mut steps = task.steps.0;
        if !is_canonical_prefix(&steps) {
            error!("parse task {task_id} has a corrupt step record");
            self.store
                .finish_task(
                    task_id,
                    ParseTaskStatus::Failed,
                    "corrupt step record",
                    &steps,
                    &ParseSummary::default(),
                )
                .await?;
            return Ok(());
        }

        let mut record = self.store.load_record(task.record_id).await?;
        let mut ctx = RunContext::default();
        // Replay the parsed payload from a completed llm_parse step.
        if let Some(step) = steps
            .iter()
            .find(|s| s.name == StepName::LlmParse && s.status.is_done())
        {
            if let Some(data) = &step.data {
                ctx.parsed = serde_json::from_value(data.clone()).ok();
            }
        }

        let start = resume_index(&steps);
        // Drop a trailing failed step; it is re-recorded by the retry.
        steps.truncate(start);
        let mut summary = ParseSummary::default();

        for name in StepName::CANONICAL_ORDER.into_iter().skip(start) {
            if cancel.is_cancelled() {
                info!("parse task {task_id} cancelled before {}", name.as_str());
                self.store
                    .finish_task(task_id, ParseTaskStatus::Failed, "cancelled", &steps, &summary)
                    .await?;
                return Ok(());
            }

            let running_status = if name == StepName::LlmParse {
                ParseTaskStatus::Parsing
            } else {
                ParseTaskStatus::Running
            };
            steps.push(ParseStep {
                name,
                status: StepStatus::Running,
                message: String::new(),
                data: None,
                attempts: 0,
                started_at: Utc::now(),
                finished_at: None,
                duration_ms: None,
            });
            self.store.save_steps(task_id, running_status, &steps).await?;

            let outcome = self.execute_step(name, &mut record, &mut ctx, &mut summary).await;
            let step = steps.last_mut().unwrap();
            let now = Utc::now();
            step.finished_at = Some(now);
            step.duration_ms = Some((now - step.started_at).num_milliseconds());

            match outcome {
                Ok(StepOutcome { skipped, message, data, attempts }) => {
                    step.status = if skipped { StepStatus::Skipped } else { StepStatus::Success };
                    step.message = message;
                    step.data = data;
                    step.attempts = attempts;
                    self.store.save_steps(task_id, running_status, &steps).await?;
                }
                Err((failure, attempts)) => {
                    step.status = StepStatus::Failed;
                    step.message = failure.message().to_string();
                    step.attempts = attempts;
                    let message = format!("{} failed: {}", name.as_str(), failure.message());
                    warn!("parse task {task_id}: {message}");
                    self.store
                        .finish_task(task_id, ParseTaskStatus::Failed, &message, &steps, &summary)
                        .await?;
                    return Ok(());
                }
            }
        }

        let message = format!(
            "created {}, updated {}",
            summary.positions_created, summary.positions_updated
        );
        info!("parse task {task_id} completed: {message}");
        self.store
            .finish_task(task_id, ParseTaskStatus::Completed, &message, &steps, &summary)
            .await?;
        Ok(())
    }

    async fn execute_step(
        &self,
        name: StepName,
        record: &mut IngestionRecord,
        ctx: &mut RunContext,
        summary: &mut ParseSummary,
    ) -> Result<StepOutcome, (StepFailure, u32)> {
        match name {
            StepName::DiscoverListUrl => self.step_discover(record).await,
            StepName::ResolveOriginalUrl => self.step_resolve_original(record, ctx).await,
            StepName::ResolveFinalUrl => self.step_resolve_final(record).await,
            StepName::FetchContent => self.step_fetch_content(record, ctx).await,
            StepName::LlmParse => self.step_llm_parse(ctx).await,
            StepName::Persist => self.step_persist(record, ctx, summary).await,
        }
    }

    /// Ensures the record has a page URL, deriving one from its codes when
    /// discovery only produced an external id or region filters.
    async fn step_discover(
        &self,
        record: &mut IngestionRecord,
    ) -> Result<StepOutcome, (StepFailure, u32)> {
        if let Some(url) = record.list_url.clone() {
            self.advance_to_list_crawled(record).await?;
            return Ok(StepOutcome::skipped(format!("list url known: {url}")));
        }
        let resolved = self.resolver.list_url(record).ok_or_else(|| {
            (
                StepFailure::Permanent(
                    "record has no list url and no codes to derive one".to_string(),
                ),
                1,
            )
        })?;
        self.store
            .store_list_url(record.id, &resolved.url)
            .await
            .map_err(|e| (StepFailure::Transient(e.to_string()), 1))?;
        record.list_url = Some(resolved.url.clone());
        self.advance_to_list_crawled(record).await?;
        Ok(StepOutcome::success(
            format!("derived via {:?}", resolved.source),
            Some(json!({ "list_url": resolved.url, "source": resolved.source })),
            1,
        ))
    }

    async fn advance_to_list_crawled(
        &self,
        record: &mut IngestionRecord,
    ) -> Result<(), (StepFailure, u32)> {
        if record.crawl_status != CrawlStatus::Pending {
            return Ok(());
        }
        self.store
            .advance_status(record.id, CrawlStatus::Pending, CrawlStatus::ListCrawled)
            .await
            .map_err(|e| (StepFailure::Transient(e.to_string()), 1))?;
        record.crawl_status = CrawlStatus::ListCrawled;
        Ok(())
    }

    async fn step_resolve_original(
        &self,
        record: &mut IngestionRecord,
        ctx: &mut RunContext,
    ) -> Result<StepOutcome, (StepFailure, u32)> {
        if let Some(url) = record.original_url.clone() {
            return Ok(StepOutcome::skipped(format!("already resolved: {url}")));
        }
        let list_url = record.list_url.clone().unwrap_or_default();

        // Cheap path first: no fetch when the list URL carries the target.
        let resolved = self
            .resolver
            .resolve_original_url(&list_url, None)
            .await
            .map_err(|e| (StepFailure::Permanent(e.to_string()), 1))?;
        let resolved = match resolved {
            Some(r) => r,
            None => {
                let fetcher = Arc::clone(&self.fetcher);
                let (page, _) = with_retry(&self.retry, || {
                    let fetcher = Arc::clone(&fetcher);
                    let url = list_url.clone();
                    async move {
                        fetcher.fetch(&url).await.map_err(|e| {
                            if e.is_transient() {
                                StepFailure::Transient(e.to_string())
                            } else {
                                StepFailure::Permanent(e.to_string())
                            }
                        })
                    }
                })
                .await?;
                ctx.content = None;
                self.resolver
                    .resolve_original_url(&list_url, Some(&page.body))
                    .await
                    .map_err(|e| (StepFailure::Permanent(e.to_string()), 1))?
                    .ok_or_else(|| {
                        (
                            StepFailure::Permanent("no original url found on page".to_string()),
                            1,
                        )
                    })?
            }
        };

        self.store
            .store_urls(record.id, Some(&resolved.url), None)
            .await
            .map_err(|e| (StepFailure::Transient(e.to_string()), 1))?;
        record.original_url = Some(resolved.url.clone());
        Ok(StepOutcome::success(
            format!("resolved via {:?}", resolved.source),
            Some(json!({ "original_url": resolved.url, "source": resolved.source })),
            1,
        ))
    }

    async fn step_resolve_final(
        &self,
        record: &mut IngestionRecord,
    ) -> Result<StepOutcome, (StepFailure, u32)> {
        if let Some(url) = record.final_url.clone() {
            return Ok(StepOutcome::skipped(format!("already resolved: {url}")));
        }
        let original = record.original_url.clone().ok_or_else(|| {
            (
                StepFailure::Permanent("no original url to resolve".to_string()),
                1,
            )
        })?;

        let fetcher = Arc::clone(&self.fetcher);
        let (final_url, attempts) = with_retry(&self.retry, || {
            let fetcher = Arc::clone(&fetcher);
            let url = original.clone();
            async move {
                fetcher.resolve_final_url(&url).await.map_err(|e| {
                    if e.is_transient() {
                        StepFailure::Transient(e.to_string())
                    } else {
                        StepFailure::Permanent(e.to_string())
                    }
                })
            }
        })
        .await?;

        self.store
            .store_urls(record.id, None, Some(&final_url))
            .await
            .map_err(|e| (StepFailure::Transient(e.to_string()), 1))?;
        record.final_url = Some(final_url.clone());
        Ok(StepOutcome::success(
            String::new(),
            Some(json!({ "final_url": final_url })),
            attempts,
        ))
    }

    async fn step_fetch_content(
        &self,
        record: &IngestionRecord,
        ctx: &mut RunContext,
    ) -> Result<StepOutcome, (StepFailure, u32)> {
        let url = record.final_url.clone().ok_or_else(|| {
            (StepFailure::Permanent("no final url to fetch".to_string()), 1)
        })?;

        let fetcher = Arc::clone(&self.fetcher);
        let (content, attempts) = with_retry(&self.retry, || {
            let fetcher = Arc::clone(&fetcher);
            let url = url.clone();
            async move {
                fetcher.fetch(&url).await.map_err(|e| {
                    if e.is_transient() {
                        StepFailure::Transient(e.to_string())
                    } else {
                        StepFailure::Permanent(e.to_string())
                    }
                })
            }
        })
        .await?;

        let bytes = content.body.len();
        ctx.content = Some(content.body);
        Ok(StepOutcome::success(
            String::new(),
            Some(json!({ "bytes": bytes, "content_type": content.content_type })),
            attempts,
        ))
    }

    async fn step_llm_parse(
        &self,
        ctx: &mut RunContext,
    ) -> Result<StepOutcome, (StepFailure, u32)> {
        if ctx.parsed.is_some() {
            return Ok(StepOutcome::skipped("parsed payload replayed".to_string()));
        }
        let content = ctx.content.clone().ok_or_else(|| {
            (StepFailure::Permanent("no content to parse".to_string()), 1)
        })?;

        let permit = self
            .llm_gate
            .acquire()
            .await
            .map_err(|e| (StepFailure::Permanent(e.to_string()), 1))?;
        let result = self.parser.parse_announcement(&content).await;
        drop(permit);

        // Model output that fails validation is permanent: retrying the
        // same content would burn tokens for the same answer.
        let parsed = result.map_err(|e| {
            if e.is_transient() {
                (StepFailure::Transient(e.to_string()), 1)
            } else {
                (StepFailure::Permanent(e.to_string()), 1)
            }
        })?;

        let data = serde_json::to_value(&parsed)
            .map_err(|e| (StepFailure::Permanent(e.to_string()), 1))?;
        let count = parsed.positions.len();
        ctx.parsed = Some(parsed);
        Ok(StepOutcome::success(
            format!("extracted {count} positions"),
            Some(data),
            1,
        ))
    }

    async fn step_persist(
        &self,
        record: &mut IngestionRecord,
        ctx: &mut RunContext,
        summary: &mut ParseSummary,
    ) -> Result<StepOutcome, (StepFailure, u32)> {
        let parsed = ctx.parsed.as_ref().ok_or_else(|| {
            (StepFailure::Permanent("no parsed payload to persist".to_string()), 1)
        })?;

        let (counts, results) = self
            .store
            .persist_positions(&parsed.positions)
            .await
            .map_err(|e| (StepFailure::Transient(e.to_string()), 1))?;
        summary.positions_created = counts.positions_created;
        summary.positions_updated = counts.positions_updated;

        // Updated positions invalidate their cached matches and move any
        // projected calendar events to the new dates.
        for (position, created) in &results {
            if *created {
                continue;
            }
            if let Err(e) = self.store.reconcile_updated(position).await {
                warn!("reconciliation failed for {}: {e}", position.position_id);
            }
        }
        if let Some(first) = parsed.positions.first() {
            self.store
                .mark_synced(record.id, &first.position_id)
                .await
                .map_err(|e| (StepFailure::Transient(e.to_string()), 1))?;
        }
        if record.crawl_status == CrawlStatus::ListCrawled {
            self.store
                .advance_status(record.id, CrawlStatus::ListCrawled, CrawlStatus::DetailCrawled)
                .await
                .map_err(|e| (StepFailure::Transient(e.to_string()), 1))?;
            record.crawl_status = CrawlStatus::DetailCrawled;
        }

        Ok(StepOutcome::success(
            format!(
                "created {}, updated {}",
                summary.positions_created, summary.positions_updated
            ),
            None,
            1,
        ))
    }
}

struct StepOutcome {
    skipped: bool,
    message: String,
    data: Option<serde_json::Value>,
    attempts: u32,
}

impl StepOutcome {
    fn success(message: String, data: Option<serde_json::Value>, attempts: u32) -> Self {
        StepOutcome { skipped: false, message, data, attempts }
    }

    fn skipped(message: String) -> Self {
        StepOutcome { skipped: true, message, data: None, attempts: 0 }
    }
}

/// Worker loop: claim the next pending task, run it, poll when idle.
/// `shutdown` stops the loop between tasks; per-task cancellation goes
/// through the registry.
pub async fn run_worker(
    pool: PgPool,
    runner: Arc<ParseRunner>,
    registry: CancelRegistry,
    shutdown: CancelFlag,
    idle_poll: Duration,
) {
    loop {
        if shutdown.is_cancelled() {
            info!("parse worker shutting down");
            return;
        }
        match queue::claim_next_task(&pool).await {
            Ok(Some(task)) => {
                let task_id = task.id;
                let flag = registry.register(task_id);
                if let Err(e) = runner.run_task(task, &flag).await {
                    error!("parse task {task_id} aborted: {e}");
                }
                registry.remove(task_id);
            }
            Ok(None) => tokio::time::sleep(idle_poll).await,
            Err(e) => {
                error!("parse worker claim failed: {e}");
                tokio::time::sleep(idle_poll).await;
            }
        }
    }
}
