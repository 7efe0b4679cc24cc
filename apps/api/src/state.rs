use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::ingestion::fetcher::ContentFetcher;
use crate::ingestion::resolver::ListPageResolver;
use crate::ingestion::runner::CancelRegistry;
use crate::llm_client::AnnouncementParser;
use crate::matching::engine::MatchEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub match_engine: Arc<MatchEngine>,
    /// Pluggable content fetcher. Default: ReqwestFetcher with per-host
    /// rate limiting.
    pub fetcher: Arc<dyn ContentFetcher>,
    /// Pluggable original-URL resolver. Default: UrlPatternResolver.
    pub resolver: Arc<dyn ListPageResolver>,
    /// Announcement parsing seam, backed by the LLM client.
    pub parser: Arc<dyn AnnouncementParser>,
    /// Global cap on concurrent LLM calls across all workers.
    pub llm_gate: Arc<Semaphore>,
    /// Cancel flags of in-flight parse tasks.
    pub cancel_registry: CancelRegistry,
}
