mod calendar;
mod config;
mod db;
mod errors;
mod ingestion;
mod llm_client;
mod matching;
mod models;
mod positions;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::calendar::reminder::{run_dispatcher, ReminderDispatcher};
use crate::config::Config;
use crate::db::create_pool;
use crate::ingestion::fetcher::{HostRateLimiter, ReqwestFetcher};
use crate::ingestion::resolver::UrlPatternResolver;
use crate::ingestion::runner::{run_worker, CancelFlag, CancelRegistry, ParseRunner, PgTaskStore};
use crate::llm_client::LlmClient;
use crate::matching::engine::MatchEngine;
use crate::routes::build_router;
use crate::state::AppState;

const PARSE_WORKER_IDLE_POLL: Duration = Duration::from_secs(5);
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const RECORD_CLAIM_BATCH: i64 = 10;
const RECORD_CLAIM_INTERVAL: Duration = Duration::from_secs(30);
const STALE_CLAIM_AFTER_MINS: i64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cse-api v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL and apply migrations
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    sqlx::migrate!().run(&pool).await?;
    info!("Migrations applied");

    // LLM client: a stored default config wins over the environment
    let llm = match llm_client::load_default_config(&pool).await? {
        Some(record) => {
            info!("LLM client from stored config '{}' (model: {})", record.name, record.model);
            LlmClient::from_config(&record)
        }
        None => {
            info!("LLM client from environment (model: {})", config.llm_model);
            LlmClient::new(
                config.llm_base_url.clone(),
                config.llm_api_key.clone(),
                config.llm_model.clone(),
            )
        }
    };

    let limiter = Arc::new(HostRateLimiter::new(Duration::from_millis(
        config.crawl_rate_ms,
    )));
    let fetcher = Arc::new(ReqwestFetcher::new(limiter)?);
    let resolver = Arc::new(UrlPatternResolver::default());
    let parser = Arc::new(llm);
    let llm_gate = Arc::new(Semaphore::new(config.llm_concurrency));

    let match_engine = Arc::new(MatchEngine::new(
        pool.clone(),
        config.match_cache_ttl_days,
        config.match_cache_short_ttl_days,
    ));

    let cancel_registry = CancelRegistry::default();
    let shutdown = CancelFlag::default();

    // Recover work interrupted by the previous run
    ingestion::queue::requeue_interrupted_tasks(&pool).await?;
    ingestion::queue::release_stale_claims(&pool, chrono::Utc::now()).await?;

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        match_engine: match_engine.clone(),
        fetcher: fetcher.clone(),
        resolver: resolver.clone(),
        parser: parser.clone(),
        llm_gate: llm_gate.clone(),
        cancel_registry: cancel_registry.clone(),
    };

    // Record claimer: queues a parse task for every record needing a crawl
    tokio::spawn(ingestion::queue::run_claimer(
        pool.clone(),
        RECORD_CLAIM_BATCH,
        RECORD_CLAIM_INTERVAL,
        chrono::Duration::minutes(STALE_CLAIM_AFTER_MINS),
        shutdown.clone(),
    ));

    // Parse workers
    let runner = Arc::new(ParseRunner::new(
        Arc::new(PgTaskStore::new(pool.clone())),
        fetcher,
        resolver,
        parser,
        llm_gate,
    ));
    for i in 0..config.parse_workers {
        info!("Spawning parse worker {i}");
        tokio::spawn(run_worker(
            pool.clone(),
            runner.clone(),
            cancel_registry.clone(),
            shutdown.clone(),
            PARSE_WORKER_IDLE_POLL,
        ));
    }

    // Reminder dispatcher
    tokio::spawn(run_dispatcher(
        ReminderDispatcher::new(pool.clone()),
        Duration::from_secs(config.reminder_tick_secs),
        shutdown.clone(),
    ));

    // Expired match-cache sweeper
    {
        let engine = match_engine.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                match engine.sweep_expired().await {
                    Ok(n) if n > 0 => info!("swept {n} expired match cache entries"),
                    Ok(_) => {}
                    Err(e) => tracing::error!("match cache sweep failed: {e}"),
                }
            }
        });
    }

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
