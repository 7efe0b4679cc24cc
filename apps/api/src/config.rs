use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Upper bound on the PostgreSQL connection pool.
    pub db_max_connections: u32,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub port: u16,
    pub rust_log: String,
    /// Reminder dispatcher tick interval in seconds.
    pub reminder_tick_secs: u64,
    /// Minimum spacing between detail-crawl requests to one source host, in
    /// milliseconds (token bucket refill interval).
    pub crawl_rate_ms: u64,
    /// Number of concurrent parse workers claiming ingestion records.
    pub parse_workers: usize,
    /// Bound on concurrent LLM parse calls (upstream quota protection).
    pub llm_concurrency: usize,
    /// Match cache TTL in days when the result depends on profile and
    /// position only.
    pub match_cache_ttl_days: i64,
    /// Shorter TTL in days for users with a preference row; preference edits
    /// are not captured by the version pair, so those entries age out faster.
    pub match_cache_short_ttl_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 10)?,
            llm_base_url: require_env("LLM_BASE_URL")?,
            llm_api_key: require_env("LLM_API_KEY")?,
            llm_model: require_env("LLM_MODEL")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            reminder_tick_secs: parse_env("REMINDER_TICK_SECS", 300)?,
            crawl_rate_ms: parse_env("CRAWL_RATE_MS", 2000)?,
            parse_workers: parse_env("PARSE_WORKERS", 2)?,
            llm_concurrency: parse_env("LLM_CONCURRENCY", 4)?,
            match_cache_ttl_days: parse_env("MATCH_CACHE_TTL_DAYS", 7)?,
            match_cache_short_ttl_days: parse_env("MATCH_CACHE_SHORT_TTL_DAYS", 1)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .with_context(|| format!("'{key}' must be a valid value")),
        Err(_) => Ok(default),
    }
}
