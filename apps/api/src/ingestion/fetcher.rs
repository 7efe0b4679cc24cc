//! HTTP content fetching with manual redirect resolution and per-host rate
//! limiting.
//!
//! Redirects are followed by hand so every hop gets recorded and capped; the
//! announcement sources chain through several tracking hops before the real
//! document.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const MAX_REDIRECT_HOPS: usize = 5;
const HOP_TIMEOUT: Duration = Duration::from_secs(15);
const RESOLVE_TOTAL_TIMEOUT: Duration = Duration::from_secs(60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timeout fetching {0}")]
    Timeout(String),
    #[error("http {status} from {url}")]
    Status { status: u16, url: String },
    #[error("too many redirects starting from {0}")]
    TooManyRedirects(String),
    #[error("redirect without a valid location from {0}")]
    BadRedirect(String),
    #[error("invalid url {0}")]
    BadUrl(String),
    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// Transient failures are retried with backoff; the rest fail the step.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub final_url: String,
    pub content_type: String,
    pub body: String,
}

/// Seam for retrieving remote announcement content. Production uses
/// [`ReqwestFetcher`]; tests script responses.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Follows redirect hops until a non-redirect response, returning the
    /// final URL.
    async fn resolve_final_url(&self, url: &str) -> Result<String, FetchError>;

    /// Fetches the document body at a (already resolved) URL.
    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError>;
}

/// One request per host per interval, enforced across all workers sharing
/// the limiter.
#[derive(Debug)]
pub struct HostRateLimiter {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostRateLimiter {
    pub fn new(interval: Duration) -> Self {
        HostRateLimiter {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until this host's next request slot, then claims it.
    pub async fn acquire(&self, host: &str) {
        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.entry(host.to_string()).or_insert(now);
            let wait = slot.saturating_duration_since(now);
            *slot = (*slot).max(now) + self.interval;
            wait
        };
        if !wait.is_zero() {
            debug!("rate limiting {host} for {wait:?}");
            tokio::time::sleep(wait).await;
        }
    }
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
    limiter: Arc<HostRateLimiter>,
}

impl ReqwestFetcher {
    pub fn new(limiter: Arc<HostRateLimiter>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(HOP_TIMEOUT)
            .user_agent("cse-api/0.1")
            .build()?;
        Ok(ReqwestFetcher { client, limiter })
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let host = url.host_str().unwrap_or_default().to_string();
        self.limiter.acquire(&host).await;
        self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Network(e.to_string())
            }
        })
    }
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|_| FetchError::BadUrl(url.to_string()))
}

#[async_trait]
impl ContentFetcher for ReqwestFetcher {
    async fn resolve_final_url(&self, url: &str) -> Result<String, FetchError> {
        let started = Instant::now();
        let mut current = parse_url(url)?;
        for _ in 0..=MAX_REDIRECT_HOPS {
            if started.elapsed() > RESOLVE_TOTAL_TIMEOUT {
                return Err(FetchError::Timeout(url.to_string()));
            }
            let response = self.get(&current).await?;
            let status = response.status();
            if !status.is_redirection() {
                if status.is_success() {
                    return Ok(current.to_string());
                }
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: current.to_string(),
                });
            }
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| FetchError::BadRedirect(current.to_string()))?;
            current = current
                .join(location)
                .map_err(|_| FetchError::BadRedirect(current.to_string()))?;
            debug!("redirect hop -> {current}");
        }
        Err(FetchError::TooManyRedirects(url.to_string()))
    }

    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError> {
        let parsed = parse_url(url)?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        self.limiter.acquire(&host).await;

        let response = tokio::time::timeout(
            FETCH_TIMEOUT,
            self.client.get(parsed.clone()).send(),
        )
        .await
        .map_err(|_| FetchError::Timeout(url.to_string()))?
        .map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(FetchedContent {
            final_url,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Timeout("u".into()).is_transient());
        assert!(FetchError::Network("reset".into()).is_transient());
        assert!(FetchError::Status { status: 429, url: "u".into() }.is_transient());
        assert!(FetchError::Status { status: 503, url: "u".into() }.is_transient());
        assert!(!FetchError::Status { status: 404, url: "u".into() }.is_transient());
        assert!(!FetchError::TooManyRedirects("u".into()).is_transient());
        assert!(!FetchError::BadUrl("u".into()).is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_same_host_requests() {
        let limiter = HostRateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire("a.example").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.acquire("a.example").await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_hosts_are_independent() {
        let limiter = HostRateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire("a.example").await;
        limiter.acquire("b.example").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_third_request_waits_two_intervals() {
        let limiter = HostRateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire("a.example").await;
        limiter.acquire("a.example").await;
        limiter.acquire("a.example").await;
        assert!(start.elapsed() >= Duration::from_secs(4));
    }
}
