use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{EnrichError, Result};

// ─── RateLimiter ──────────────────────────────────────────────────────────────

/// Cooperative pacing: enforces a minimum gap between consecutive requests.
///
/// Clones share the same clock, so one limiter handed to several clients paces
/// all of them together.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Sleeps until the interval since the previous call has elapsed.
    /// Returns how long it waited.
    pub async fn wait(&self) -> Duration {
        let mut last = self.last_request.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                sleep(waited).await;
            }
        }
        *last = Some(Instant::now());
        waited
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

// ─── RateLimitedClient ────────────────────────────────────────────────────────

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const ERROR_BODY_EXCERPT: usize = 300;

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

pub struct RateLimitedClient {
    client: reqwest::Client,
    limiter: RateLimiter,
    max_retries: u32,
}

impl RateLimitedClient {
    pub fn new(
        limiter: RateLimiter,
        max_retries: u32,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            limiter,
            max_retries,
        })
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        self.get_with_headers(url, HeaderMap::new()).await
    }

    /// GET with an `Accept-Language` header, as a browser for that locale would send.
    pub async fn get_localized(&self, url: &str, accept_language: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(accept_language) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
        self.get_with_headers(url, headers).await
    }

    pub async fn get_with_headers(&self, url: &str, headers: HeaderMap) -> Result<String> {
        self.execute(url, |client| client.get(url).headers(headers.clone()))
            .await
    }

    /// POST with a raw body. Signed APIs need the exact bytes they hashed.
    pub async fn post_with_headers(&self, url: &str, body: String, headers: HeaderMap) -> Result<String> {
        self.execute(url, |client| client.post(url).headers(headers.clone()).body(body.clone()))
            .await
    }

    /// Every attempt goes through the limiter, so a retried transport error
    /// is paced like any other request. A 429 additionally waits out
    /// `Retry-After`. Other non-2xx answers are not retried.
    async fn execute<F>(&self, url: &str, build: F) -> Result<String>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut retries_left = self.max_retries;
        loop {
            self.limiter.wait().await;
            let started = Instant::now();
            let (failure, pause) = match build(&self.client).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url, elapsed_ms = started.elapsed().as_millis() as u64, "request ok");
                    return resp.text().await.map_err(EnrichError::Http);
                }
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let secs = retry_after_secs(resp.headers());
                    (EnrichError::RateLimit(url.to_string(), secs), Duration::from_secs(secs))
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    debug!(url, status, elapsed_ms = started.elapsed().as_millis() as u64, "request failed");
                    let body = resp.text().await.unwrap_or_default();
                    let excerpt: String = body.trim().chars().take(ERROR_BODY_EXCERPT).collect();
                    let message = if excerpt.is_empty() {
                        format!("HTTP {status}")
                    } else {
                        format!("HTTP {status}: {excerpt}")
                    };
                    return Err(EnrichError::ApiError(url.to_string(), message));
                }
                Err(e) => (EnrichError::Http(e), Duration::ZERO),
            };
            if retries_left == 0 {
                return Err(failure);
            }
            retries_left -= 1;
            warn!(url, error = %failure, retries_left, "retrying request");
            if !pause.is_zero() {
                sleep(pause).await;
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self.get(url).await?;
        serde_json::from_str(&text).map_err(|e| EnrichError::Parse(e.to_string()))
    }
}
