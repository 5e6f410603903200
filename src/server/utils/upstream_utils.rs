use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, redirect};
use tokio::time::sleep;
use tracing::warn;

use crate::config::AppConfig;

// every hop of the chain checks for a browser, the exact version doesn't seem to matter
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

const MAX_REDIRECTS: usize = 10;

/// client used for the resolution hops, whole request is bounded since pages are small
pub fn build_resolution_client(config: &AppConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .connect_timeout(config.connect_timeout())
        .timeout(config.resolve_timeout())
        .redirect(redirect::Policy::limited(MAX_REDIRECTS))
        .build()
}

/// client used for manifests and segments, only reads are bounded so long bodies can still
/// stream through
pub fn build_proxy_client(config: &AppConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .redirect(redirect::Policy::limited(MAX_REDIRECTS))
        .build()
}

/// bounded retries with exponential backoff for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.upstream_max_retries,
            base_delay: config.retry_base_delay(),
            ..Default::default()
        }
    }

    /// no retries at all, handy for tests that count upstream hits
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2_u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    }

    pub fn is_retryable_error(error: &reqwest::Error) -> bool {
        error.is_connect() || error.is_timeout() || error.is_request()
    }

    /// sends the request, retrying connection errors and 5xx responses. once the retries are
    /// used up the last response (or error) is handed back as is, status checks are up to the
    /// caller
    pub async fn send(&self, request: RequestBuilder) -> reqwest::Result<Response> {
        let mut attempt: u32 = 0;

        loop {
            // a body that can't be cloned can't be replayed, just send it once
            let Some(current) = request.try_clone() else {
                return request.send().await;
            };

            let can_retry = attempt < self.max_retries;

            match current.send().await {
                Ok(response) if can_retry && Self::is_retryable_status(response.status()) => {
                    warn!(
                        "upstream {} returned {}, retrying ({}/{})",
                        response.url(),
                        response.status(),
                        attempt + 1,
                        self.max_retries
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if can_retry && Self::is_retryable_error(&e) => {
                    warn!(
                        "upstream request failed: {}, retrying ({}/{})",
                        e,
                        attempt + 1,
                        self.max_retries
                    );
                }
                Err(e) => return Err(e),
            }

            attempt += 1;
            sleep(self.delay_for_attempt(attempt)).await;
        }
    }
}
