//! Resilient HTTP fetch layer.
//!
//! Flow Overview:
//! 1) Each attempt runs under its own request timeout.
//! 2) Non-2xx responses count as failed attempts with the body captured.
//! 3) Attempts are separated by exponential backoff with jitter until
//!    `max_attempts` is exhausted, then the last cause is surfaced.

use rand::Rng;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info_span, warn, Instrument};

pub mod repair;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unusable payload: {0}")]
    Payload(String),

    #[error("all {attempts} attempts failed: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },
}

#[derive(Clone, Debug)]
pub struct FetchOptions {
    method: Method,
    body: Option<serde_json::Value>,
    headers: Vec<(String, String)>,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl FetchOptions {
    #[must_use]
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    #[must_use]
    pub fn post(body: serde_json::Value) -> Self {
        let mut options = Self::get();
        options.method = Method::POST;
        options.body = Some(body);
        options
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// HTTP fetcher with per-attempt timeouts and bounded retries.
///
/// Cheap to clone; the underlying `reqwest::Client` is reference-counted.
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Build a fetcher with the gateway user agent.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(crate::APP_USER_AGENT).build()?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetch `url`, retrying failed attempts per `options`.
    ///
    /// # Errors
    /// Returns `FetchError::Exhausted` carrying the last cause once
    /// `max_attempts` attempts have failed.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let attempts = options.max_attempts.max(1);
        let mut last = FetchError::Transport("no attempts made".to_string());

        for attempt in 1..=attempts {
            let span = info_span!(
                "fetch.attempt",
                http.method = %options.method,
                url = %url,
                attempt,
                max_attempts = attempts
            );
            match self.attempt(url, options).instrument(span).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    warn!(url = %url, attempt, error = %err, "fetch attempt failed");
                    last = err;
                }
            }

            if attempt < attempts {
                sleep(backoff_delay(attempt, options.retry_delay, MAX_RETRY_DELAY)).await;
            }
        }

        Err(FetchError::Exhausted {
            attempts,
            last: Box::new(last),
        })
    }

    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let mut request = self
            .client
            .request(options.method.clone(), url)
            .timeout(options.timeout)
            .header(ACCEPT, "application/json, text/plain, */*");

        for (name, value) in &options.headers {
            request = request.header(name, value);
        }

        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout(options.timeout)
            } else {
                FetchError::Transport(err.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

/// Exponential backoff with jitter, capped at `max`.
pub(crate) fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
