//! Bounded retries with exponential backoff for every API call.

use crate::api::transport::{HttpTransport, RawResponse, Transport, TransportError};
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Obsolete HTTP date forms still allowed in `Retry-After`: RFC 850 and asctime. Both are GMT.
const LEGACY_HTTP_DATE_FORMATS: [&str; 2] = ["%A, %d-%b-%y %T GMT", "%a %b %e %T %Y"];

/// Statuses that are worth another attempt.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// How hard the executor tries before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single attempt, including reading the body.
    pub request_timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each attempt after that.
    pub base_backoff: Duration,
    /// Upper bound for the computed delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Waits between attempts. Swapped out in tests so backoff can be asserted without waiting.
#[async_trait]
pub(crate) trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Picks the actual delay given the computed upper bound.
pub(crate) type Jitter = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Full jitter: uniform in `[0, delay)`.
fn full_jitter(delay: Duration) -> Duration {
    let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::rng().random_range(0..nanos))
}

/// Sends requests through a [`Transport`], retrying transient failures.
///
/// Requests are rebuilt from scratch for every attempt, so a request body (multipart forms
/// included) is never consumed by a failed attempt.
#[derive(Clone)]
pub(crate) struct RequestExecutor {
    client: reqwest::Client,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    jitter: Jitter,
}

impl Debug for RequestExecutor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("transport", &self.transport)
            .field("policy", &self.policy)
            .finish()
    }
}

impl RequestExecutor {
    /// An executor that sends requests over the network with `client`.
    pub(crate) fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        let transport = Arc::new(HttpTransport::new(client.clone()));
        Self::with_transport(client, transport, policy)
    }

    /// An executor that builds requests with `client` but sends them through `transport`.
    pub(crate) fn with_transport(
        client: reqwest::Client,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            transport,
            policy,
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(full_jitter),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub(crate) fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sends the request produced by `build`, calling it again for every attempt.
    ///
    /// Returns the last response received, which may be a non-success status: retryable
    /// statuses are returned as-is once attempts are exhausted, and non-retryable statuses are
    /// returned immediately. Translating them into errors is the caller's job.
    ///
    /// # Errors
    /// - When `build` fails.
    /// - When no response could be obtained, with the number of attempts made.
    pub(crate) async fn send<F>(&self, mut build: F) -> Result<RawResponse>
    where
        F: FnMut(&reqwest::Client) -> Result<reqwest::RequestBuilder> + Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let request = build(&self.client)?
                .build()
                .context("Unable to build the API request")?;
            let method = request.method().clone();
            let url = request.url().path().to_string();
            let outcome =
                match tokio::time::timeout(self.policy.request_timeout, self.transport.execute(request))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TransportError::Timeout),
                };
            let last_attempt = attempt >= max_attempts;

            match outcome {
                Ok(response) => {
                    if last_attempt || !RETRYABLE_STATUSES.contains(&response.status()) {
                        debug!(
                            "{method} {url} returned {} after {attempt} attempt(s)",
                            response.status()
                        );
                        return Ok(response);
                    }
                    let delay = self.backoff(attempt, response.retry_after());
                    warn!(
                        attempt,
                        max_attempts,
                        status = response.status(),
                        delay_ms = delay.as_millis() as u64,
                        "{method} {url} failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(e) => {
                    if last_attempt || !e.is_retryable() {
                        return Err(anyhow::Error::new(e)).context(format!(
                            "API request failed after {attempt} attempt(s)"
                        ));
                    }
                    let delay = self.backoff(attempt, None);
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "{method} {url} failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }

    /// The delay after a failed `attempt`. A usable `Retry-After` wins over the computed value.
    fn backoff(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        if let Some(delay) = retry_after.and_then(|v| parse_retry_after(v, Utc::now())) {
            return delay;
        }
        (self.jitter)(exponential_delay(&self.policy, attempt))
    }
}

/// `base * 2^(attempt - 1)`, capped at the policy's maximum.
fn exponential_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| policy.base_backoff.checked_mul(factor))
        .map_or(policy.max_backoff, |delay| delay.min(policy.max_backoff))
}

/// Parses a `Retry-After` value: either a number of seconds or an HTTP date.
///
/// Returns `None` when the value is unusable, i.e. empty, not positive, malformed or a date that
/// is not in the future. The caller then falls back to the computed backoff.
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<i64>() {
        return u64::try_from(seconds)
            .ok()
            .filter(|&s| s > 0)
            .map(Duration::from_secs);
    }
    let when = parse_http_date(value)?;
    (when - now)
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(when) = DateTime::parse_from_rfc2822(value) {
        return Some(when.with_timezone(&Utc));
    }
    LEGACY_HTTP_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
