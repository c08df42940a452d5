//! Exponential backoff with jitter, and the pre-start health check.
//!
//! Intervals grow from `initial_interval` by `multiplier`, capped at
//! `max_interval`. Each wait is drawn uniformly from
//! `interval × [1 − randomization, 1 + randomization]`. Retrying stops
//! once the next wait would cross `max_elapsed`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::GatewayError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Backoff settings. The defaults match common exponential-backoff
/// libraries: 500 ms, ×1.5, 60 s cap, ±50 %, 15 min total.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Jitter factor (0.0–1.0).
    pub randomization: f64,
    /// Give up once this much time has passed. `Duration::ZERO` = never.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            randomization: 0.5,
            max_elapsed: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Clamp out-of-range values so the policy is safe to use.
    ///
    /// - `randomization` clamped to `0.0..=1.0`;
    /// - `multiplier` at least 1.0;
    /// - `max_interval` at least `initial_interval`.
    pub fn validated(mut self) -> Self {
        self.randomization = self.randomization.clamp(0.0, 1.0);
        if !(self.multiplier >= 1.0) {
            tracing::warn!(multiplier = self.multiplier, "backoff multiplier below 1.0, using 1.0");
            self.multiplier = 1.0;
        }
        if self.max_interval < self.initial_interval {
            self.max_interval = self.initial_interval;
        }
        self
    }

    /// The un-jittered interval before attempt `n + 1` (n starts at 0).
    pub fn interval(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_interval.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// [`interval`](Self::interval) with jitter applied.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let base = self.interval(attempt).as_secs_f64();
        if self.randomization == 0.0 || base == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let delta = base * self.randomization;
        let secs = rand::rng().random_range((base - delta)..=(base + delta));
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Runs `operation` until it succeeds or the policy gives up, calling
/// `notify` with the error and the upcoming wait before each retry.
///
/// # Errors
/// The last error from `operation` once `max_elapsed` would be exceeded.
pub async fn retry_notify<T, E, F, Fut, N>(
    policy: &RetryPolicy,
    mut operation: F,
    mut notify: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(&E, Duration),
{
    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let wait = policy.jittered(attempt);
        if !policy.max_elapsed.is_zero() && started.elapsed() + wait > policy.max_elapsed {
            return Err(error);
        }
        notify(&error, wait);
        tokio::time::sleep(wait).await;
        attempt = attempt.saturating_add(1);
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Something that can tell whether a dependency is ready.
pub trait HealthCheck: Send + Sync {
    type Error: fmt::Display + Send;

    fn check(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Why an HTTP health check did not pass.
#[derive(Debug, thiserror::Error)]
pub enum HealthCheckError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Anything but `200 OK`. Carries the response body.
    #[error("unhealthy ({status}): {body}")]
    Unhealthy { status: u16, body: String },
}

/// Ready when a `GET url` answers `200 OK`.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthCheck {
    /// # Errors
    /// [`GatewayError::Startup`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, GatewayError> {
        Self::with_timeout(url, Duration::from_secs(5))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Startup(format!("health check client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthCheck for HttpHealthCheck {
    type Error = HealthCheckError;

    async fn check(&self) -> Result<(), HealthCheckError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(HealthCheckError::Unhealthy {
            status: status.as_u16(),
            body,
        })
    }
}

/// Blocks until `check` succeeds.
///
/// # Errors
/// [`GatewayError::Startup`] once the policy gives up.
pub async fn wait_until_ready<P: HealthCheck>(
    check: &P,
    policy: &RetryPolicy,
) -> Result<(), GatewayError> {
    retry_notify(
        policy,
        || check.check(),
        |error, next| {
            tracing::info!(%error, next_ms = next.as_millis() as u64, "dependency not ready");
        },
    )
    .await
    .map_err(|e| GatewayError::Startup(format!("health check limit exceeded: {e}")))
}
