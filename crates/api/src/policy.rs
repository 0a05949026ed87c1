//! Retry and endpoint-racing policy.

use futures::future::select_ok;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::SourceError;

/// Per-call fetch policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Extra attempts after the first one
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Timeout of a single attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_retries() -> u32 {
    3
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_backoff_base_ms() -> u64 {
    200
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            timeout_ms: default_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl FetchConfig {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_backoff_base_ms(mut self, backoff_base_ms: u64) -> Self {
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based). Capped at 64x the base.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(6);
        Duration::from_millis(self.backoff_base_ms) * (1u32 << shift)
    }
}

/// Run `op` until it succeeds, at most `retries + 1` times.
///
/// Each attempt is bounded by the configured timeout; a timed-out attempt is
/// dropped and counts as a failure. The last error is surfaced inside
/// [`SourceError::Exhausted`].
pub async fn with_retry<T, F, Fut>(config: &FetchConfig, mut op: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let attempts = config.retries.saturating_add(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = config.backoff(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying price fetch after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(config.timeout(), op()).await {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    info!(attempt = attempt, "Price fetch succeeded on retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => {
                warn!(attempt = attempt, error = %e, "Price fetch attempt failed");
                last_error = Some(e);
            }
            Err(_) => {
                warn!(
                    attempt = attempt,
                    timeout_ms = config.timeout_ms,
                    "Price fetch attempt timed out"
                );
                last_error = Some(SourceError::Timeout(config.timeout_ms));
            }
        }
    }

    Err(SourceError::Exhausted {
        attempts,
        last: Box::new(last_error.unwrap_or(SourceError::NoEndpoints)),
    })
}

/// Run `op` against every endpoint concurrently and return the first success.
///
/// Futures still in flight when one succeeds are dropped.
pub async fn race<'a, T, F, Fut>(endpoints: &'a [String], op: F) -> Result<T, SourceError>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    if endpoints.is_empty() {
        return Err(SourceError::NoEndpoints);
    }

    let attempts = endpoints.iter().map(|endpoint| Box::pin(op(endpoint.as_str())));
    match select_ok(attempts).await {
        Ok((value, _pending)) => Ok(value),
        Err(last) => Err(SourceError::AllEndpointsFailed {
            count: endpoints.len(),
            last: Box::new(last),
        }),
    }
}
