use anyhow::{Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Exponential backoff with up to 25% jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let multiplier = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Longest `send_with_retry` can run when each attempt is limited to
    /// `attempt_timeout`: every attempt timing out plus the largest jittered
    /// delays between them.
    pub fn budget(&self, attempt_timeout: Duration) -> Duration {
        let attempts = u32::try_from(self.max_retries + 1).unwrap_or(u32::MAX);
        let delays = (0..self.max_retries).fold(Duration::ZERO, |total, attempt| {
            let base = self.backoff(attempt);
            total.saturating_add(base).saturating_add(base / 4)
        });
        attempt_timeout.saturating_mul(attempts).saturating_add(delays)
    }

    fn delay(&self, attempt: usize) -> Duration {
        let base = self.backoff(attempt);
        let max_jitter_ms = (base.as_millis() / 4).min(u128::from(u64::MAX)) as u64;
        if max_jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
    }
}

fn is_retriable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Send a request, retrying transient failures.
///
/// Non-retriable error statuses are returned as responses for the caller to
/// report; only transport errors become `Err`.
pub(super) async fn send_with_retry(
    policy: RetryPolicy,
    mut make_request: impl FnMut() -> reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    let mut attempt = 0;
    loop {
        let can_retry = attempt < policy.max_retries;
        match make_request().send().await {
            Ok(response) if can_retry && is_retriable_status(response.status()) => {
                let delay = policy.delay(attempt);
                debug!(
                    "Model API returned {}; retrying in {:?} (attempt {}/{})",
                    response.status(),
                    delay,
                    attempt + 1,
                    policy.max_retries + 1
                );
                let _ = response.bytes().await;
                sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(err) if can_retry && (err.is_timeout() || err.is_connect()) => {
                let delay = policy.delay(attempt);
                debug!(
                    "Model API request error: {}; retrying in {:?} (attempt {}/{})",
                    err,
                    delay,
                    attempt + 1,
                    policy.max_retries + 1
                );
                sleep(delay).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Model API request failed after {} attempt(s)", attempt + 1)
                })
            }
        }
        attempt += 1;
    }
}
