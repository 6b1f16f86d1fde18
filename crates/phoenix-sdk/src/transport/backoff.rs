//! Retry policy resolution and exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::PhoenixError;

/// Upper bound on the random jitter added to each backoff delay. Keeps
/// concurrent clients from retrying in lockstep.
pub const JITTER_BOUND_MS: u64 = 40;

/// Effective retry configuration for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 1200,
            timeout_ms: 8000,
        }
    }
}

/// Partial retry settings. Merged per call: call-level overrides
/// client-level overrides the built-in default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOverride {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl RetryOverride {
    /// Field-wise layering: the override wins where set, else the base entry
    /// survives.
    pub fn layered(self, overrides: &RetryOverride) -> RetryOverride {
        RetryOverride {
            max_retries: overrides.max_retries.or(self.max_retries),
            base_delay_ms: overrides.base_delay_ms.or(self.base_delay_ms),
            max_delay_ms: overrides.max_delay_ms.or(self.max_delay_ms),
            timeout_ms: overrides.timeout_ms.or(self.timeout_ms),
        }
    }
}

impl RetryPolicy {
    pub fn merged(self, overrides: &RetryOverride) -> RetryPolicy {
        RetryPolicy {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            base_delay_ms: overrides.base_delay_ms.unwrap_or(self.base_delay_ms),
            max_delay_ms: overrides.max_delay_ms.unwrap_or(self.max_delay_ms),
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
        }
    }
}

/// Delay before retrying `attempt` (zero-based): capped exponential growth
/// plus bounded uniform jitter.
pub fn next_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponential = policy
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let bounded = exponential.min(policy.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..JITTER_BOUND_MS);
    Duration::from_millis(bounded + jitter)
}

/// Sleep that a cancellation token can wake early. A token that is already
/// cancelled fails before any timer is started.
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), PhoenixError> {
    let Some(token) = cancel else {
        tokio::time::sleep(duration).await;
        return Ok(());
    };

    if token.is_cancelled() {
        return Err(PhoenixError::timeout("delay cancelled", true));
    }

    tokio::select! {
        _ = token.cancelled() => Err(PhoenixError::timeout("delay cancelled", true)),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
