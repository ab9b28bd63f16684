//! Retry state machine and backoff
//!
//! Every logical remote call moves through
//! `Attempting -> {Success, Retrying, QuotaBlocked, Fatal}`. [`RetryState`]
//! holds the per-call bookkeeping and decides the next state from an error
//! class; [`RetryEngine`] drives it against the quota ledger and the clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::remote::{ApiError, ErrorClass};

pub mod engine;

pub use engine::RetryEngine;

/// Default maximum attempts per logical call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the second attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default bound on a single attempt
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when every credential is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPolicy {
    /// Suspend until the earliest credential reset, then continue
    Wait,
    /// Stop the unit with [`RetryError::QuotaExhausted`]
    Fail,
}

/// Retry configuration shared by all calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per logical call, including the first
    pub max_attempts: u32,
    /// Delay before attempt 2
    pub base_delay: Duration,
    /// Upper bound of the exponential part of the delay
    pub max_delay: Duration,
    /// Bound on each individual attempt
    pub call_timeout: Duration,
    /// Behavior once no credential is left
    pub on_quota_exhausted: QuotaPolicy,
    /// Add uniform jitter in `[0, base_delay)` to each delay
    pub jitter: bool,
}

impl RetryPolicy {
    /// Policy with default delays and the given quota behavior
    pub fn new(on_quota_exhausted: QuotaPolicy) -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            on_quota_exhausted,
            jitter: true,
        }
    }
}

/// Exponential part of the delay before attempt `attempt` (1-based)
///
/// Zero before the first attempt, then `base × 2^(attempt-2)` capped at
/// `max_delay`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if attempt < 2 {
        return Duration::ZERO;
    }
    let exponent = (attempt - 2).min(31);
    policy
        .base_delay
        .saturating_mul(1u32 << exponent)
        .min(policy.max_delay)
}

/// Full delay before `attempt`: backoff plus jitter when enabled
pub fn delay_with_jitter(policy: &RetryPolicy, attempt: u32) -> Duration {
    let delay = backoff_delay(policy, attempt);
    if !policy.jitter || delay.is_zero() {
        return delay;
    }
    delay + policy.base_delay.mul_f64(rand::random::<f64>())
}

/// Where a logical call currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// About to run the given attempt
    Attempting {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Waiting `delay` before the given attempt
    Retrying {
        /// Attempt that runs after the delay
        attempt: u32,
        /// Backoff delay
        delay: Duration,
    },
    /// Waiting for a usable credential
    QuotaBlocked,
    /// Finished successfully
    Success,
    /// Finished with an error that will not be retried
    Fatal,
}

/// Per-call retry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Current 1-based attempt
    pub attempt: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Delay scheduled before the next attempt
    pub next_delay: Option<Duration>,
}

impl RetryState {
    /// State of a call about to make its first attempt
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            max_attempts: policy.max_attempts.max(1),
            next_delay: None,
        }
    }

    /// State the call is in right now
    pub fn current(&self) -> CallState {
        match self.next_delay {
            Some(delay) => CallState::Retrying {
                attempt: self.attempt,
                delay,
            },
            None => CallState::Attempting {
                attempt: self.attempt,
            },
        }
    }

    /// Transition after a failed attempt of the given class
    ///
    /// Quota signals do not consume an attempt.
    pub fn on_failure(&mut self, class: ErrorClass, policy: &RetryPolicy) -> CallState {
        match class {
            ErrorClass::Retryable if self.attempt < self.max_attempts => {
                self.attempt += 1;
                let delay = delay_with_jitter(policy, self.attempt);
                self.next_delay = Some(delay);
                CallState::Retrying {
                    attempt: self.attempt,
                    delay,
                }
            }
            ErrorClass::QuotaSignal => {
                self.next_delay = None;
                CallState::QuotaBlocked
            }
            ErrorClass::Retryable | ErrorClass::NonRetryable => {
                self.next_delay = None;
                CallState::Fatal
            }
        }
    }

    /// Mark the scheduled delay as served
    pub fn delay_elapsed(&mut self) {
        self.next_delay = None;
    }
}

/// Terminal failures of a logical call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryError {
    /// The call failed and will not be retried
    #[error("call failed after {attempts} attempt(s): {error}")]
    Fatal {
        /// Last error
        error: ApiError,
        /// Attempts made
        attempts: u32,
    },

    /// No credential has quota left and the policy is to fail
    #[error("all credentials exhausted (earliest reset: {})", format_reset(.earliest_reset))]
    QuotaExhausted {
        /// When the first credential becomes usable again
        earliest_reset: Option<DateTime<Utc>>,
    },

    /// Aborted by the shutdown coordinator
    #[error("call cancelled by shutdown")]
    Cancelled,
}

fn format_reset(reset: &Option<DateTime<Utc>>) -> String {
    match reset {
        Some(at) => at.to_rfc3339(),
        None => "unknown".to_string(),
    }
}
