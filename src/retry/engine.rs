//! Retry engine
//!
//! Wraps one logical remote call: reserves quota for every attempt, bounds
//! each attempt with the call timeout, backs off on retryable errors, rotates
//! credentials on quota signals and suspends (or fails) when no credential is
//! left.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CallState, QuotaPolicy, RetryError, RetryPolicy, RetryState};
use crate::metrics::{record_retry_backoff, ApiCallMetrics};
use crate::quota::{Credential, QuotaLedger};
use crate::remote::{ApiError, ApiResult, CallKind};
use crate::shutdown::SharedShutdown;

/// Quota wait used when the ledger cannot name a reset time
const FALLBACK_QUOTA_WAIT: Duration = Duration::from_secs(60);

/// Drives [`RetryState`] for remote calls
#[derive(Debug, Clone)]
pub struct RetryEngine {
    ledger: Arc<QuotaLedger>,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl RetryEngine {
    /// Create an engine over a shared ledger
    pub fn new(ledger: Arc<QuotaLedger>, policy: RetryPolicy) -> Self {
        Self {
            ledger,
            policy,
            shutdown: None,
        }
    }

    /// Let an abort request cut backoff and quota waits short
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Retry configuration
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Shared ledger
    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    /// Run `op` until it succeeds or reaches a terminal state
    ///
    /// `units` are reserved from the ledger before every attempt. `op`
    /// receives the credential to use for that attempt.
    pub async fn call<T, F, Fut>(&self, kind: CallKind, units: u64, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut state = RetryState::new(&self.policy);

        loop {
            if self.abort_requested() {
                return Err(RetryError::Cancelled);
            }

            let Some(credential) = self.ledger.reserve(units) else {
                debug!(operation = kind.operation(), state = ?CallState::QuotaBlocked, "No credential available");
                self.wait_for_quota().await?;
                continue;
            };

            let metrics = ApiCallMetrics::start(kind.operation(), state.attempt);
            let outcome = match tokio::time::timeout(self.policy.call_timeout, op(credential.clone())).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout),
            };

            let error = match outcome {
                Ok(value) => {
                    metrics.record("ok");
                    debug!(
                        operation = kind.operation(),
                        attempt = state.attempt,
                        state = ?CallState::Success,
                        "Call succeeded"
                    );
                    return Ok(value);
                }
                Err(error) => {
                    metrics.record(error.label());
                    error
                }
            };

            match state.on_failure(error.class(), &self.policy) {
                CallState::Retrying { attempt, delay } => {
                    warn!(
                        operation = kind.operation(),
                        attempt = attempt - 1,
                        max_attempts = state.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error_class = error.label(),
                        error = %error,
                        "Retrying after backoff delay"
                    );
                    record_retry_backoff(delay, attempt);
                    self.sleep_unless_aborted(delay).await?;
                    state.delay_elapsed();
                }
                CallState::QuotaBlocked => {
                    warn!(
                        operation = kind.operation(),
                        credential = %credential.id(),
                        error = %error,
                        "Remote reported quota exceeded, rotating credential"
                    );
                    self.ledger
                        .mark_exhausted_until_window_end(credential.id());
                }
                CallState::Fatal => {
                    warn!(
                        operation = kind.operation(),
                        attempts = state.attempt,
                        error_class = error.label(),
                        error = %error,
                        "Call failed"
                    );
                    return Err(RetryError::Fatal {
                        error,
                        attempts: state.attempt,
                    });
                }
                CallState::Attempting { .. } | CallState::Success => {}
            }
        }
    }

    async fn wait_for_quota(&self) -> Result<(), RetryError> {
        let earliest_reset = self.ledger.earliest_reset();

        match self.policy.on_quota_exhausted {
            QuotaPolicy::Fail => Err(RetryError::QuotaExhausted { earliest_reset }),
            QuotaPolicy::Wait => {
                if self.ledger.is_empty() {
                    return Err(RetryError::QuotaExhausted { earliest_reset });
                }
                let wait = match earliest_reset {
                    Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                    None => FALLBACK_QUOTA_WAIT,
                };
                info!(
                    wait_secs = wait.as_secs(),
                    earliest_reset = ?earliest_reset,
                    "All credentials exhausted, waiting for quota reset"
                );
                self.sleep_unless_shutdown(wait).await
            }
        }
    }

    async fn sleep_unless_aborted(&self, delay: Duration) -> Result<(), RetryError> {
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(()),
                    _ = shutdown.wait_for_abort() => Err(RetryError::Cancelled),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Sleep until `delay` elapses or any shutdown is requested
    async fn sleep_unless_shutdown(&self, delay: Duration) -> Result<(), RetryError> {
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(()),
                    _ = shutdown.wait_for_shutdown() => {
                        info!("Shutdown requested, abandoning quota wait");
                        Err(RetryError::Cancelled)
                    }
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn abort_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_abort_requested())
    }
}
