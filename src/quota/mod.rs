//! Credential quota ledger
//!
//! The remote API meters every call against a daily budget per API key. The
//! [`QuotaLedger`] is the single owner of those budgets and is shared by all
//! concurrent units of work: selection and charging happen inside one
//! critical section so two units can never spend the same budget increment.
//!
//! Credentials are used in the order they were added. An exhausted
//! credential becomes eligible again once its `reset_at` passes; eligibility
//! is re-evaluated lazily on every ledger call instead of by a timer.
//!
//! Every time-dependent operation has an `*_at(now)` twin so tests can drive
//! the clock explicitly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

mod budget;

pub use budget::{Credential, CredentialBudget, CredentialId};

/// Default quota window (the remote API resets budgets daily)
pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Quota ledger errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    /// Charging would exceed the credential's limit; it is now exhausted
    #[error("credential {0} exhausted")]
    Exhausted(CredentialId),

    /// The credential is not registered with this ledger
    #[error("unknown credential: {0}")]
    UnknownCredential(CredentialId),
}

#[derive(Debug)]
struct LedgerState {
    credentials: Vec<Credential>,
    budgets: Vec<CredentialBudget>,
    active: Option<usize>,
}

impl LedgerState {
    fn index_of(&self, id: &CredentialId) -> Option<usize> {
        self.budgets.iter().position(|b| &b.credential_id == id)
    }

    fn refresh(&mut self, now: DateTime<Utc>, window: ChronoDuration) {
        for budget in &mut self.budgets {
            if budget.refresh(now, window) {
                debug!(credential = %budget.credential_id, "Credential quota window reopened");
            }
        }
    }

    /// First usable credential in preference order
    fn select(&mut self) -> Option<usize> {
        let selected = self.budgets.iter().position(|b| !b.is_exhausted());
        if selected != self.active {
            match (self.active, selected) {
                (Some(from), Some(to)) => {
                    info!(
                        from = %self.budgets[from].credential_id,
                        to = %self.budgets[to].credential_id,
                        "Rotated API credential"
                    );
                    crate::metrics::record_quota_rotation();
                }
                (None, Some(to)) => {
                    info!(credential = %self.budgets[to].credential_id, "Using API credential");
                }
                (_, None) => {
                    warn!("All API credentials exhausted");
                }
            }
            self.active = selected;
        }
        selected
    }

    fn exhaust(&mut self, index: usize, reset_at: DateTime<Utc>) {
        let budget = &mut self.budgets[index];
        budget.reset_at = Some(reset_at);
        warn!(
            credential = %budget.credential_id,
            consumed = budget.consumed_units,
            limit = budget.limit_units,
            reset_at = %reset_at,
            "Credential quota exhausted"
        );
    }
}

/// Shared, mutex-guarded owner of all credential budgets
#[derive(Debug)]
pub struct QuotaLedger {
    state: Mutex<LedgerState>,
    window: ChronoDuration,
}

impl QuotaLedger {
    /// Create an empty ledger whose budgets reset every `reset_interval`
    pub fn new(reset_interval: Duration) -> Self {
        let window = ChronoDuration::from_std(reset_interval)
            .unwrap_or_else(|_| ChronoDuration::hours(24));
        Self {
            state: Mutex::new(LedgerState {
                credentials: Vec::new(),
                budgets: Vec::new(),
                active: None,
            }),
            window,
        }
    }

    /// Register a credential whose first window starts at `now`
    ///
    /// Credentials are preferred in registration order.
    pub fn add_credential_at(&self, credential: Credential, limit_units: u64, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        if state.index_of(credential.id()).is_some() {
            warn!(credential = %credential.id(), "Ignoring duplicate credential");
            return;
        }
        state
            .budgets
            .push(CredentialBudget::new(credential.id().clone(), limit_units, now));
        state.credentials.push(credential);
    }

    /// Number of registered credentials
    pub fn len(&self) -> usize {
        self.state.lock().budgets.len()
    }

    /// Whether no credential is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First non-exhausted credential in preference order, if any
    pub fn active_credential(&self) -> Option<CredentialId> {
        self.active_credential_at(Utc::now())
    }

    /// [`Self::active_credential`] evaluated at `now`
    pub fn active_credential_at(&self, now: DateTime<Utc>) -> Option<CredentialId> {
        let mut state = self.state.lock();
        state.refresh(now, self.window);
        state
            .select()
            .map(|index| state.budgets[index].credential_id.clone())
    }

    /// Charge `units` against a credential
    ///
    /// A charge that would exceed the limit is not applied; the credential is
    /// marked exhausted instead and [`QuotaError::Exhausted`] is returned. A
    /// charge that reaches the limit exactly succeeds and leaves no budget.
    pub fn charge(&self, credential_id: &CredentialId, units: u64) -> Result<(), QuotaError> {
        self.charge_at(credential_id, units, Utc::now())
    }

    /// [`Self::charge`] evaluated at `now`
    pub fn charge_at(
        &self,
        credential_id: &CredentialId,
        units: u64,
        now: DateTime<Utc>,
    ) -> Result<(), QuotaError> {
        let mut state = self.state.lock();
        state.refresh(now, self.window);
        let index = state
            .index_of(credential_id)
            .ok_or_else(|| QuotaError::UnknownCredential(credential_id.clone()))?;
        self.charge_index(&mut state, index, units)
    }

    fn charge_index(
        &self,
        state: &mut LedgerState,
        index: usize,
        units: u64,
    ) -> Result<(), QuotaError> {
        let window = self.window;
        let budget = &state.budgets[index];
        if budget.is_exhausted() {
            return Err(QuotaError::Exhausted(budget.credential_id.clone()));
        }

        let reset_at = budget.window_end(window);
        let new_total = budget.consumed_units.saturating_add(units);
        if new_total > budget.limit_units {
            let id = budget.credential_id.clone();
            state.exhaust(index, reset_at);
            return Err(QuotaError::Exhausted(id));
        }

        state.budgets[index].consumed_units = new_total;
        if new_total == state.budgets[index].limit_units {
            state.exhaust(index, reset_at);
        }
        Ok(())
    }

    /// Mark a credential unusable until `reset_at`
    pub fn mark_exhausted(&self, credential_id: &CredentialId, reset_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        match state.index_of(credential_id) {
            Some(index) => state.exhaust(index, reset_at),
            None => warn!(credential = %credential_id, "Cannot exhaust unknown credential"),
        }
    }

    /// Mark a credential exhausted until the end of its current quota window
    ///
    /// Used when the remote API itself reports the quota as exceeded.
    pub fn mark_exhausted_until_window_end(&self, credential_id: &CredentialId) {
        let mut state = self.state.lock();
        if let Some(index) = state.index_of(credential_id) {
            let reset_at = state.budgets[index].window_end(self.window);
            state.exhaust(index, reset_at);
        }
    }

    /// Advance to the next non-exhausted credential
    pub fn rotate(&self) -> Option<CredentialId> {
        self.rotate_at(Utc::now())
    }

    /// [`Self::rotate`] evaluated at `now`
    pub fn rotate_at(&self, now: DateTime<Utc>) -> Option<CredentialId> {
        self.active_credential_at(now)
    }

    /// Select and charge a credential in one critical section
    ///
    /// Credentials without enough remaining budget are exhausted and skipped.
    /// Returns `None` when no credential can pay for `units`.
    pub fn reserve(&self, units: u64) -> Option<Credential> {
        self.reserve_at(units, Utc::now())
    }

    /// [`Self::reserve`] evaluated at `now`
    pub fn reserve_at(&self, units: u64, now: DateTime<Utc>) -> Option<Credential> {
        let mut state = self.state.lock();
        state.refresh(now, self.window);
        while let Some(index) = state.select() {
            if self.charge_index(&mut state, index, units).is_ok() {
                return Some(state.credentials[index].clone());
            }
        }
        None
    }

    /// Earliest moment an exhausted credential becomes usable again
    pub fn earliest_reset(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .budgets
            .iter()
            .filter_map(|b| b.reset_at)
            .min()
    }

    /// Copy of every budget in preference order
    pub fn snapshot(&self) -> Vec<CredentialBudget> {
        self.state.lock().budgets.clone()
    }
}
