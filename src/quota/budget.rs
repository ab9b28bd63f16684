//! Credential and budget types

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Public identifier of a credential (never the secret itself)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(String);

impl CredentialId {
    /// Wrap an id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An API credential handed to the remote client for one attempt
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    id: CredentialId,
    api_key: String,
}

impl Credential {
    /// Create a credential
    pub fn new(id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: CredentialId::new(id),
            api_key: api_key.into(),
        }
    }

    /// Public id
    pub fn id(&self) -> &CredentialId {
        &self.id
    }

    /// Secret API key
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Consumption of one credential inside its current quota window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBudget {
    /// Credential this budget belongs to
    pub credential_id: CredentialId,
    /// Units consumed in the current window
    pub consumed_units: u64,
    /// Units allowed per window
    pub limit_units: u64,
    /// When an exhausted credential becomes usable again
    pub reset_at: Option<DateTime<Utc>>,
    /// Start of the current quota window
    pub window_started_at: DateTime<Utc>,
}

impl CredentialBudget {
    pub(crate) fn new(credential_id: CredentialId, limit_units: u64, now: DateTime<Utc>) -> Self {
        Self {
            credential_id,
            consumed_units: 0,
            limit_units,
            reset_at: None,
            window_started_at: now,
        }
    }

    /// Whether the credential is currently unusable
    pub fn is_exhausted(&self) -> bool {
        self.reset_at.is_some()
    }

    /// Units still available in the current window
    pub fn remaining_units(&self) -> u64 {
        if self.is_exhausted() {
            0
        } else {
            self.limit_units.saturating_sub(self.consumed_units)
        }
    }

    /// Re-open the budget if its reset time or quota window has passed
    ///
    /// Returns true when the budget was refreshed.
    pub(crate) fn refresh(&mut self, now: DateTime<Utc>, window: ChronoDuration) -> bool {
        let reopen = match self.reset_at {
            Some(reset_at) => now >= reset_at,
            None => self.consumed_units > 0 && now >= self.window_started_at + window,
        };
        if reopen {
            self.consumed_units = 0;
            self.reset_at = None;
            self.window_started_at = now;
        }
        reopen
    }

    /// End of the current quota window
    pub(crate) fn window_end(&self, window: ChronoDuration) -> DateTime<Utc> {
        self.window_started_at + window
    }
}
