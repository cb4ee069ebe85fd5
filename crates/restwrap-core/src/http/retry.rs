//! Per-status retry policies
//!
//! A [`RetryTable`] is the engine's configuration: which status codes may be
//! retried, how often, and how long to wait in between. Every `execute` call
//! draws a fresh [`RetryBudget`] from it, so counters never leak between calls
//! and one engine can serve concurrent requests.

use std::collections::HashMap;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Retry configuration for a single status code
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    #[serde(default)]
    pub max_retry: u32,
    /// Seconds to wait before each retry
    #[serde(default)]
    pub wait: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry: 0,
            wait: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_retry: u32, wait: f64) -> Self {
        Self { max_retry, wait }
    }

    /// Wait between attempts as a duration.
    ///
    /// Negative or non-finite waits collapse to zero; waits too large for a
    /// `Duration` saturate at `Duration::MAX`.
    pub fn wait_duration(&self) -> Duration {
        if self.wait.is_finite() && self.wait > 0.0 {
            Duration::try_from_secs_f64(self.wait).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// Reject waits that are negative, non-finite or do not fit a `Duration`
    pub fn validate(&self) -> Result<()> {
        if !self.wait.is_finite() || Duration::try_from_secs_f64(self.wait).is_err() {
            return Err(Error::configuration(format!(
                "Retry wait must be a non-negative number of seconds, got {}",
                self.wait
            )));
        }
        Ok(())
    }

    /// Create the backoff schedule for this status: a constant interval
    pub fn create_backoff(&self) -> Constant {
        Constant::new(self.wait_duration())
    }
}

/// Status code to retry policy mapping, owned by one engine
#[derive(Debug, Clone, PartialEq)]
pub struct RetryTable {
    policies: HashMap<u16, RetryPolicy>,
}

impl Default for RetryTable {
    fn default() -> Self {
        let mut policies = HashMap::new();
        // unauthorized: one retry, giving an OAuth authenticator a chance to refresh
        policies.insert(401, RetryPolicy::new(1, 0.0));
        // too many requests
        policies.insert(429, RetryPolicy::new(3, 3.0));
        Self { policies }
    }
}

impl RetryTable {
    /// Build a table from the defaults plus caller overrides.
    ///
    /// Each override replaces the whole entry for its status code. Codes that
    /// are not recognised HTTP statuses are skipped.
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (u16, RetryPolicy)>,
    {
        let mut table = Self::default();
        for (code, policy) in overrides {
            if !is_known_status(code) {
                log::debug!("Ignoring retry policy for unknown status code {}", code);
                continue;
            }
            table.policies.insert(code, policy);
        }
        table
    }

    /// Policy configured for a status code
    pub fn policy(&self, code: u16) -> Option<&RetryPolicy> {
        self.policies.get(&code)
    }

    /// Status codes with a configured policy
    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.policies.keys().copied()
    }

    /// Start a fresh, zeroed budget for one call
    pub fn budget(&self) -> RetryBudget<'_> {
        RetryBudget {
            table: self,
            used: HashMap::new(),
        }
    }
}

/// Call-local retry counters
#[derive(Debug)]
pub struct RetryBudget<'a> {
    table: &'a RetryTable,
    used: HashMap<u16, u32>,
}

impl RetryBudget<'_> {
    /// Whether another retry is allowed for this status
    pub fn can_retry(&self, code: u16) -> bool {
        match self.table.policy(code) {
            Some(policy) => self.retries(code) < policy.max_retry,
            None => false,
        }
    }

    /// Retries already spent on this status
    pub fn retries(&self, code: u16) -> u32 {
        self.used.get(&code).copied().unwrap_or(0)
    }

    /// Wait before the next retry for this status
    pub fn next_wait(&self, code: u16) -> Duration {
        self.table
            .policy(code)
            .and_then(|policy| policy.create_backoff().next_backoff())
            .unwrap_or(Duration::ZERO)
    }

    /// Record one spent retry for this status
    pub fn record(&mut self, code: u16) {
        *self.used.entry(code).or_insert(0) += 1;
    }
}

/// Whether `code` is a registered HTTP status code
pub fn is_known_status(code: u16) -> bool {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .is_some()
}
