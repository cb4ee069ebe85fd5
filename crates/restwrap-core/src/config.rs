//! Engine configuration
//!
//! A [`RestClientConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! host = "https://api.example.com"
//! timeout_secs = 10
//!
//! [retries.503]
//! max_retry = 2
//! wait = 0.5
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::http::retry::{RetryPolicy, RetryTable};
use crate::{Error, Result};

/// Default per-request transport timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Settings for a [`crate::RestClient`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestClientConfig {
    /// Scheme and authority every request is sent to, e.g. `https://api.example.com`
    pub host: String,

    /// Per-status retry overrides keyed by status code
    #[serde(default)]
    pub retries: HashMap<String, RetryPolicy>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RestClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            retries: HashMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Override the retry policy for one status code
    pub fn with_retry(mut self, code: u16, policy: RetryPolicy) -> Self {
        self.retries.insert(code.to_string(), policy);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::Configuration {
            message: format!("Invalid client configuration: {}", e),
            source: Some(e.into()),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Default retry table with the configured overrides applied.
    ///
    /// Keys that are not a recognised HTTP status code are dropped.
    pub fn retry_table(&self) -> RetryTable {
        let overrides = self.retries.iter().filter_map(|(code, policy)| {
            match code.trim().parse::<u16>() {
                Ok(code) => Some((code, *policy)),
                Err(_) => {
                    log::warn!("Ignoring retry override for non-numeric status {:?}", code);
                    None
                }
            }
        });
        RetryTable::with_overrides(overrides)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::configuration("Host must not be empty"));
        }

        let url = Url::parse(&self.host).map_err(|e| Error::Configuration {
            message: format!("Host {:?} is not an absolute URL", self.host),
            source: Some(e.into()),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::configuration(format!(
                "Host {:?} must use http or https",
                self.host
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::configuration(format!("Host {:?} has no host name", self.host)));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(Error::configuration(format!(
                "Host {:?} must not carry a path, query or fragment",
                self.host
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::configuration("timeout_secs must be greater than zero"));
        }
        for (code, policy) in &self.retries {
            policy.validate().map_err(|e| {
                Error::configuration(format!("Invalid retry policy for {code}: {e}"))
            })?;
        }

        Ok(())
    }
}
