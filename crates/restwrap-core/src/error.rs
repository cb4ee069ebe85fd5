//! Error types for the restwrap core library
//!
//! Every failure the engine can surface maps onto one variant of [`Error`], so
//! callers match on the kind of failure instead of inspecting messages.
//! Variants carry whatever context was available when the call failed: the
//! offending field, the raw response, and the wrapped cause.

use thiserror::Error;

use crate::http::response::RawResponse;

/// Main error type for restwrap operations
#[derive(Error, Debug)]
pub enum Error {
    /// Bad caller input: missing segment parameters, bad payload shape, unknown verb
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Engine, authenticator or paginator misconfiguration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The API answered with a status that is neither a success nor retryable
    #[error("Unsuccessful response: {message} (status: {})", response.status)]
    UnsuccessfulResponse {
        message: String,
        response: Box<RawResponse>,
    },

    /// No usable response was obtained from the transport
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        response: Option<Box<RawResponse>>,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A response body could not be interpreted
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        response: Box<RawResponse>,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// OAuth token could not be obtained
    #[error("Authentication error: {client_id} - {message}")]
    Authentication {
        client_id: String,
        message: String,
        status_code: Option<u16>,
    },

    /// Request payload could not be serialized
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// HTTP status attached to this error, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::UnsuccessfulResponse { response, .. } | Error::Parse { response, .. } => {
                Some(response.status)
            }
            Error::Transport { response, .. } => response.as_ref().map(|r| r.status),
            Error::Authentication { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// The raw response attached to this error, if any
    pub fn response(&self) -> Option<&RawResponse> {
        match self {
            Error::UnsuccessfulResponse { response, .. } | Error::Parse { response, .. } => {
                Some(response)
            }
            Error::Transport { response, .. } => response.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
            source: err,
        }
    }
}
