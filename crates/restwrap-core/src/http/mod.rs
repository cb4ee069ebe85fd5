//! HTTP request engine
//!
//! This module provides a resilient REST client with:
//! - Requests described as URI templates with segment and query parameters
//! - Pluggable authentication (Basic, static token, custom, OAuth2 client credentials)
//! - Status classification with per-status retry budgets and waits
//! - A transport seam, backed by `reqwest` in production

pub mod auth;
pub mod client;
pub mod oauth;
pub mod request;
pub mod response;
pub mod retry;
pub mod status;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{
    AuthTarget, Authenticator, BasicAuthenticator, CustomAuthenticator, TokenAuthenticator,
};
pub use client::RestClient;
pub use oauth::{OAuthAuthenticator, OAuthSettings, TokenRegistry};
pub use request::{Method, Payload, Request};
pub use response::{Body, RawResponse, Response};
pub use retry::{RetryBudget, RetryPolicy, RetryTable};
pub use status::{classify, is_success, Classification, SUCCESS_STATUS_CODES};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportRequest};
