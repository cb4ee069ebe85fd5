//! Restwrap Core - Resilient REST request engine
//!
//! This crate wraps REST APIs behind a small, strongly typed engine that
//! validates requests, attaches credentials, retries by status code and walks
//! paginated collections.
//!
//! # Main Components
//!
//! - **Error Handling**: One error type covering validation, configuration,
//!   transport, response and authentication failures
//! - **Engine**: [`RestClient`] executes [`Request`]s with per-status retries
//! - **Authentication**: Basic, token, custom and OAuth2 client-credentials
//!   authenticators, with a shared [`TokenRegistry`] for single-flight refresh
//! - **Pagination**: Body offset links and `Link` header strategies
//!
//! # Example
//!
//! ```no_run
//! use restwrap_core::{BasicAuthenticator, Method, Request, RestClient, Result};
//!
//! async fn example() -> Result<()> {
//!     let client = RestClient::new("https://api.example.com")?
//!         .with_authenticator(BasicAuthenticator::new("user", "secret"));
//!
//!     let response = client
//!         .execute(Request::new(Method::Get, "/v1/items/<id>").with_segment_param("id", 42))
//!         .await?;
//!     println!("{}", response.body.text());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod pagination;

// Re-export main types for convenience
pub use config::RestClientConfig;
pub use error::{Error, Result};
pub use http::{
    // Engine
    RestClient,

    // Requests and responses
    Body, Method, Payload, RawResponse, Request, Response,

    // Authentication
    AuthTarget, Authenticator, BasicAuthenticator, CustomAuthenticator, TokenAuthenticator,
    OAuthAuthenticator, OAuthSettings, TokenRegistry,

    // Retries
    Classification, RetryPolicy, RetryTable,

    // Transport
    ReqwestTransport, Transport, TransportError, TransportRequest,
};
pub use pagination::{HeaderLinkPaginator, OffsetPaginator, PageQuery, Pages, Paginator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
