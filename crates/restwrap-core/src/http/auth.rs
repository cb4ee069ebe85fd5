//! Authentication handling
//!
//! Supports several authentication schemes:
//! - HTTP Basic credentials
//! - Static tokens (bearer or a custom header)
//! - Caller-supplied key/value pairs merged into headers or query parameters
//! - OAuth2 client credentials (see [`crate::http::oauth`])

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::http::oauth::OAuthAuthenticator;
use crate::{Error, Result};

/// Where generated auth material is merged into a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTarget {
    Header,
    QueryParam,
}

impl FromStr for AuthTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "header" => Ok(AuthTarget::Header),
            "query_param" => Ok(AuthTarget::QueryParam),
            _ => Err(Error::configuration(format!(
                "Invalid auth target {:?}, expected \"header\" or \"query_param\"",
                s
            ))),
        }
    }
}

/// Produces auth material for outgoing requests
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Key/value pairs to merge into the request
    async fn generate_auth(&self) -> Result<HashMap<String, String>>;

    /// Where [`Authenticator::generate_auth`] output goes
    fn target(&self) -> AuthTarget {
        AuthTarget::Header
    }

    /// The OAuth variant, which the engine asks to refresh tokens on 401
    fn as_oauth(&self) -> Option<&OAuthAuthenticator> {
        None
    }
}

/// HTTP Basic authentication
#[derive(Clone)]
pub struct BasicAuthenticator {
    username: String,
    password: String,
}

impl BasicAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn credentials(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", encoded)
    }
}

impl fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthenticator")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator for BasicAuthenticator {
    async fn generate_auth(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([("Authorization".to_string(), self.credentials())]))
    }
}

/// Static token sent in a header on every request
#[derive(Clone)]
pub struct TokenAuthenticator {
    header_name: String,
    header_value: String,
}

impl TokenAuthenticator {
    /// `Authorization: Bearer <token>`
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self {
            header_name: "Authorization".to_string(),
            header_value: format!("Bearer {}", token.as_ref()),
        }
    }

    /// Arbitrary header carrying the token, e.g. `X-Api-Key`
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header_name: name.into(),
            header_value: value.into(),
        }
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("header_name", &self.header_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn generate_auth(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([(
            self.header_name.clone(),
            self.header_value.clone(),
        )]))
    }
}

/// Caller-supplied static mapping merged into headers or query parameters
#[derive(Clone)]
pub struct CustomAuthenticator {
    target: AuthTarget,
    auth_params: HashMap<String, String>,
}

impl CustomAuthenticator {
    /// Create from a target name, `"header"` or `"query_param"`
    pub fn new(target: &str, auth_params: HashMap<String, String>) -> Result<Self> {
        Ok(Self::with_target(target.parse()?, auth_params))
    }

    pub fn with_target(target: AuthTarget, auth_params: HashMap<String, String>) -> Self {
        Self { target, auth_params }
    }
}

impl fmt::Debug for CustomAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.auth_params.keys().collect();
        keys.sort();
        f.debug_struct("CustomAuthenticator")
            .field("target", &self.target)
            .field("keys", &keys)
            .finish()
    }
}

#[async_trait]
impl Authenticator for CustomAuthenticator {
    async fn generate_auth(&self) -> Result<HashMap<String, String>> {
        Ok(self.auth_params.clone())
    }

    fn target(&self) -> AuthTarget {
        self.target
    }
}
