//! OAuth2 client-credentials token cache
//!
//! [`TokenRegistry`] holds one entry per client id: the token endpoint
//! settings, the current token pair and a refresh lock. The registry is an
//! explicit object; the application creates it once and hands an `Arc` of it to
//! every [`OAuthAuthenticator`] that should share tokens.
//!
//! Refreshes are single-flight per client id. Callers that arrive while a
//! refresh is running queue on the entry's lock and, once inside, notice the
//! token has changed since they last looked and return it without another
//! network call. Different client ids never wait on each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::http::auth::Authenticator;
use crate::http::request::{essence, Method, FORM_CONTENT_TYPE, JSON_CONTENT_TYPE};
use crate::http::response::RawResponse;
use crate::http::transport::{ReqwestTransport, Transport, TransportRequest};
use crate::{Error, Result};

pub const CLIENT_CREDENTIALS: &str = "client_credentials";

/// Token endpoint settings for one client id
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    /// Base URL of the authorization server, e.g. `https://auth.example.com`
    pub site: String,
    /// Path appended to `site`, e.g. `/oauth/token`
    pub token_url_path: String,
    pub client_secret: String,
}

impl OAuthSettings {
    pub fn new(
        site: impl Into<String>,
        token_url_path: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            site: site.into(),
            token_url_path: token_url_path.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}{}", self.site, self.token_url_path)
    }
}

impl fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("site", &self.site)
            .field("token_url_path", &self.token_url_path)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone)]
struct TokenPair {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

struct ClientEntry {
    settings: OAuthSettings,
    refresh_lock: Mutex<()>,
    tokens: RwLock<TokenPair>,
}

impl ClientEntry {
    fn tokens(&self) -> TokenPair {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, pair: TokenPair) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = pair;
    }
}

/// Shared OAuth token cache keyed by client id
pub struct TokenRegistry {
    transport: Arc<dyn Transport>,
    clients: RwLock<HashMap<String, Arc<ClientEntry>>>,
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<&String> = clients.keys().collect();
        ids.sort();
        f.debug_struct("TokenRegistry").field("clients", &ids).finish()
    }
}

impl TokenRegistry {
    /// Registry that fetches tokens over a default `reqwest` transport
    pub fn new() -> Result<Self> {
        let transport = ReqwestTransport::new(std::time::Duration::from_secs(30))?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or re-register) a client id with fresh settings and no tokens
    pub fn register(&self, client_id: impl Into<String>, settings: OAuthSettings) {
        let entry = Arc::new(ClientEntry {
            settings,
            refresh_lock: Mutex::new(()),
            tokens: RwLock::new(TokenPair::default()),
        });
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id.into(), entry);
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(client_id)
    }

    /// Currently cached access token
    pub fn access_token(&self, client_id: &str) -> Option<String> {
        self.entry(client_id).ok()?.tokens().access_token
    }

    /// Currently cached refresh token
    pub fn refresh_token(&self, client_id: &str) -> Option<String> {
        self.entry(client_id).ok()?.tokens().refresh_token
    }

    /// Obtain a token for `client_id`, refreshing it at most once per caller wave.
    ///
    /// `current_token` is the token the caller last saw (typically the one a
    /// 401 was received with). If the cached token already differs from it, or
    /// the caller had none and one is now cached, another caller refreshed it
    /// while this one waited, and the cached token is returned without a network
    /// call.
    pub async fn authenticate(
        &self,
        client_id: &str,
        current_token: Option<&str>,
    ) -> Result<String> {
        let entry = self.entry(client_id)?;
        let _guard = entry.refresh_lock.lock().await;

        if let Some(cached) = entry.tokens().access_token {
            let already_refreshed = match current_token {
                None => true,
                Some(seen) => !cached.eq_ignore_ascii_case(seen),
            };
            if already_refreshed {
                debug!(client_id, "OAuth token already refreshed by another caller");
                return Ok(cached);
            }
        }

        let pair = self.request_token(client_id, &entry.settings).await?;
        let access_token = pair.access_token.clone().ok_or_else(|| Error::Authentication {
            client_id: client_id.to_string(),
            message: "Token response did not contain an access_token".to_string(),
            status_code: None,
        })?;
        entry.store(pair);
        info!(client_id, "OAuth access token refreshed");
        Ok(access_token)
    }

    fn entry(&self, client_id: &str) -> Result<Arc<ClientEntry>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .cloned()
            .ok_or_else(|| {
                Error::configuration(format!("OAuth client {} is not registered", client_id))
            })
    }

    async fn request_token(&self, client_id: &str, settings: &OAuthSettings) -> Result<TokenPair> {
        let form = [
            ("grant_type", CLIENT_CREDENTIALS),
            ("client_id", client_id),
            ("client_secret", settings.client_secret.as_str()),
        ];
        let body = serde_urlencoded::to_string(&form[..]).map_err(|e| Error::Configuration {
            message: "OAuth credentials could not be form-encoded".to_string(),
            source: Some(e.into()),
        })?;

        let request = TransportRequest {
            method: Method::Post,
            url: settings.token_url(),
            headers: HashMap::from([
                ("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()),
                ("Accept".to_string(), JSON_CONTENT_TYPE.to_string()),
            ]),
            query: HashMap::new(),
            body: Some(Bytes::from(body)),
        };

        debug!(client_id, url = %request.url, "Requesting OAuth token");
        let response = self.transport.send(request).await?;

        if !(200..300).contains(&response.status) {
            return Err(Error::Authentication {
                client_id: client_id.to_string(),
                message: format!("Token endpoint answered with status {}", response.status),
                status_code: Some(response.status),
            });
        }

        let content_type = response.header("content-type").map(essence);
        if content_type.as_deref() != Some(JSON_CONTENT_TYPE) {
            return Err(unexpected_token_format(response, None));
        }

        match serde_json::from_slice::<TokenPayload>(&response.body) {
            Ok(payload) => Ok(TokenPair {
                access_token: payload.access_token,
                refresh_token: payload.refresh_token,
            }),
            Err(e) => Err(unexpected_token_format(response, Some(e.into()))),
        }
    }
}

fn unexpected_token_format(response: RawResponse, source: Option<anyhow::Error>) -> Error {
    Error::Parse {
        message: "Unable to retrieve token, response was in an unexpected format".to_string(),
        response: Box::new(response),
        source,
    }
}

/// Authenticator that sends `Authorization: Bearer <token>` from a [`TokenRegistry`]
#[derive(Clone)]
pub struct OAuthAuthenticator {
    registry: Arc<TokenRegistry>,
    client_id: String,
}

impl OAuthAuthenticator {
    /// Register `client_id` in `registry` and build an authenticator for it.
    ///
    /// Registering resets any tokens previously cached for the same client id.
    pub fn new(
        registry: Arc<TokenRegistry>,
        client_id: impl Into<String>,
        settings: OAuthSettings,
    ) -> Self {
        let client_id = client_id.into();
        registry.register(client_id.clone(), settings);
        Self { registry, client_id }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// Cached access token, if any
    pub fn access_token(&self) -> Option<String> {
        self.registry.access_token(&self.client_id)
    }

    /// Refresh unless someone already replaced `seen_token`
    pub async fn authenticate(&self, seen_token: Option<&str>) -> Result<String> {
        self.registry.authenticate(&self.client_id, seen_token).await
    }
}

impl fmt::Debug for OAuthAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthAuthenticator")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator for OAuthAuthenticator {
    async fn generate_auth(&self) -> Result<HashMap<String, String>> {
        if self.access_token().is_none() {
            self.authenticate(None).await?;
        }
        let token = self.access_token().ok_or_else(|| Error::Authentication {
            client_id: self.client_id.clone(),
            message: format!("Unable to authenticate {}", self.client_id),
            status_code: None,
        })?;
        Ok(HashMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", token),
        )]))
    }

    fn as_oauth(&self) -> Option<&OAuthAuthenticator> {
        Some(self)
    }
}
