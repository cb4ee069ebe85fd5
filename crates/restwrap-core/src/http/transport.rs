//! Transport boundary
//!
//! The engine never talks to the network directly; it hands a fully resolved
//! [`TransportRequest`] to a [`Transport`] and gets a [`RawResponse`] back.
//! Non-2xx statuses are ordinary responses at this level. A [`TransportError`]
//! means no complete response was obtained, though a partial one may be
//! attached.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client as ReqwestClient;

use crate::http::request::Method;
use crate::http::response::RawResponse;
use crate::{Error, Result};

/// Fully resolved request as sent over the wire
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Bytes>,
}

/// Failure to obtain a complete response
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// Whatever response was received before the failure, if any
    pub response: Option<RawResponse>,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
            source: None,
        }
    }

    pub fn with_response(mut self, response: RawResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// Status of the attached partial response, if any
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport {
            message: err.message,
            response: err.response.map(Box::new),
            source: err.source,
        }
    }
}

/// Something that can send a request and return the response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Create a transport with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e.into()),
            })?;
        Ok(Self { client })
    }

    /// Wrap an already configured `reqwest` client
    pub fn from_client(client: ReqwestClient) -> Self {
        Self { client }
    }

    fn header_map(
        headers: &HashMap<String, String>,
    ) -> std::result::Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError {
                message: format!("Invalid header name {:?}", name),
                response: None,
                source: Some(e.into()),
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| TransportError {
                message: format!("Invalid value for header {:?}", name),
                response: None,
                source: Some(e.into()),
            })?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<RawResponse, TransportError> {
        let headers = Self::header_map(&request.headers)?;

        let mut query: Vec<(&String, &String)> = request.query.iter().collect();
        query.sort();

        let mut builder = self
            .client
            .request(request.method.to_reqwest(), &request.url)
            .headers(headers);
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("Request to {} timed out", request.url)
            } else if e.is_connect() {
                format!("Could not connect to {}", request.url)
            } else {
                format!("Request to {} failed: {}", request.url, e)
            };
            TransportError {
                message,
                response: None,
                source: Some(e.into()),
            }
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        match response.bytes().await {
            Ok(body) => Ok(RawResponse { status, headers, body }),
            Err(e) => Err(TransportError {
                message: format!("Failed to read response body from {}: {}", request.url, e),
                response: Some(RawResponse {
                    status,
                    headers,
                    body: Bytes::new(),
                }),
                source: Some(e.into()),
            }),
        }
    }
}
