//! Request execution engine
//!
//! [`RestClient`] ties the pieces together: it validates a [`Request`],
//! attaches auth, resolves the URI against the configured host and sends it
//! through a [`Transport`], retrying per status code until the response is a
//! success or the retry budget for that status runs out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::{Origin, Url};

use crate::config::RestClientConfig;
use crate::http::auth::{AuthTarget, Authenticator};
use crate::http::oauth::OAuthAuthenticator;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::retry::RetryTable;
use crate::http::status::{classify, Classification};
use crate::http::transport::{ReqwestTransport, Transport, TransportRequest};
use crate::pagination::{collect_pages, PageQuery, Pages, Paginator};
use crate::{Error, Result};

/// Resilient client for one REST host
pub struct RestClient {
    host: String,
    origin: Origin,
    retries: RetryTable,
    transport: Arc<dyn Transport>,
    authenticator: Option<Arc<dyn Authenticator>>,
    paginator: Option<Arc<dyn Paginator>>,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("host", &self.host)
            .field("retries", &self.retries)
            .field("authenticator", &self.authenticator)
            .field("paginator", &self.paginator)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// Client for `host` with the default retry table and a `reqwest` transport
    pub fn new(host: impl Into<String>) -> Result<Self> {
        Self::with_config(RestClientConfig::new(host))
    }

    pub fn with_config(config: RestClientConfig) -> Result<Self> {
        config.validate()?;

        let origin = Url::parse(&config.host)
            .map_err(|e| Error::Configuration {
                message: format!("Invalid host {:?}", config.host),
                source: Some(e.into()),
            })?
            .origin();
        let transport = ReqwestTransport::new(config.timeout())?;

        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            origin,
            retries: config.retry_table(),
            transport: Arc::new(transport),
            authenticator: None,
            paginator: None,
        })
    }

    /// Replace the transport, e.g. with a preconfigured `reqwest` client or a stub
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_authenticator<A: Authenticator + 'static>(mut self, authenticator: A) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn with_paginator<P: Paginator + 'static>(mut self, paginator: P) -> Self {
        self.paginator = Some(Arc::new(paginator));
        self
    }

    pub fn set_authenticator(&mut self, authenticator: Option<Arc<dyn Authenticator>>) {
        self.authenticator = authenticator;
    }

    pub fn set_paginator(&mut self, paginator: Option<Arc<dyn Paginator>>) {
        self.paginator = paginator;
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn retry_table(&self) -> &RetryTable {
        &self.retries
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    pub fn paginator(&self) -> Option<&Arc<dyn Paginator>> {
        self.paginator.as_ref()
    }

    /// Send `request`, retrying retryable statuses within their budget.
    ///
    /// Validation and configuration problems fail before anything is sent.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let mut budget = self.retries.budget();

        request.validate()?;
        self.apply_auth(&mut request).await?;
        let url = self.resolve_uri(&request.render_uri())?;
        let body = request.encode_payload()?;
        let oauth = self.authenticator.as_deref().and_then(|auth| auth.as_oauth());

        loop {
            let token_snapshot = oauth.and_then(OAuthAuthenticator::access_token);

            log::debug!("{} {}", request.method, url);
            let outcome = self
                .transport
                .send(TransportRequest {
                    method: request.method,
                    url: url.clone(),
                    headers: request.headers.clone(),
                    query: request.query_params.clone(),
                    body: body.clone(),
                })
                .await;

            let status = match &outcome {
                Ok(response) => Some(response.status),
                Err(err) => err.status(),
            };

            match (classify(status, &budget), status) {
                (Classification::Success, _) => {
                    return match outcome {
                        Ok(raw) => Response::from_raw(raw),
                        Err(err) => Err(err.into()),
                    };
                }
                (Classification::RetryCandidate, Some(code)) => {
                    let wait = budget.next_wait(code);
                    log::warn!(
                        "{} {} returned {}, retry {} in {:?}",
                        request.method,
                        url,
                        code,
                        budget.retries(code) + 1,
                        wait
                    );
                    tokio::time::sleep(wait).await;

                    if code == 401 {
                        if let Some(oauth) = oauth {
                            oauth.authenticate(token_snapshot.as_deref()).await?;
                            self.apply_auth(&mut request).await?;
                        }
                    }
                    budget.record(code);
                }
                _ => {
                    return Err(match outcome {
                        Ok(raw) => {
                            let line = format!("{} {}", request.method, url);
                            log::error!("{} failed with status {}", line, raw.status);
                            Error::UnsuccessfulResponse {
                                message: format!("{} returned status {}", line, raw.status),
                                response: Box::new(raw),
                            }
                        }
                        Err(err) => {
                            log::error!("{} {} failed: {}", request.method, url, err);
                            err.into()
                        }
                    });
                }
            }
        }
    }

    /// [`RestClient::execute`] bounded by an overall deadline, backoff waits included
    pub async fn execute_with_deadline(
        &self,
        request: Request,
        deadline: Duration,
    ) -> Result<Response> {
        tokio::time::timeout(deadline, self.execute(request))
            .await
            .map_err(|_| Error::Transport {
                message: format!("Request deadline exceeded after {:?}", deadline),
                response: None,
                source: None,
            })?
    }

    /// Build a [`Request`] from loose parts and execute it
    pub async fn make_request(
        &self,
        method: Method,
        uri: &str,
        segment_params: HashMap<String, String>,
        query_params: HashMap<String, String>,
        headers: HashMap<String, String>,
        payload: Value,
    ) -> Result<Response> {
        let request = Request::new(method, uri)
            .with_headers(headers)
            .with_segment_params(segment_params)
            .with_query_params(query_params)
            .with_payload(payload);
        self.execute(request).await
    }

    /// Fetch every page of `query` through the configured paginator
    pub async fn make_request_for_pages(&self, query: PageQuery, aggregate: bool) -> Result<Pages> {
        let paginator = self.require_paginator()?;
        collect_pages(&**paginator, self, query, aggregate).await
    }

    /// Paginated counterpart of [`RestClient::execute`]; the payload is not sent
    pub async fn execute_paginated_request(
        &self,
        request: &Request,
        aggregate: bool,
    ) -> Result<Pages> {
        self.make_request_for_pages(PageQuery::from(request), aggregate).await
    }

    /// Hand each page to `on_page` as it arrives instead of buffering
    pub async fn for_each_page<F>(&self, query: PageQuery, mut on_page: F) -> Result<()>
    where
        F: FnMut(Response) -> Result<()> + Send,
    {
        let paginator = self.require_paginator()?;
        paginator.paginate_with(self, query, &mut on_page).await
    }

    fn require_paginator(&self) -> Result<&Arc<dyn Paginator>> {
        self.paginator
            .as_ref()
            .ok_or_else(|| Error::configuration("No paginator configured for this client"))
    }

    async fn apply_auth(&self, request: &mut Request) -> Result<()> {
        let Some(authenticator) = &self.authenticator else {
            return Ok(());
        };

        let auth = authenticator.generate_auth().await?;
        match authenticator.target() {
            AuthTarget::Header => {
                for (name, value) in auth {
                    request.set_header(name, value);
                }
            }
            AuthTarget::QueryParam => request.query_params.extend(auth),
        }
        Ok(())
    }

    /// Absolute URL for a rendered URI; absolute URIs must point at the configured host
    fn resolve_uri(&self, uri: &str) -> Result<String> {
        match Url::parse(uri) {
            Ok(url) if url.origin() == self.origin => Ok(uri.to_string()),
            Ok(_) => Err(Error::configuration(format!(
                "URI {} does not match the configured host {}",
                uri, self.host
            ))),
            Err(url::ParseError::RelativeUrlWithoutBase) if uri.starts_with('/') => {
                Ok(format!("{}{}", self.host, uri))
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(format!("{}/{}", self.host, uri)),
            Err(e) => Err(Error::Validation {
                field: "uri".to_string(),
                message: format!("URI {} could not be parsed: {}", uri, e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::auth::{BasicAuthenticator, CustomAuthenticator};
    use crate::http::oauth::{OAuthSettings, TokenRegistry};
    use crate::http::response::{Body, RawResponse};
    use crate::http::retry::RetryPolicy;
    use crate::http::testing::ScriptedTransport;
    use crate::http::transport::TransportError;
    use crate::pagination::HeaderLinkPaginator;
    use serde_json::json;
    use tokio::time::Instant;

    const HOST: &str = "http://api.example.com";

    fn client(transport: Arc<ScriptedTransport>) -> RestClient {
        RestClient::new(HOST).unwrap().with_transport(transport)
    }

    fn ok(body: Value) -> std::result::Result<RawResponse, TransportError> {
        Ok(RawResponse::json(200, &body))
    }

    fn status(code: u16) -> std::result::Result<RawResponse, TransportError> {
        Ok(RawResponse::json(code, &json!({"error": code})))
    }

    #[tokio::test]
    async fn test_get_with_basic_auth() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(json!({"result": "ok"}))]));
        let client =
            client(transport.clone()).with_authenticator(BasicAuthenticator::new("user", "pass"));

        let response = client
            .execute(Request::new(Method::Get, "/v1/items/<id>").with_segment_param("id", 42))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, Body::Json(json!({"result": "ok"})));

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "http://api.example.com/v1/items/42");
        assert_eq!(sent.method, Method::Get);
        assert_eq!(sent.headers["Authorization"], "Basic dXNlcjpwYXNz");
        assert_eq!(sent.body, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_retried_with_backoff() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(429),
            status(429),
            status(429),
            ok(json!({"result": "ok"})),
        ]));
        let client = client(transport.clone());

        let started = Instant::now();
        let response = client.execute(Request::new(Method::Get, "/items")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 4);
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhaustion() {
        let transport = Arc::new(ScriptedTransport::from_fn(|_, _| status(503)));
        let client = RestClient::with_config(
            RestClientConfig::new(HOST).with_retry(503, RetryPolicy::new(2, 0.5)),
        )
        .unwrap()
        .with_transport(transport.clone());

        let err = client.execute(Request::new(Method::Get, "/items")).await.unwrap_err();
        assert!(matches!(err, Error::UnsuccessfulResponse { .. }));
        assert_eq!(err.status(), Some(503));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_per_call() {
        let transport = Arc::new(ScriptedTransport::from_fn(|_, index| {
            if index % 2 == 0 {
                status(401)
            } else {
                ok(json!({}))
            }
        }));
        let client = client(transport.clone());

        for _ in 0..3 {
            client.execute(Request::new(Method::Get, "/items")).await.unwrap();
        }
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test]
    async fn test_terminal_status_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(404)]));
        let client = client(transport.clone());

        let err = client.execute(Request::new(Method::Get, "/missing")).await.unwrap_err();
        match err {
            Error::UnsuccessfulResponse { response, .. } => {
                assert_eq!(response.status, 404);
                assert_eq!(response.text(), r#"{"error":404}"#);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_content_is_unsuccessful() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::new(204))]));
        let err = client(transport)
            .execute(Request::new(Method::Delete, "/items/1"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(204));
    }

    #[tokio::test]
    async fn test_transport_failure_without_response_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::new(
            "connection refused",
        ))]));
        let err = client(transport.clone())
            .execute(Request::new(Method::Get, "/items"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { response: None, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_with_partial_response_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::new("body read failed").with_response(RawResponse::new(429))),
            ok(json!({"recovered": true})),
        ]));
        let response = client(transport.clone())
            .execute(Request::new(Method::Get, "/items"))
            .await
            .unwrap();
        assert_eq!(response.body.as_json(), Some(&json!({"recovered": true})));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_segment_param_fails_before_sending() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let err = client(transport.clone())
            .execute(
                Request::new(Method::Get, "/users/<user>/posts/<post>")
                    .with_segment_param("user", 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "segment_params"));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_host_mismatch_is_configuration_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(json!({}))]));
        let client = client(transport.clone());

        let err = client
            .execute(Request::new(Method::Get, "http://other.example.com/items"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = client
            .execute(Request::new(Method::Get, "https://api.example.com/items"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(transport.calls(), 0);

        client
            .execute(Request::new(Method::Get, "HTTP://API.EXAMPLE.COM/items"))
            .await
            .unwrap();
        assert_eq!(transport.requests()[0].url, "HTTP://API.EXAMPLE.COM/items");
    }

    #[tokio::test]
    async fn test_relative_uri_without_leading_slash() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(json!({}))]));
        let client = RestClient::new("http://api.example.com/")
            .unwrap()
            .with_transport(transport.clone());

        client.execute(Request::new(Method::Get, "items")).await.unwrap();
        assert_eq!(transport.requests()[0].url, "http://api.example.com/items");
    }

    #[tokio::test]
    async fn test_query_param_auth() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(json!({}))]));
        let auth = CustomAuthenticator::new(
            "query_param",
            HashMap::from([("api_key".to_string(), "k".to_string())]),
        )
        .unwrap();
        client(transport.clone())
            .with_authenticator(auth)
            .execute(Request::new(Method::Get, "/items").with_query_param("q", "x"))
            .await
            .unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.query["api_key"], "k");
        assert_eq!(sent.query["q"], "x");
        assert!(!sent.headers.contains_key("api_key"));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let transport =
            Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::json(201, &json!("ok")))]));
        let response = client(transport.clone())
            .execute(Request::new(Method::Post, "/items").with_payload(json!({"name": "widget"})))
            .await
            .unwrap();
        assert_eq!(response.body.as_json(), Some(&json!({"ok": true})));

        let sent = &transport.requests()[0];
        assert_eq!(sent.headers["Content-Type"], "application/json");
        let body: Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"name": "widget"}));
    }

    #[tokio::test]
    async fn test_repeated_execution_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::from_fn(|_, _| ok(json!({"items": [1, 2]}))));
        let client = client(transport);
        let request = Request::new(Method::Get, "/items/<id>").with_segment_param("id", 7);

        let first = client.execute(request.clone()).await.unwrap();
        let second = client.execute(request).await.unwrap();
        assert_eq!(first.body, second.body);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oauth_refresh_on_401() {
        let api = Arc::new(ScriptedTransport::new(vec![status(401), ok(json!({"result": "ok"}))]));
        let tokens = Arc::new(ScriptedTransport::new(vec![
            Ok(RawResponse::json(200, &json!({"access_token": "first", "refresh_token": "r1"}))),
            Ok(RawResponse::json(200, &json!({"access_token": "second", "refresh_token": "r2"}))),
        ]));
        let registry = Arc::new(TokenRegistry::with_transport(tokens.clone()));
        let oauth = OAuthAuthenticator::new(
            registry.clone(),
            "client-1",
            OAuthSettings::new("http://auth.example.com", "/oauth/token", "secret"),
        );
        registry.authenticate("client-1", None).await.unwrap();

        let response = client(api.clone())
            .with_authenticator(oauth)
            .execute(Request::new(Method::Get, "/items"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(api.calls() + tokens.calls(), 4);
        assert_eq!(api.calls(), 2);
        // one priming call plus one refresh triggered by the 401
        assert_eq!(tokens.calls(), 2);

        let sent = api.requests();
        assert_eq!(sent[0].headers["Authorization"], "Bearer first");
        assert_eq!(sent[1].headers["Authorization"], "Bearer second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_deadline() {
        let transport = Arc::new(ScriptedTransport::from_fn(|_, _| status(429)));
        let client = client(transport);

        let err = client
            .execute_with_deadline(Request::new(Method::Get, "/items"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.to_string().contains("deadline"));
    }

    #[tokio::test]
    async fn test_make_request() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(json!({"id": 5}))]));
        let response = client(transport.clone())
            .make_request(
                Method::Put,
                "/items/<id>",
                HashMap::from([("id".to_string(), "5".to_string())]),
                HashMap::new(),
                HashMap::from([("X-Trace".to_string(), "t-1".to_string())]),
                json!({"name": "gadget"}),
            )
            .await
            .unwrap();
        assert_eq!(response.body.as_json(), Some(&json!({"id": 5})));

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "http://api.example.com/items/5");
        assert_eq!(sent.headers["X-Trace"], "t-1");
    }

    #[tokio::test]
    async fn test_pagination_requires_paginator() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let err = client(transport)
            .make_request_for_pages(PageQuery::new(Method::Get, "/items"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_execute_paginated_request() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(RawResponse::json(200, &json!([1]))
                .with_header("link", r#"<http://api.example.com/items?page=2>; rel="next""#)),
            ok(json!([2])),
        ]));
        let client =
            client(transport.clone()).with_paginator(HeaderLinkPaginator::with_per_page(1));

        let request = Request::new(Method::Get, "/<kind>").with_segment_param("kind", "items");
        let pages = client.execute_paginated_request(&request, true).await.unwrap();
        assert_eq!(pages, Pages::Data(vec![json!(1), json!(2)]));
        assert_eq!(transport.requests()[1].query["page"], "2");

        let transport = Arc::new(ScriptedTransport::new(vec![ok(json!([3]))]));
        let client = RestClient::new(HOST)
            .unwrap()
            .with_transport(transport)
            .with_paginator(HeaderLinkPaginator::new());
        let mut pages = 0;
        client
            .for_each_page(PageQuery::new(Method::Get, "/items"), |_| {
                pages += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(pages, 1);
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        assert!(matches!(RestClient::new("not a url"), Err(Error::Configuration { .. })));
    }
}
