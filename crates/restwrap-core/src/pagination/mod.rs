//! Multi-page collection fetches
//!
//! A [`Paginator`] drives repeated calls through a [`RestClient`], deciding
//! after each page whether another one exists and how to ask for it. Pages are
//! either streamed to a callback as they arrive or buffered and returned
//! together, optionally flattened into their data items.

pub mod header_link;
pub mod offset;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::http::client::RestClient;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::{Error, Result};

pub use header_link::{parse_link_header, HeaderLinkPaginator};
pub use offset::OffsetPaginator;

/// Page size used when the caller does not pick one
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Per-page callback for streaming pagination. Returning an error stops the iteration.
pub type PageCallback<'a> = dyn FnMut(Response) -> Result<()> + Send + 'a;

/// The parts of a request that stay fixed across pages
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub method: Method,
    pub uri: String,
    pub segment_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

impl PageQuery {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            segment_params: HashMap::new(),
            query_params: HashMap::new(),
            headers: HashMap::new(),
        }
    }

    pub fn with_segment_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.segment_params.insert(name.into(), value.to_string());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query_params.insert(name.into(), value.to_string());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// A fresh request for one page
    pub fn to_request(&self) -> Request {
        Request::new(self.method, self.uri.clone())
            .with_headers(self.headers.clone())
            .with_segment_params(self.segment_params.clone())
            .with_query_params(self.query_params.clone())
    }
}

impl From<&Request> for PageQuery {
    fn from(request: &Request) -> Self {
        Self {
            method: request.method,
            uri: request.uri.clone(),
            segment_params: request.segment_params.clone(),
            query_params: request.query_params.clone(),
            headers: request.headers.clone(),
        }
    }
}

/// Result of a buffered pagination run
#[derive(Debug, Clone, PartialEq)]
pub enum Pages {
    /// Every page response, in order
    Responses(Vec<Response>),
    /// Data items of all pages, flattened
    Data(Vec<Value>),
}

impl Pages {
    pub fn len(&self) -> usize {
        match self {
            Pages::Responses(responses) => responses.len(),
            Pages::Data(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn responses(&self) -> Option<&[Response]> {
        match self {
            Pages::Responses(responses) => Some(responses),
            Pages::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&[Value]> {
        match self {
            Pages::Data(items) => Some(items),
            Pages::Responses(_) => None,
        }
    }
}

/// Strategy for walking a paginated collection
#[async_trait]
pub trait Paginator: Send + Sync + fmt::Debug {
    /// Fetch every page through `client`, handing each one to `on_page` before
    /// deciding whether to continue
    async fn paginate_with(
        &self,
        client: &RestClient,
        query: PageQuery,
        on_page: &mut PageCallback<'_>,
    ) -> Result<()>;

    /// Flatten buffered pages into their data items
    fn aggregate(&self, responses: Vec<Response>) -> Vec<Value>;
}

/// Run `paginator` to completion and buffer the pages
pub async fn collect_pages(
    paginator: &dyn Paginator,
    client: &RestClient,
    query: PageQuery,
    aggregate: bool,
) -> Result<Pages> {
    let mut responses = Vec::new();
    paginator
        .paginate_with(client, query, &mut |response: Response| {
            responses.push(response);
            Ok(())
        })
        .await?;

    if aggregate {
        Ok(Pages::Data(paginator.aggregate(responses)))
    } else {
        Ok(Pages::Responses(responses))
    }
}

pub(crate) fn attached(client: &Option<Arc<RestClient>>) -> Result<&RestClient> {
    client
        .as_deref()
        .ok_or_else(|| Error::configuration("Client not set, unable to make API call"))
}

pub(crate) fn default_param(query: &mut PageQuery, name: &str, value: u32) {
    query
        .query_params
        .entry(name.to_string())
        .or_insert_with(|| value.to_string());
}
