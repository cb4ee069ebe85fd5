//! Offset pagination driven by a `next` link in the response body
//!
//! Each page body carries a `next` URL; its `offset` query parameter is fed
//! into the following request. The walk ends on the first page whose `next`
//! link has no `offset`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::{
    attached, collect_pages, default_param, PageCallback, PageQuery, Pages, Paginator,
    DEFAULT_PAGE_SIZE,
};
use crate::http::client::RestClient;
use crate::http::response::Response;
use crate::Result;

/// Paginator for APIs that embed the next page link in the body
#[derive(Debug, Clone)]
pub struct OffsetPaginator {
    limit: u32,
    client: Option<Arc<RestClient>>,
}

impl Default for OffsetPaginator {
    fn default() -> Self {
        Self::new()
    }
}

impl OffsetPaginator {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_PAGE_SIZE)
    }

    /// Page size sent as `limit` unless the caller already set one
    pub fn with_limit(limit: u32) -> Self {
        Self { limit, client: None }
    }

    /// Attach the client used by [`OffsetPaginator::paginate`]
    pub fn with_client(mut self, client: Arc<RestClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Fetch all pages through the attached client
    pub async fn paginate(&self, query: PageQuery, aggregate: bool) -> Result<Pages> {
        let client = attached(&self.client)?;
        collect_pages(self, client, query, aggregate).await
    }

    /// Stream all pages through the attached client
    pub async fn paginate_each<F>(&self, query: PageQuery, mut on_page: F) -> Result<()>
    where
        F: FnMut(Response) -> Result<()> + Send,
    {
        let client = attached(&self.client)?;
        self.paginate_with(client, query, &mut on_page).await
    }
}

#[async_trait]
impl Paginator for OffsetPaginator {
    async fn paginate_with(
        &self,
        client: &RestClient,
        mut query: PageQuery,
        on_page: &mut PageCallback<'_>,
    ) -> Result<()> {
        default_param(&mut query, "limit", self.limit);

        loop {
            let response = client.execute(query.to_request()).await?;
            let offset = next_offset(&response);
            on_page(response)?;

            match offset {
                Some(offset) => {
                    log::debug!("Fetching next page at offset {}", offset);
                    query.query_params.insert("offset".to_string(), offset);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn aggregate(&self, responses: Vec<Response>) -> Vec<Value> {
        let mut items = Vec::new();
        for response in responses {
            match response.body.to_value().get_mut("data").map(Value::take) {
                Some(Value::Array(data)) => items.extend(data),
                Some(Value::Null) | None => {}
                Some(other) => items.push(other),
            }
        }
        items
    }
}

/// `offset` query parameter of the body's `next` link
pub fn next_offset(response: &Response) -> Option<String> {
    let next = response.body.as_json()?.get("next")?.as_str()?;
    // relative links resolve against a placeholder base; only the query matters
    let url = Url::parse("http://localhost/").ok()?.join(next).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "offset")
        .map(|(_, value)| value.into_owned())
}
