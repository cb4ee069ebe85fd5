//! Page-number pagination driven by the `Link` response header
//!
//! Requests carry `page` and `per_page` query parameters; the walk continues
//! while the response advertises a `rel="next"` link.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::{
    attached, collect_pages, default_param, PageCallback, PageQuery, Pages, Paginator,
    DEFAULT_PAGE_SIZE,
};
use crate::http::client::RestClient;
use crate::http::response::Response;
use crate::Result;

static LINK_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(.*?)>").expect("Valid regex pattern"));
static LINK_REL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(current|next|first|last)").expect("Valid regex pattern"));

/// Parse a `Link` header into relation to URL pairs.
///
/// Only `current`, `next`, `first` and `last` are recognised. Segments that are
/// not of the form `<url>; rel="relation"` are skipped.
pub fn parse_link_header(header: Option<&str>) -> HashMap<String, String> {
    let mut links = HashMap::new();
    let Some(header) = header else {
        return links;
    };

    for segment in header.split(',') {
        let parts: Vec<&str> = segment.split(';').collect();
        let [uri_part, rel_part] = parts.as_slice() else {
            continue;
        };

        let uri = LINK_URI.captures(uri_part).and_then(|caps| caps.get(1));
        let rel = LINK_REL.find(rel_part);
        if let (Some(uri), Some(rel)) = (uri, rel) {
            links.insert(rel.as_str().to_string(), uri.as_str().to_string());
        }
    }
    links
}

/// Paginator for APIs that advertise further pages in a `Link` header
#[derive(Debug, Clone)]
pub struct HeaderLinkPaginator {
    per_page: u32,
    client: Option<Arc<RestClient>>,
}

impl Default for HeaderLinkPaginator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderLinkPaginator {
    pub fn new() -> Self {
        Self::with_per_page(DEFAULT_PAGE_SIZE)
    }

    /// Page size sent as `per_page` unless the caller already set one
    pub fn with_per_page(per_page: u32) -> Self {
        Self { per_page, client: None }
    }

    /// Attach the client used by [`HeaderLinkPaginator::paginate`]
    pub fn with_client(mut self, client: Arc<RestClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
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
impl Paginator for HeaderLinkPaginator {
    async fn paginate_with(
        &self,
        client: &RestClient,
        mut query: PageQuery,
        on_page: &mut PageCallback<'_>,
    ) -> Result<()> {
        default_param(&mut query, "per_page", self.per_page);
        let mut page: u64 = 1;

        loop {
            query.query_params.insert("page".to_string(), page.to_string());
            let response = client.execute(query.to_request()).await?;
            let has_next = parse_link_header(response.header("link")).contains_key("next");
            on_page(response)?;

            if !has_next {
                break;
            }
            page += 1;
            log::debug!("Fetching page {} of {}", page, query.uri);
        }
        Ok(())
    }

    fn aggregate(&self, responses: Vec<Response>) -> Vec<Value> {
        let mut items = Vec::new();
        for response in responses {
            match response.body.to_value() {
                Value::Array(values) => items.extend(values),
                other => items.push(other),
            }
        }
        items
    }
}
