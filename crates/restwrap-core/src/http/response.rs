//! Response values and body parsing

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{json, Value};

use crate::http::request::{essence, JSON_CONTENT_TYPE};
use crate::{Error, Result};

/// Response as handed back by a transport, before any interpretation.
///
/// Header names are lowercase.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// JSON response helper, mostly for tests and stubs
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status)
            .with_header("content-type", JSON_CONTENT_TYPE)
            .with_body(body.to_string())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }

    /// Body as lossy UTF-8, for diagnostics
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parsed response body
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Raw(Bytes),
}

impl Body {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            Body::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Raw(bytes) => Some(bytes),
            Body::Json(_) => None,
        }
    }

    /// Body rendered as text: JSON is serialized, raw bytes are decoded lossily
    pub fn text(&self) -> String {
        match self {
            Body::Json(value) => value.to_string(),
            Body::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Body as a JSON value, decoding raw bytes if they happen to be JSON
    pub fn to_value(&self) -> Value {
        match self {
            Body::Json(value) => value.clone(),
            Body::Raw(bytes) => serde_json::from_slice(bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
        }
    }
}

/// One successful call result
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Body,
}

impl Response {
    /// Interpret a raw response according to its content type
    pub fn from_raw(raw: RawResponse) -> Result<Self> {
        let body = parse_body(&raw)?;
        Ok(Self {
            status: raw.status,
            headers: raw.headers,
            body,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }
}

/// Parse a body by content type.
///
/// JSON bodies are decoded; a bare `"ok"` string becomes `{"ok": true}` and a
/// body that does not decode falls back to the raw bytes. Other content types
/// are returned raw. A content type that is not a `type/subtype` media type
/// is a parse error.
pub fn parse_body(raw: &RawResponse) -> Result<Body> {
    let Some(content_type) = raw.header("content-type") else {
        return Ok(Body::Raw(raw.body.clone()));
    };

    let media_type = essence(content_type);
    let well_formed = media_type
        .split_once('/')
        .is_some_and(|(kind, sub)| !kind.is_empty() && !sub.is_empty() && !sub.contains('/'));
    if !well_formed {
        return Err(Error::Parse {
            message: format!("Response could not be parsed: bad content type {:?}", content_type),
            response: Box::new(raw.clone()),
            source: None,
        });
    }

    if media_type != JSON_CONTENT_TYPE {
        return Ok(Body::Raw(raw.body.clone()));
    }

    if raw.body.as_ref() == br#""ok""# {
        return Ok(Body::Json(json!({ "ok": true })));
    }

    match serde_json::from_slice::<Value>(&raw.body) {
        Ok(value) => Ok(Body::Json(value)),
        Err(e) => {
            log::debug!("JSON response body did not decode, returning raw body: {}", e);
            Ok(Body::Raw(raw.body.clone()))
        }
    }
}

fn header_lookup<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .get(&name.to_ascii_lowercase())
        .or_else(|| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .map(String::as_str)
}
