//! Request definition and URI templating
//!
//! A [`Request`] describes one external call: a URI template with `<name>`
//! placeholders, the verb, headers, segment and query parameters, and a
//! payload. The engine validates it, attaches auth, resolves the template and
//! sends it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(.*?)>").expect("Valid regex pattern"));

/// The recognised HTTP verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl Method {
    /// Verbs whose payload is sent as JSON and that default to JSON headers
    pub fn sends_json(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Connect => reqwest::Method::CONNECT,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Trace => reqwest::Method::TRACE,
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            _ => Err(Error::validation("http_method", format!("Not a valid http method: {}", s))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured value; must be an object when the content type is JSON
    Json(Value),
    /// Opaque bytes; only allowed with a non-JSON content type
    Raw(Bytes),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Json(Value::Object(Map::new()))
    }
}

impl Payload {
    fn is_empty(&self) -> bool {
        match self {
            Payload::Json(Value::Object(map)) => map.is_empty(),
            Payload::Json(Value::Null) => true,
            Payload::Json(_) => false,
            Payload::Raw(bytes) => bytes.is_empty(),
        }
    }
}

/// One external call definition
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub uri: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub segment_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub payload: Payload,
}

impl Request {
    /// Create a request. POST, PUT and PATCH get JSON `Content-Type` and `Accept` headers.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        let mut request = Self {
            uri: uri.into(),
            method,
            headers: HashMap::new(),
            segment_params: HashMap::new(),
            query_params: HashMap::new(),
            payload: Payload::default(),
        };
        request.apply_json_defaults();
        request
    }

    /// Merge one header into the request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Merge several headers into the request
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.set_header(name, value);
        }
        self
    }

    pub fn with_segment_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.segment_params.insert(name.into(), value.to_string());
        self
    }

    pub fn with_segment_params(mut self, params: HashMap<String, String>) -> Self {
        self.segment_params.extend(params);
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query_params.insert(name.into(), value.to_string());
        self
    }

    pub fn with_query_params(mut self, params: HashMap<String, String>) -> Self {
        self.query_params.extend(params);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Payload::Json(payload);
        self
    }

    pub fn with_raw_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Payload::Raw(payload.into());
        self
    }

    /// Set a header, replacing any existing header of the same name regardless of case
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the declared content type is JSON
    pub fn is_json(&self) -> bool {
        self.header("content-type").is_some_and(is_json_media_type)
    }

    /// Placeholder names found in the URI template, in order of appearance
    pub fn placeholders(&self) -> Vec<&str> {
        PLACEHOLDER
            .captures_iter(&self.uri)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Check segment parameters and payload shape before anything is sent
    pub fn validate(&self) -> Result<()> {
        for placeholder in self.placeholders() {
            if !self.segment_params.contains_key(placeholder) {
                return Err(Error::validation(
                    "segment_params",
                    format!(
                        "Segment parameter not provided for {}. URI {}",
                        placeholder, self.uri
                    ),
                ));
            }
        }

        if self.is_json() && !matches!(self.payload, Payload::Json(Value::Object(_))) {
            return Err(Error::validation(
                "payload",
                "Request payload must be a key-value mapping when the content type is JSON",
            ));
        }

        Ok(())
    }

    /// Substitute segment parameters into the URI template
    pub fn render_uri(&self) -> String {
        PLACEHOLDER
            .replace_all(&self.uri, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                self.segment_params
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Encode the payload for the wire.
    ///
    /// JSON verbs with a JSON content type get a JSON body. Otherwise object
    /// payloads are form-encoded and raw payloads pass through; empty payloads
    /// send no body.
    pub fn encode_payload(&self) -> Result<Option<Bytes>> {
        if self.payload.is_empty() {
            return Ok(None);
        }

        match &self.payload {
            Payload::Json(value) if self.method.sends_json() && self.is_json() => {
                Ok(Some(Bytes::from(serde_json::to_vec(value)?)))
            }
            Payload::Json(Value::Object(map)) => {
                let pairs: Vec<(&str, String)> = map
                    .iter()
                    .map(|(key, value)| (key.as_str(), form_value(value)))
                    .collect();
                let encoded = serde_urlencoded::to_string(pairs).map_err(|e| {
                    Error::validation(
                        "payload",
                        format!("Payload could not be form-encoded: {}", e),
                    )
                })?;
                Ok(Some(Bytes::from(encoded)))
            }
            Payload::Json(value) => Ok(Some(Bytes::from(serde_json::to_vec(value)?))),
            Payload::Raw(bytes) => Ok(Some(bytes.clone())),
        }
    }

    fn apply_json_defaults(&mut self) {
        if !self.method.sends_json() {
            return;
        }
        if self.header("content-type").is_none() {
            self.headers
                .insert("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string());
        }
        if self.header("accept").is_none() {
            self.headers
                .insert("Accept".to_string(), JSON_CONTENT_TYPE.to_string());
        }
    }
}

/// Strip parameters from a media type: `application/json; charset=utf-8` -> `application/json`
pub(crate) fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub(crate) fn is_json_media_type(media_type: &str) -> bool {
    let essence = essence(media_type);
    essence == JSON_CONTENT_TYPE || essence == "json"
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert_eq!("Trace".parse::<Method>().unwrap(), Method::Trace);

        let err = "HEAD".parse::<Method>().unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "http_method"));
        assert!("FETCH".parse::<Method>().is_err());
    }

    #[test]
    fn test_json_defaults_for_write_verbs() {
        for method in [Method::Post, Method::Put, Method::Patch] {
            let request = Request::new(method, "/items");
            assert_eq!(request.header("content-type"), Some(JSON_CONTENT_TYPE));
            assert_eq!(request.header("accept"), Some(JSON_CONTENT_TYPE));
            assert!(request.is_json());
        }

        let request = Request::new(Method::Get, "/items");
        assert!(request.headers.is_empty());
        assert!(!request.is_json());
    }

    #[test]
    fn test_explicit_content_type_overrides_default() {
        let request = Request::new(Method::Post, "/upload")
            .with_header("content-type", "text/csv");
        assert_eq!(request.header("Content-Type"), Some("text/csv"));
        assert_eq!(request.headers.len(), 2);
        assert!(!request.is_json());
    }

    #[test]
    fn test_placeholders_and_rendering() {
        let request = Request::new(Method::Get, "/courses/<course_id>/users/<user_id>")
            .with_segment_param("course_id", 7)
            .with_segment_param("user_id", "u-1");

        assert_eq!(request.placeholders(), vec!["course_id", "user_id"]);
        assert!(request.validate().is_ok());
        assert_eq!(request.render_uri(), "/courses/7/users/u-1");
    }

    #[test]
    fn test_missing_segment_param() {
        let request = Request::new(Method::Get, "/users/<user_id>");
        let err = request.validate().unwrap_err();
        match err {
            Error::Validation { field, message } => {
                assert_eq!(field, "segment_params");
                assert!(message.contains("user_id"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_payload_shape_validation() {
        let request = Request::new(Method::Post, "/items").with_payload(json!(["a", "b"]));
        assert!(matches!(request.validate(), Err(Error::Validation { .. })));

        let request = Request::new(Method::Post, "/items").with_raw_payload("abc");
        assert!(matches!(request.validate(), Err(Error::Validation { .. })));

        let request = Request::new(Method::Post, "/items")
            .with_header("Content-Type", "text/plain")
            .with_raw_payload("abc");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_payload_encoding() {
        let request = Request::new(Method::Put, "/items").with_payload(json!({"id": "value"}));
        let body = request.encode_payload().unwrap().unwrap();
        assert_eq!(&body[..], br#"{"id":"value"}"#);

        let request = Request::new(Method::Get, "/items");
        assert_eq!(request.encode_payload().unwrap(), None);

        let request = Request::new(Method::Post, "/form")
            .with_header("Content-Type", FORM_CONTENT_TYPE)
            .with_payload(json!({"a": "b c", "n": 1}));
        let body = request.encode_payload().unwrap().unwrap();
        let decoded: HashMap<String, String> = serde_urlencoded::from_bytes(&body).unwrap();
        assert_eq!(decoded.get("a").map(String::as_str), Some("b c"));
        assert_eq!(decoded.get("n").map(String::as_str), Some("1"));

        let request = Request::new(Method::Post, "/raw")
            .with_header("Content-Type", "application/octet-stream")
            .with_raw_payload(vec![0u8, 1, 2]);
        assert_eq!(request.encode_payload().unwrap().unwrap().as_ref(), &[0u8, 1, 2]);
    }

    #[test]
    fn test_media_type_essence() {
        assert!(is_json_media_type("application/json; charset=utf-8"));
        assert!(is_json_media_type("Application/JSON"));
        assert!(!is_json_media_type("text/html"));
    }
}
