//! Transport-neutral request and response primitives.
//!
//! The host HTTP layer converts its native request into an [`HttpRequest`]
//! and renders the final [`ResponseState`] back; the kernel only ever sees
//! these types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::types::Principal;

// ---------------------------------------------------------------------------
// HttpMethod
// ---------------------------------------------------------------------------

/// HTTP method attached to a route descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Head,
    /// Matches every method.
    All,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::All => "ALL",
        }
    }

    /// Whether a request with `method` is handled by this route method.
    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::All => true,
            other => other.as_str() == method.as_str(),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "OPTIONS" => Ok(Self::Options),
            "HEAD" => Ok(Self::Head),
            "ALL" => Ok(Self::All),
            other => Err(format!("unsupported http method: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpRequest
// ---------------------------------------------------------------------------

/// An incoming request as seen by guards, middleware and parameter binding.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Request path without query string.
    pub path: String,
    /// Named path parameters (`:id` -> value).
    pub params: BTreeMap<String, String>,
    /// Parsed query string. Repeated keys become arrays.
    pub query: Map<String, Value>,
    pub headers: HeaderMap,
    /// Parsed body, `Value::Null` when absent.
    pub body: Value,
    /// Principal bound by the authentication guard.
    pub user: Option<Principal>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: BTreeMap::new(),
            query: Map::new(),
            headers: HeaderMap::new(),
            body: Value::Null,
            user: None,
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    /// Adds a header; invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Adds query pairs, turning repeated keys into arrays.
    pub fn extend_query<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in pairs {
            let value = Value::String(value.into());
            match self.query.entry(key.into()) {
                serde_json::map::Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                serde_json::map::Entry::Occupied(mut slot) => match slot.get_mut() {
                    Value::Array(items) => items.push(value),
                    existing => {
                        let first = existing.take();
                        *existing = Value::Array(vec![first, value]);
                    }
                },
            }
        }
    }

    /// Header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Bearer credential from the `Authorization` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
            Some(token.trim())
        } else {
            None
        }
    }

    /// Headers as a JSON object with lowercase names.
    #[must_use]
    pub fn headers_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                map.insert(name.as_str().to_string(), Value::String(value.to_string()));
            }
        }
        Value::Object(map)
    }

    /// Path parameters as a JSON object.
    #[must_use]
    pub fn params_json(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Body written to a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

/// Accumulated response state.
#[derive(Debug, Clone)]
pub struct ResponseState {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<ResponseBody>,
    /// Set once a body has been written; later writes are ignored.
    pub sent: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            sent: false,
        }
    }
}

/// Shared, cloneable handle to the response of one request.
///
/// Handlers that bind the response parameter write through it directly;
/// the pipeline checks [`ResponseHandle::headers_sent`] before shaping.
#[derive(Clone, Default)]
pub struct ResponseHandle {
    inner: Arc<Mutex<ResponseState>>,
}

impl ResponseHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status code for the eventual write.
    pub fn status(&self, status: StatusCode) -> &Self {
        let mut state = self.inner.lock();
        if !state.sent {
            state.status = status;
        }
        self
    }

    /// Sets a header; invalid names or values are ignored.
    pub fn header(&self, name: &str, value: &str) -> &Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            let mut state = self.inner.lock();
            if !state.sent {
                state.headers.insert(name, value);
            }
        }
        self
    }

    /// Writes a JSON body and marks the response as sent.
    pub fn json(&self, body: Value) {
        self.write(ResponseBody::Json(body), "application/json");
    }

    /// Writes a text body and marks the response as sent.
    pub fn text(&self, body: impl Into<String>) {
        self.write(ResponseBody::Text(body.into()), "text/plain; charset=utf-8");
    }

    /// Marks the response as sent without a body.
    pub fn end(&self) {
        self.inner.lock().sent = true;
    }

    fn write(&self, body: ResponseBody, content_type: &'static str) {
        let mut state = self.inner.lock();
        if state.sent {
            return;
        }
        state
            .headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static(content_type));
        state.body = Some(body);
        state.sent = true;
    }

    #[must_use]
    pub fn headers_sent(&self) -> bool {
        self.inner.lock().sent
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ResponseState {
        self.inner.lock().clone()
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ResponseHandle")
            .field("status", &state.status)
            .field("sent", &state.sent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn repeated_query_keys_become_arrays() {
        let mut req = HttpRequest::new(Method::GET, "/items");
        req.extend_query([("tag", "a"), ("tag", "b"), ("tag", "c"), ("page", "2")]);
        assert_eq!(req.query["tag"], json!(["a", "b", "c"]));
        assert_eq!(req.query["page"], json!("2"));
    }

    #[test]
    fn bearer_token_is_extracted_case_insensitively() {
        let req = HttpRequest::new(Method::GET, "/").with_header("Authorization", "bearer abc.def");
        assert_eq!(req.bearer_token(), Some("abc.def"));

        let basic = HttpRequest::new(Method::GET, "/").with_header("Authorization", "Basic xyz");
        assert_eq!(basic.bearer_token(), None);
    }

    #[test]
    fn response_ignores_writes_after_send() {
        let res = ResponseHandle::new();
        res.status(StatusCode::CREATED).json(json!({"id": 1}));
        res.status(StatusCode::BAD_REQUEST).text("late");

        let state = res.snapshot();
        assert!(state.sent);
        assert_eq!(state.status, StatusCode::CREATED);
        assert_eq!(state.body, Some(ResponseBody::Json(json!({"id": 1}))));
        assert_eq!(state.headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn clones_share_state() {
        let res = ResponseHandle::new();
        let other = res.clone();
        other.end();
        assert!(res.headers_sent());
    }

    proptest::proptest! {
        #[test]
        fn repeated_key_keeps_every_value(values in proptest::collection::vec("[a-z]{1,6}", 2..8)) {
            let mut req = HttpRequest::new(Method::GET, "/");
            req.extend_query(values.iter().map(|v| ("k", v.as_str())));
            let stored = req.query["k"].as_array().cloned().unwrap_or_default();
            proptest::prop_assert_eq!(stored.len(), values.len());
        }
    }

    #[test]
    fn method_parsing_and_matching() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
        assert!(HttpMethod::All.matches(&Method::DELETE));
        assert!(HttpMethod::Get.matches(&Method::GET));
        assert!(!HttpMethod::Get.matches(&Method::POST));
    }
}
