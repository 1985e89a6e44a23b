//! Route table: dispatches requests to installed handlers by method and path.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::Method;
use trellis_core::http::{HttpMethod, HttpRequest, ResponseHandle};

/// Handler installed for one `(method, path)` pair.
pub type RouteHandler = Arc<dyn Fn(HttpRequest, ResponseHandle) -> BoxFuture<'static, ()> + Send + Sync>;

// ---------------------------------------------------------------------------
// PathPattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `:name`
    Param(String),
    /// `*`, matches the rest of the path.
    Wildcard,
}

/// A parsed route pattern such as `/users/:id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let segments = split(pattern)
            .map(|segment| {
                if segment == "*" {
                    Segment::Wildcard
                } else if let Some(name) = segment.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();
        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches the whole `path`, returning the captured parameters.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        self.match_segments(path, false)
    }

    /// Matches `path` or any path below it.
    #[must_use]
    pub fn matches_prefix(&self, path: &str) -> bool {
        self.match_segments(path, true).is_some()
    }

    fn match_segments(&self, path: &str, prefix: bool) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = split(path).collect();
        let mut params = BTreeMap::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => return Some(params),
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), (*value).to_string());
                }
            }
        }
        (prefix || parts.len() == self.segments.len()).then_some(params)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

struct RouteEntry {
    method: HttpMethod,
    pattern: PathPattern,
    handler: RouteHandler,
}

/// Ordered route table. Lookup returns the first installed route that
/// matches, so earlier registrations shadow later overlapping ones.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler`. Returns `false` and keeps the existing entry when
    /// the same method and pattern are already installed.
    pub fn insert(&mut self, method: HttpMethod, path: &str, handler: RouteHandler) -> bool {
        let pattern = PathPattern::parse(path);
        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern.segments == pattern.segments)
        {
            return false;
        }
        self.routes.push(RouteEntry {
            method,
            pattern,
            handler,
        });
        true
    }

    /// Finds the handler for a request and the captured path parameters.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> Option<(RouteHandler, BTreeMap<String, String>)> {
        self.routes.iter().find_map(|route| {
            if !route.method.matches(method) {
                return None;
            }
            route
                .pattern
                .matches(path)
                .map(|params| (Arc::clone(&route.handler), params))
        })
    }

    /// Installed `(method, pattern)` pairs in installation order.
    #[must_use]
    pub fn routes(&self) -> Vec<(HttpMethod, String)> {
        self.routes
            .iter()
            .map(|r| (r.method, r.pattern.as_str().to_string()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
