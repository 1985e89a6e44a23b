//! HTTP host adapter: the kernel's route table and module middleware served
//! through a single axum fallback handler.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http::Method;
use serde_json::Value;
use tracing::debug;
use trellis_core::error::KernelError;
use trellis_core::http::{HttpMethod, HttpRequest, ResponseBody, ResponseHandle, ResponseState};
use trellis_core::middleware::{MiddlewareBinding, RouteInfo};

use crate::routing::filter::ErrorFilter;
use crate::service::router::{PathPattern, RouteHandler, RouteTable};

/// What the kernel needs from an HTTP server: route installation and
/// middleware registration.
pub trait HttpHost: Send {
    /// Installs `handler`. Returns `false` when the route already exists.
    fn route(&mut self, method: HttpMethod, path: &str, handler: RouteHandler) -> bool;

    /// Registers a middleware chain for the binding's routes.
    fn use_middleware(&mut self, binding: MiddlewareBinding);
}

// ---------------------------------------------------------------------------
// Installed middleware
// ---------------------------------------------------------------------------

struct PatternFilter {
    method: Option<HttpMethod>,
    pattern: PathPattern,
}

impl PatternFilter {
    fn new(route: &RouteInfo) -> Self {
        Self {
            method: route.method,
            pattern: PathPattern::parse(&route.path),
        }
    }

    fn method_matches(&self, method: &Method) -> bool {
        self.method.is_none_or(|m| m.matches(method))
    }
}

struct InstalledMiddleware {
    binding: MiddlewareBinding,
    routes: Vec<PatternFilter>,
    exclude: Vec<PatternFilter>,
}

impl InstalledMiddleware {
    fn new(binding: MiddlewareBinding) -> Self {
        Self {
            routes: binding.routes.iter().map(PatternFilter::new).collect(),
            exclude: binding.exclude.iter().map(PatternFilter::new).collect(),
            binding,
        }
    }

    /// Route patterns match the path and everything below it; excludes
    /// match exactly.
    fn applies(&self, method: &Method, path: &str) -> bool {
        let included = self
            .routes
            .iter()
            .any(|r| r.method_matches(method) && r.pattern.matches_prefix(path));
        let excluded = self
            .exclude
            .iter()
            .any(|r| r.method_matches(method) && r.pattern.matches(path).is_some());
        included && !excluded
    }
}

// ---------------------------------------------------------------------------
// AxumHost
// ---------------------------------------------------------------------------

struct HostInner {
    table: RouteTable,
    middleware: Vec<InstalledMiddleware>,
    filter: ErrorFilter,
    body_limit: usize,
}

/// [`HttpHost`] backed by axum.
pub struct AxumHost {
    inner: HostInner,
}

impl AxumHost {
    #[must_use]
    pub fn new(filter: ErrorFilter, body_limit: usize) -> Self {
        Self {
            inner: HostInner {
                table: RouteTable::new(),
                middleware: Vec::new(),
                filter,
                body_limit,
            },
        }
    }

    /// Installed `(method, path)` pairs in installation order.
    #[must_use]
    pub fn routes(&self) -> Vec<(HttpMethod, String)> {
        self.inner.table.routes()
    }

    /// Freezes the host into an axum router.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(Arc::new(self.inner))
    }
}

impl HttpHost for AxumHost {
    fn route(&mut self, method: HttpMethod, path: &str, handler: RouteHandler) -> bool {
        self.inner.table.insert(method, path, handler)
    }

    fn use_middleware(&mut self, binding: MiddlewareBinding) {
        debug!(
            routes = ?binding.routes.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
            count = binding.middleware.len(),
            "middleware bound"
        );
        self.inner.middleware.push(InstalledMiddleware::new(binding));
    }
}

async fn dispatch(State(host): State<Arc<HostInner>>, request: Request) -> Response {
    let res = ResponseHandle::new();
    let path = request.uri().path().to_string();

    let mut req = match read_request(request, host.body_limit).await {
        Ok(req) => req,
        Err(err) => {
            host.filter.catch(&err, &path, &res);
            return render(res.snapshot());
        }
    };

    for installed in &host.middleware {
        if !installed.applies(&req.method, &req.path) {
            continue;
        }
        for middleware in &installed.binding.middleware {
            if let Err(err) = middleware.handle(&mut req, &res).await {
                host.filter.catch(&err, &path, &res);
                return render(res.snapshot());
            }
            if res.headers_sent() {
                return render(res.snapshot());
            }
        }
    }

    match host.table.lookup(&req.method, &req.path) {
        Some((handler, params)) => {
            req.params = params;
            handler(req, res.clone()).await;
        }
        None => host.filter.not_found(&req.method, &path, &res),
    }
    render(res.snapshot())
}

/// Converts an axum request into the kernel's request type.
async fn read_request(request: Request, limit: usize) -> Result<HttpRequest, KernelError> {
    let (parts, body) = request.into_parts();

    let mut req = HttpRequest::new(parts.method.clone(), parts.uri.path());
    if let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri) {
        req.extend_query(pairs);
    }
    req.headers = parts.headers;

    let bytes = to_bytes(body, limit).await.map_err(|_| {
        KernelError::http(StatusCode::PAYLOAD_TOO_LARGE, "Request body is too large")
    })?;
    let content_type = req.header(CONTENT_TYPE.as_str()).map(str::to_owned);
    req.body = parse_body(&bytes, content_type.as_deref())?;
    Ok(req)
}

fn parse_body(bytes: &[u8], content_type: Option<&str>) -> Result<Value, KernelError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    let is_json = content_type.is_some_and(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.starts_with("application/json") || ct.contains("+json")
    });
    if is_json {
        return serde_json::from_slice(bytes)
            .map_err(|err| KernelError::bad_request(format!("Malformed JSON body: {err}")));
    }
    Ok(serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())))
}

fn render(state: ResponseState) -> Response {
    let mut response = match state.body {
        Some(ResponseBody::Json(value)) => Json(value).into_response(),
        Some(ResponseBody::Text(text)) => text.into_response(),
        None => Body::empty().into_response(),
    };
    *response.status_mut() = state.status;
    response.headers_mut().extend(state.headers);
    response
}
