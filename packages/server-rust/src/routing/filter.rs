//! Global error filter: the only place that decides the client-visible
//! shape of a failed request.

use chrono::{SecondsFormat, Utc};
use http::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{error, warn};
use trellis_core::error::KernelError;
use trellis_core::http::ResponseHandle;

const REDACTED: &str = "Internal server error";

/// Renders errors as JSON responses and logs them by severity.
#[derive(Debug, Clone, Default)]
pub struct ErrorFilter {
    production: bool,
}

impl ErrorFilter {
    /// In production mode 5xx messages are replaced by a generic string.
    #[must_use]
    pub fn new(production: bool) -> Self {
        Self { production }
    }

    /// Logs `err` and writes its response, unless the response was already
    /// sent.
    pub fn catch(&self, err: &KernelError, path: &str, res: &ResponseHandle) {
        let (status, body) = self.render(err, path);
        if status.is_server_error() {
            error!(status = status.as_u16(), path, error = %err, "request failed");
        } else {
            warn!(status = status.as_u16(), path, error = %err, "request rejected");
        }
        if res.headers_sent() {
            return;
        }
        res.status(status).json(body);
    }

    /// Status and body for `err` without side effects.
    #[must_use]
    pub fn render(&self, err: &KernelError, path: &str) -> (StatusCode, Value) {
        let status = err.status();
        if let KernelError::Http {
            body: Some(body), ..
        } = err
        {
            return (status, body.clone());
        }

        let message = if self.production && status.is_server_error() {
            REDACTED.to_string()
        } else {
            err.to_string()
        };
        let mut body = json!({
            "statusCode": status.as_u16(),
            "message": message,
            "error": status.canonical_reason().unwrap_or("Error"),
            "timestamp": timestamp(),
            "path": path,
        });
        if let KernelError::Validation { violations } = err {
            body["errors"] = json!(violations);
        }
        (status, body)
    }

    /// Writes the 404 envelope for an unmatched route.
    pub fn not_found(&self, method: &Method, path: &str, res: &ResponseHandle) {
        warn!(%method, path, "route not found");
        res.status(StatusCode::NOT_FOUND).json(json!({
            "success": false,
            "error": {
                "statusCode": 404,
                "reason": "Route not found",
                "errors": [format!("Cannot {method} {path}")],
            },
            "timestamp": timestamp(),
            "path": path,
        }));
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use trellis_core::error::FieldViolation;
    use trellis_core::http::ResponseBody;

    use super::*;

    fn written(res: &ResponseHandle) -> (StatusCode, Value) {
        let state = res.snapshot();
        match state.body {
            Some(ResponseBody::Json(body)) => (state.status, body),
            other => panic!("expected json body, got {other:?}"),
        }
    }

    #[test]
    fn default_envelope_fields() {
        let res = ResponseHandle::new();
        ErrorFilter::new(false).catch(&KernelError::not_found("user 7 not found"), "/users/7", &res);

        let (status, body) = written(&res);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["statusCode"], 404);
        assert_eq!(body["message"], "user 7 not found");
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["path"], "/users/7");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn exception_body_is_used_verbatim() {
        let err = KernelError::with_body(StatusCode::CONFLICT, json!({"code": "E_DUP"}));
        let (status, body) = ErrorFilter::default().render(&err, "/x");
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({"code": "E_DUP"}));
    }

    #[test]
    fn validation_lists_violations() {
        let err = KernelError::validation(vec![FieldViolation::new("email", "email")]);
        let (status, body) = ErrorFilter::default().render(&err, "/users");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"], json!([{"field": "email", "constraints": ["email"]}]));
    }

    #[test]
    fn production_redacts_server_errors_only() {
        let filter = ErrorFilter::new(true);
        let (_, body) = filter.render(&KernelError::from(anyhow::anyhow!("db password leaked")), "/");
        assert_eq!(body["message"], "Internal server error");

        let (_, body) = filter.render(&KernelError::bad_request("bad input"), "/");
        assert_eq!(body["message"], "bad input");

        let (_, body) = ErrorFilter::new(false).render(&KernelError::from(anyhow::anyhow!("boom")), "/");
        assert_eq!(body["message"], "internal error: boom");
    }

    #[test]
    fn sent_response_is_left_alone() {
        let res = ResponseHandle::new();
        res.json(json!({"ok": true}));
        ErrorFilter::default().catch(&KernelError::bad_request("late"), "/", &res);
        assert_eq!(written(&res), (StatusCode::OK, json!({"ok": true})));
    }

    #[test]
    fn not_found_envelope() {
        let res = ResponseHandle::new();
        ErrorFilter::default().not_found(&Method::GET, "/nope", &res);
        let (status, body) = written(&res);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["reason"], "Route not found");
        assert_eq!(body["error"]["errors"], json!(["Cannot GET /nope"]));
        assert_eq!(body["path"], "/nope");
    }
}
