//! Request-time error taxonomy shared by guards, binders and handlers.

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

/// One field that failed payload validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub constraints: Vec<String>,
}

impl FieldViolation {
    #[must_use]
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraints: vec![constraint.into()],
        }
    }
}

/// Errors raised while serving a request.
///
/// Every layer forwards these unchanged; only the global error filter decides
/// the client-visible shape.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// An HTTP exception with an explicit status. `body`, when present,
    /// replaces the default error envelope.
    #[error("{message}")]
    Http {
        status: StatusCode,
        message: String,
        body: Option<Value>,
    },
    #[error("validation failed")]
    Validation { violations: Vec<FieldViolation> },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    /// A circuit breaker is refusing calls to the named handler.
    #[error("{handler} is temporarily unavailable")]
    CircuitOpen { handler: String },
    /// An offload queue has no free slot.
    #[error("job queue for {handler} is full")]
    QueueFull { handler: String },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl KernelError {
    #[must_use]
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: None,
        }
    }

    /// HTTP exception carrying its own response body.
    #[must_use]
    pub fn with_body(status: StatusCode, body: Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Error"))
            .to_string();
        Self::Http {
            status,
            message,
            body: Some(body),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::http(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::http(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    #[must_use]
    pub fn validation(violations: Vec<FieldViolation>) -> Self {
        Self::Validation { violations }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => *status,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::CircuitOpen { .. } | Self::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is an authentication or authorization failure.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
            || matches!(
                self.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(KernelError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(KernelError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(KernelError::validation(vec![]).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            KernelError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(KernelError::not_found("gone").status(), StatusCode::NOT_FOUND);
        let open = KernelError::CircuitOpen {
            handler: "Billing.charge".into(),
        };
        assert_eq!(open.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(open.to_string(), "Billing.charge is temporarily unavailable");
    }

    #[test]
    fn with_body_takes_message_from_body() {
        let err = KernelError::with_body(
            StatusCode::CONFLICT,
            json!({"message": "email taken", "code": "E_DUP"}),
        );
        assert_eq!(err.to_string(), "email taken");

        let bare = KernelError::with_body(StatusCode::CONFLICT, json!({"code": 1}));
        assert_eq!(bare.to_string(), "Conflict");
    }

    #[test]
    fn http_403_counts_as_auth_error() {
        assert!(KernelError::http(StatusCode::FORBIDDEN, "no").is_auth());
        assert!(!KernelError::bad_request("no").is_auth());
    }
}
