use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::error;

/// Domain error taxonomy. Every variant maps to a fixed HTTP status and a
/// `{error, message}` JSON body; internals are logged server-side and never
/// surfaced to clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{1}")]
    Validation(&'static str, String),
    #[error("{1}")]
    Conflict(&'static str, String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("{1}")]
    InvalidState(&'static str, String),
    #[error("{1}")]
    Unauthorized(&'static str, String),
    #[error("{1}")]
    Forbidden(&'static str, String),
    #[error("{1}")]
    NotFound(&'static str, String),
    #[error("request body exceeds maximum allowed size")]
    PayloadTooLarge,
    #[error("account temporarily locked")]
    AccountLocked { lock_until: OffsetDateTime },
    #[error("{message}")]
    RateLimited {
        error: &'static str,
        message: &'static str,
        retry_after: u64,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Wire format for failure responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_until: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            lock_until: None,
            retry_after: None,
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(..)
            | ApiError::Conflict(..)
            | ApiError::InvalidCredentials
            | ApiError::InvalidState(..) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::AccountLocked { .. } => StatusCode::LOCKED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Validation(label, msg)
            | ApiError::Conflict(label, msg)
            | ApiError::InvalidState(label, msg)
            | ApiError::Unauthorized(label, msg)
            | ApiError::Forbidden(label, msg)
            | ApiError::NotFound(label, msg) => ErrorBody::new(label, msg.clone()),
            ApiError::InvalidCredentials => {
                ErrorBody::new("Invalid credentials", "Invalid email or password")
            }
            ApiError::PayloadTooLarge => ErrorBody::new(
                "Request too large",
                "Request body exceeds maximum allowed size",
            ),
            ApiError::AccountLocked { lock_until } => {
                let mut body = ErrorBody::new(
                    "Account locked",
                    "Account is temporarily locked due to too many failed attempts",
                );
                body.lock_until = lock_until.format(&Rfc3339).ok();
                body
            }
            ApiError::RateLimited {
                error,
                message,
                retry_after,
            } => {
                let mut body = ErrorBody::new(error, *message);
                body.retry_after = Some(*retry_after);
                body
            }
            ApiError::Internal(_) => ErrorBody::new("Internal server error", "Something went wrong"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(err) = &self {
            error!(error = %err, "internal error");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

/// Shorthand for wrapping unexpected failures into the 500 catch-all.
pub(crate) fn internal<E: Into<anyhow::Error>>(e: E) -> ApiError {
    ApiError::Internal(e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn error_body_is_error_plus_message() {
        let err = ApiError::Conflict(
            "User already exists",
            "A user with this email already exists".into(),
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let json = serde_json::to_string(&err.body()).unwrap();
        assert!(json.contains(r#""error":"User already exists""#));
        assert!(json.contains(r#""message":"A user with this email already exists""#));
        assert!(!json.contains("lockUntil"));
    }

    #[test]
    fn locked_body_carries_lock_until() {
        let err = ApiError::AccountLocked {
            lock_until: OffsetDateTime::now_utc() + Duration::minutes(15),
        };
        assert_eq!(err.status(), StatusCode::LOCKED);
        let json = serde_json::to_string(&err.body()).unwrap();
        assert!(json.contains("lockUntil"));
    }

    #[test]
    fn rate_limited_body_carries_retry_after() {
        let err = ApiError::RateLimited {
            error: "Rate limit exceeded",
            message: "Too many requests. Please slow down.",
            retry_after: 900,
        };
        let json = serde_json::to_string(&err.body()).unwrap();
        assert!(json.contains(r#""retryAfter":900"#));
    }

    #[test]
    fn internal_body_is_generic() {
        let err = internal(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"));
        let json = serde_json::to_string(&err.body()).unwrap();
        assert!(!json.contains("disk on fire"));
        assert!(json.contains("Something went wrong"));
    }
}
