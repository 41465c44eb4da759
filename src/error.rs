//! Error types for the control plane

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::OnceLock;

/// Result type alias
pub type Result<T> = std::result::Result<T, ApiError>;

static PROBLEM_BASE: OnceLock<String> = OnceLock::new();

/// Set the base URI used in Problem Details `type` fields. Called once at
/// platform startup; later calls are ignored.
pub fn set_problem_base(base: impl Into<String>) {
    let _ = PROBLEM_BASE.set(base.into());
}

fn problem_base() -> &'static str {
    PROBLEM_BASE
        .get()
        .map(|s| s.as_str())
        .unwrap_or("https://api.localhost/errors")
}

/// Control-plane error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Signature / replay
    #[error("integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("signature header missing")]
    MissingSignature,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("webhook timestamp outside the allowed window")]
    WebhookExpired,

    #[error("webhook timestamp is in the future")]
    WebhookTimestampFuture,

    // Validation
    #[error("payload validation failed")]
    ValidationFailed(Vec<String>),

    #[error("{0}")]
    InvalidRequest(String),

    // Not-found / conflict
    #[error("{0} not found: {1}")]
    NotFound(String, String),

    #[error("{0} already exists")]
    DuplicateName(String),

    #[error("runbook has a running execution")]
    RunbookActiveExecution(String),

    // Permission
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // Rate limit
    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },

    // Internal
    #[error("database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Problem Details slug, appended to the error type base URI
    pub fn slug(&self) -> &'static str {
        match self {
            Self::IntegrationNotFound(_) => "integration-not-found",
            Self::MissingSignature => "missing-signature",
            Self::InvalidSignature => "invalid-signature",
            Self::WebhookExpired => "webhook-expired",
            Self::WebhookTimestampFuture => "webhook-timestamp-future",
            Self::ValidationFailed(_) => "validation-failed",
            Self::InvalidRequest(_) => "invalid-request",
            Self::NotFound(..) => "resource-not-found",
            Self::DuplicateName(_) => "duplicate-name",
            Self::RunbookActiveExecution(_) => "runbook-active-execution",
            Self::PermissionDenied(_) => "permission-denied",
            Self::RateLimited { .. } => "rate-limited",
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                "processing-failed"
            }
        }
    }

    /// Short human-readable title
    pub fn title(&self) -> &'static str {
        match self {
            Self::IntegrationNotFound(_) => "Integration not found",
            Self::MissingSignature => "Missing signature",
            Self::InvalidSignature => "Invalid signature",
            Self::WebhookExpired => "Webhook expired",
            Self::WebhookTimestampFuture => "Webhook timestamp in the future",
            Self::ValidationFailed(_) => "Validation failed",
            Self::InvalidRequest(_) => "Invalid request",
            Self::NotFound(..) => "Resource not found",
            Self::DuplicateName(_) => "Duplicate name",
            Self::RunbookActiveExecution(_) => "Runbook has an active execution",
            Self::PermissionDenied(_) => "Permission denied",
            Self::RateLimited { .. } => "Rate limited",
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                "Processing failed"
            }
        }
    }

    /// HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::IntegrationNotFound(_) | Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::MissingSignature
            | Self::InvalidSignature
            | Self::WebhookExpired
            | Self::WebhookTimestampFuture => StatusCode::UNAUTHORIZED,
            Self::ValidationFailed(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateName(_) | Self::RunbookActiveExecution(_) => StatusCode::CONFLICT,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "type": format!("{}/{}", problem_base(), self.slug()),
            "title": self.title(),
            "status": status.as_u16(),
            "detail": self.to_string(),
        });

        match &self {
            Self::ValidationFailed(errors) => {
                body["validation_errors"] = json!(errors);
            }
            Self::RateLimited { retry_after } => {
                body["retry_after"] = json!(retry_after);
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        if let Self::RateLimited { retry_after } = &self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_follow_error_taxonomy() {
        assert_eq!(ApiError::MissingSignature.slug(), "missing-signature");
        assert_eq!(ApiError::WebhookExpired.slug(), "webhook-expired");
        assert_eq!(
            ApiError::RateLimited { retry_after: 30 }.slug(),
            "rate-limited"
        );
        assert_eq!(
            ApiError::Database("locked".into()).slug(),
            "processing-failed"
        );
    }

    #[test]
    fn status_codes_match_kinds() {
        assert_eq!(
            ApiError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::ValidationFailed(vec![]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::DuplicateName("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited { retry_after: 1 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
