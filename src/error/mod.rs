use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Gateway timeout")]
    UpstreamTimeout,

    #[error("Service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// HTTP status code mapping for gateway errors
impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::NotFound(_) => 404,
            GatewayError::Conflict(_) => 409,
            GatewayError::RateLimitExceeded => 429,
            GatewayError::AuthenticationRequired => 401,
            GatewayError::AuthenticationFailed => 401,
            GatewayError::UpstreamTimeout => 504,
            GatewayError::UpstreamUnavailable(_) => 503,
            GatewayError::Configuration(_) => 500,
            GatewayError::Persistence(_) => 500,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::PayloadTooLarge(_) => 413,
            GatewayError::InternalError(_) => 500,
        }
    }

    /// Label used by the traffic analytics error-type distribution.
    pub fn analytics_label(&self) -> Option<&'static str> {
        match self {
            GatewayError::RateLimitExceeded => Some("Rate Limit Exceeded"),
            GatewayError::AuthenticationRequired | GatewayError::AuthenticationFailed => {
                Some("Authentication Failed")
            }
            GatewayError::UpstreamTimeout => Some("Timeout"),
            GatewayError::UpstreamUnavailable(_) => Some("Service Unavailable"),
            GatewayError::Configuration(_) => Some("Configuration Error"),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Configuration specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid target URL '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },
}

/// Errors writing or reading persisted documents
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(GatewayError::Validation("path".into()).status_code(), 400);
        assert_eq!(GatewayError::NotFound("route 7".into()).status_code(), 404);
        assert_eq!(GatewayError::RateLimitExceeded.status_code(), 429);
        assert_eq!(GatewayError::AuthenticationRequired.status_code(), 401);
        assert_eq!(GatewayError::AuthenticationFailed.status_code(), 401);
        assert_eq!(GatewayError::UpstreamTimeout.status_code(), 504);
        assert_eq!(GatewayError::PayloadTooLarge(1024).status_code(), 413);
        assert_eq!(
            GatewayError::UpstreamUnavailable("refused".into()).status_code(),
            503
        );
        let invalid = ConfigError::InvalidTarget {
            target: "::".into(),
            reason: "relative URL without a base".into(),
        };
        assert_eq!(GatewayError::from(invalid).status_code(), 500);
    }

    #[test]
    fn test_analytics_labels() {
        assert_eq!(
            GatewayError::RateLimitExceeded.analytics_label(),
            Some("Rate Limit Exceeded")
        );
        assert_eq!(GatewayError::UpstreamTimeout.analytics_label(), Some("Timeout"));
        assert_eq!(GatewayError::NotFound("x".into()).analytics_label(), None);
    }
}
