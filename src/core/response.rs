use axum::body::Full;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};

/// Represents a response produced by the forwarding path
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,

    /// Backend host that served the request
    pub backend_name: Option<String>,

    /// Time taken to process the request in milliseconds
    pub processing_time_ms: u64,
}

impl GatewayResponse {
    /// Create a new GatewayResponse
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            backend_name: None,
            processing_time_ms: 0,
        }
    }

    /// Set backend name for this response
    pub fn with_backend_name(mut self, backend_name: impl Into<String>) -> Self {
        self.backend_name = Some(backend_name.into());
        self
    }

    /// Set processing time for this response
    pub fn with_processing_time(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Full::new(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response
    }
}

#[cfg(test)]
mod tests {
    use hyper::header::{HeaderValue, CONTENT_TYPE};

    use super::*;

    #[test]
    fn test_builders() {
        let response = GatewayResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from("ok"))
            .with_backend_name("order-svc")
            .with_processing_time(12);

        assert_eq!(response.backend_name.as_deref(), Some("order-svc"));
        assert_eq!(response.processing_time_ms, 12);
    }

    #[test]
    fn test_into_response_keeps_status_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let response =
            GatewayResponse::new(StatusCode::CREATED, headers, Bytes::from("made")).into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain"))
        );
    }
}
