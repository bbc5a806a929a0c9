use std::net::IpAddr;
use std::time::SystemTime;

use bytes::Bytes;
use hyper::{HeaderMap, Method, Uri};

use crate::models::Route;

/// Represents a request entering the forwarding path
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// HTTP method
    pub method: Method,

    /// Request URI as received (path and query)
    pub uri: Uri,

    /// HTTP headers
    pub headers: HeaderMap,

    /// Request body
    pub body: Bytes,

    /// Peer address of the client
    pub client_ip: Option<IpAddr>,

    /// Request timestamp
    pub timestamp: SystemTime,

    /// Request ID for tracing
    pub request_id: String,

    /// Route matched for this request
    route: Option<Route>,
}

impl GatewayRequest {
    /// Create a new GatewayRequest
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            client_ip,
            timestamp: SystemTime::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            route: None,
        }
    }

    /// Attach the matched route
    pub fn with_route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    /// Request path without the query
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use hyper::header::HeaderValue;

    use super::*;

    #[test]
    fn test_gateway_request_new() {
        let client_ip = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        let request = GatewayRequest::new(
            Method::GET,
            Uri::from_static("/api/users/42?page=2"),
            HeaderMap::new(),
            Bytes::from("test body"),
            client_ip,
        );

        assert_eq!(request.path(), "/api/users/42");
        assert_eq!(request.client_ip, client_ip);
        assert!(uuid::Uuid::parse_str(&request.request_id).is_ok());
        assert!(request.route().is_none());
    }

    #[test]
    fn test_gateway_request_header() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let request = GatewayRequest::new(
            Method::POST,
            Uri::from_static("/api/orders"),
            headers,
            Bytes::from("{}"),
            None,
        );

        assert_eq!(
            request.header("content-type"),
            Some("application/json".to_string())
        );
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn test_route_attachment_survives_clone() {
        let route = Route::new("/api/orders", "http://order-svc:8082", &["GET"]);
        let request = GatewayRequest::new(
            Method::GET,
            Uri::from_static("/api/orders"),
            HeaderMap::new(),
            Bytes::new(),
            None,
        )
        .with_route(route.clone());

        let cloned = request.clone();
        assert_eq!(cloned.route(), Some(&route));
        assert_eq!(cloned.request_id, request.request_id);
    }
}
