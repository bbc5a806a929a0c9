pub mod credentials;

use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::AUTHORIZATION;

use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;
use crate::middleware::{Middleware, MiddlewareHandler};

pub use credentials::{CredentialStore, IssuedCredential, NewCredential};

/// Authentication middleware enforcing credentials on routes that require them
pub struct AuthMiddleware {
    store: Arc<CredentialStore>,
}

impl AuthMiddleware {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let route = request.route().ok_or_else(|| {
            GatewayError::InternalError("authentication requires a matched route".to_string())
        })?;

        if route.auth_required {
            let Some(header) = request.header(AUTHORIZATION.as_str()) else {
                tracing::debug!(route_id = route.id, "Missing credentials");
                return Err(GatewayError::AuthenticationRequired);
            };

            if !self.store.authenticate(Some(&header), route.id).await {
                tracing::warn!(route_id = route.id, "Invalid credentials");
                return Err(GatewayError::AuthenticationFailed);
            }
        }

        next.handle(request).await
    }

    fn name(&self) -> &str {
        "auth"
    }
}
