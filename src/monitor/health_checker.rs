use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::models::{Service, ServiceStatus};

/// Probe deciding the health status of one backend service
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Probe the service and classify the outcome
    async fn check_health(&self, service: &Service) -> ServiceStatus;
}

/// HTTP health checker probing `<scheme>://<host[:port]><path>`
pub struct HttpHealthChecker {
    client: Client,
    path: String,
}

impl HttpHealthChecker {
    /// Create a new HTTP health checker
    pub fn new(config: &HealthConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to create health check client ({}), using default", e);
                Client::new()
            });

        Self {
            client,
            path: config.path.clone(),
        }
    }

    /// Probe URL for a service, derived from the origin of its URL
    pub fn probe_url(&self, service_url: &str) -> Option<Url> {
        let base = Url::parse(service_url).ok()?;
        let host = base.host_str()?;

        let origin = match base.port() {
            Some(port) => format!("{}://{}:{}", base.scheme(), host, port),
            None => format!("{}://{}", base.scheme(), host),
        };
        Url::parse(&origin).ok()?.join(&self.path).ok()
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check_health(&self, service: &Service) -> ServiceStatus {
        let Some(url) = self.probe_url(&service.url) else {
            warn!(service = %service.name, url = %service.url, "Cannot derive health check URL");
            return ServiceStatus::Error;
        };

        debug!(service = %service.name, url = %url, "Performing health check");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(service = %service.name, error = %e, "Health check request failed");
                return ServiceStatus::Error;
            }
        };

        let status = response.status();
        if let Err(e) = response.bytes().await {
            warn!(service = %service.name, error = %e, "Health check body unreadable");
            return ServiceStatus::Warning;
        }

        if status.is_success() {
            debug!(service = %service.name, status = status.as_u16(), "Service healthy");
            ServiceStatus::Healthy
        } else {
            warn!(service = %service.name, status = status.as_u16(), "Health check returned non-2xx");
            ServiceStatus::Warning
        }
    }
}
