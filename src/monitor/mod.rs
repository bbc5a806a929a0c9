pub mod health_checker;


use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use reqwest::Url;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{Route, Service};
pub use health_checker::{HealthChecker, HttpHealthChecker};

/// Backend service registry with periodic health probing.
///
/// Services are keyed by hostname, created from route targets and never pruned.
pub struct HealthMonitor {
    checker: Arc<dyn HealthChecker>,
    services: RwLock<Vec<Service>>,
}

impl HealthMonitor {
    pub fn new(checker: Arc<dyn HealthChecker>) -> Self {
        Self {
            checker,
            services: RwLock::new(Vec::new()),
        }
    }

    /// Register the hosts of every route target
    pub async fn register_routes(&self, routes: &[Route]) {
        for route in routes {
            self.ensure_service(&route.target).await;
        }
    }

    /// Register the host of `target` unless it is already known
    pub async fn ensure_service(&self, target: &str) {
        let Some(name) = Url::parse(target)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
        else {
            warn!(route_target = target, "Route target has no host, not monitored");
            return;
        };

        let mut services = self.services.write().await;
        if services.iter().any(|s| s.name == name) {
            return;
        }

        debug!(service = %name, url = target, "Registering service");
        services.push(Service::new(name, target));
    }

    /// Current registry contents
    pub async fn services(&self) -> Vec<Service> {
        self.services.read().await.clone()
    }

    /// Probe every service concurrently and store the outcomes
    pub async fn check_all(&self) -> Vec<Service> {
        let snapshot = self.services().await;

        let probes = snapshot.iter().map(|service| async move {
            let status = self.checker.check_health(service).await;
            (service.name.clone(), status, Utc::now())
        });
        let results = join_all(probes).await;

        let mut services = self.services.write().await;
        for (name, status, checked_at) in results {
            if let Some(service) = services.iter_mut().find(|s| s.name == name) {
                if service.status != status {
                    info!(service = %name, from = %service.status, to = %status, "Service status changed");
                }
                service.status = status;
                service.last_checked = Some(checked_at);
            }
        }

        services.clone()
    }

    /// Probe on every tick of `interval` until `token` is cancelled
    pub async fn run(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        let mut timer = tokio::time::interval(interval);
        // The first tick completes immediately
        timer.tick().await;

        info!(interval_secs = interval.as_secs(), "Health monitor started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Health monitor stopped");
                    break;
                }
                _ = timer.tick() => {
                    let services = self.check_all().await;
                    debug!(count = services.len(), "Health check round finished");
                }
            }
        }
    }
}
