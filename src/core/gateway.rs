use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigManager, FileConfigManager, GatewayConfig, SettingsUpdate};
use crate::core::handlers;
use crate::core::proxy::ProxyEngine;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::core::router::{RouteTable, Router};
use crate::error::{ConfigError, GatewayError};
use crate::middleware::auth::CredentialStore;
use crate::middleware::rate_limit::RateLimiter;
use crate::middleware::{
    AuthMiddleware, LoggingMiddleware, MiddlewareChain, MiddlewareHandler, RateLimitMiddleware,
};
use crate::models::Route;
use crate::monitor::{HealthChecker, HealthMonitor, HttpHealthChecker};
use crate::stats::StatsAggregator;

/// Core API Gateway trait that defines the main functionality
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Route, police and forward one request
    async fn process_request(
        &self,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError>;

    /// Start the server and background tasks
    async fn start(&self) -> Result<(), GatewayError>;

    /// Stop the server and background tasks
    async fn stop(&self) -> Result<(), GatewayError>;
}

/// Shared state behind the HTTP handlers
pub struct GatewayState {
    pub config: Arc<FileConfigManager>,
    pub routes: Arc<RouteTable>,
    pub limiter: Arc<RateLimiter>,
    pub credentials: Arc<CredentialStore>,
    pub credentials_file: Option<PathBuf>,
    pub monitor: Arc<HealthMonitor>,
    pub stats: Arc<StatsAggregator>,
    pub proxy: Arc<ProxyEngine>,
    /// Request body limit fixed when the router is built
    pub body_limit: usize,
    pipeline: Arc<dyn MiddlewareHandler>,
}

impl GatewayState {
    /// Match the request and run it through the middleware pipeline
    pub async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let route = self
            .routes
            .find_match(request.path(), request.method.as_str())
            .await
            .ok_or_else(|| {
                GatewayError::NotFound(format!(
                    "no route for {} {}",
                    request.method,
                    request.path()
                ))
            })?;

        let result = self.pipeline.handle(request.with_route(route)).await;
        if let Err(error) = &result {
            if let Some(label) = error.analytics_label() {
                self.stats.record_error_type(label).await;
            }
        }
        result
    }

    /// Write the route table into the configuration document
    pub async fn persist_routes(&self) -> Result<(), GatewayError> {
        self.config.persist_routes(&self.routes).await
    }

    /// Write the credential store, if a credentials file is configured
    pub async fn persist_credentials(&self) -> Result<(), GatewayError> {
        match &self.credentials_file {
            Some(path) => self.credentials.save_to_file(path).await,
            None => Ok(()),
        }
    }

    /// Side effects of a route being created or changed
    pub async fn route_changed(&self, previous: Option<&Route>, current: &Route) {
        if let Some(previous) = previous {
            self.limiter.forget(&previous.path).await;
        }
        self.limiter.forget(&current.path).await;
        self.monitor.ensure_service(&current.target).await;
    }

    /// Apply and persist new rate-limit and timeout settings
    pub async fn apply_settings(&self, update: SettingsUpdate) -> Result<GatewayConfig, GatewayError> {
        let settings = self.config.update_settings(update).await?;
        self.limiter.reconfigure(&settings.rate_limit);
        self.proxy.set_default_timeout(settings.proxy.default_timeout);
        tracing::info!(
            rate_limit_enabled = settings.rate_limit.enabled,
            default_limit = settings.rate_limit.default_limit,
            default_timeout = settings.proxy.default_timeout,
            "Settings updated"
        );
        Ok(settings)
    }
}

/// Server state that can be mutated
#[derive(Default)]
struct ServerState {
    shutdown: Option<CancellationToken>,
    server_handle: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// The traffic gateway: route table, policies, proxy and background monitors
pub struct ApiGateway {
    state: Arc<GatewayState>,
    server_state: Mutex<ServerState>,
}

impl ApiGateway {
    /// Build the gateway from an already loaded configuration
    pub async fn with_config_manager(manager: FileConfigManager) -> Result<Self, GatewayError> {
        let config = manager.get_config().await;
        let checker: Arc<dyn HealthChecker> = Arc::new(HttpHealthChecker::new(&config.health));
        Self::with_health_checker(manager, checker).await
    }

    /// Build the gateway with a custom health probe
    pub async fn with_health_checker(
        manager: FileConfigManager,
        checker: Arc<dyn HealthChecker>,
    ) -> Result<Self, GatewayError> {
        let config = manager.get_config().await;

        let routes = Arc::new(RouteTable::from_routes(
            config.routes.clone(),
            config.next_route_id,
        )?);

        let credentials_file = config.credentials_file.as_ref().map(PathBuf::from);
        let credentials = match &credentials_file {
            Some(path) => CredentialStore::load_from_file(path).await?,
            None => CredentialStore::new(),
        };
        let credentials = Arc::new(credentials);

        let monitor = Arc::new(HealthMonitor::new(checker));
        monitor.register_routes(&config.routes).await;

        let stats = Arc::new(StatsAggregator::new());
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let proxy = Arc::new(ProxyEngine::new(&config.proxy, stats.clone())?);

        let chain = MiddlewareChain::new()
            .add(LoggingMiddleware::for_config(&config.logging))
            .add(RateLimitMiddleware::new(limiter.clone()))
            .add(AuthMiddleware::new(credentials.clone()));
        tracing::debug!(middlewares = ?chain.names(), "Middleware chain built");
        let pipeline = chain.build(proxy.clone());

        tracing::info!(
            routes = config.routes.len(),
            services = monitor.services().await.len(),
            "Gateway initialized"
        );

        Ok(Self {
            state: Arc::new(GatewayState {
                config: Arc::new(manager),
                routes,
                limiter,
                credentials,
                credentials_file,
                monitor,
                stats,
                proxy,
                body_limit: config.proxy.max_body_bytes,
                pipeline,
            }),
            server_state: Mutex::new(ServerState::default()),
        })
    }

    /// Shared state, as seen by the handlers
    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Management API plus the proxy fallback
    pub fn router(&self) -> axum::Router {
        handlers::router(self.state.clone())
    }

    /// Address the server is bound to while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server_state.lock().await.local_addr
    }

    /// Path of the configuration document
    pub fn config_path(&self) -> &Path {
        self.state.config.path()
    }

    fn spawn_background(&self, config: &GatewayConfig, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        let health_interval = Duration::from_secs(config.health.interval.max(1));
        let analytics = &config.analytics;

        let monitor = self.state.monitor.clone();
        let mut handles = vec![tokio::spawn(monitor.run(health_interval, token.child_token()))];

        let stats = self.state.stats.clone();
        handles.push(tokio::spawn(run_periodic(
            "minute sample",
            Duration::from_secs(analytics.sample_interval.max(1)),
            token.child_token(),
            move || {
                let stats = stats.clone();
                async move {
                    stats.sample_minute().await;
                }
            },
        )));

        let stats = self.state.stats.clone();
        handles.push(tokio::spawn(run_periodic(
            "hour rollup",
            Duration::from_secs(analytics.hour_interval.max(1)),
            token.child_token(),
            move || {
                let stats = stats.clone();
                async move {
                    stats.rollup_hour().await;
                }
            },
        )));

        let stats = self.state.stats.clone();
        handles.push(tokio::spawn(run_periodic(
            "day rollup",
            Duration::from_secs(analytics.day_interval.max(1)),
            token.child_token(),
            move || {
                let stats = stats.clone();
                async move {
                    stats.rollup_day().await;
                }
            },
        )));

        handles
    }
}

/// Run `task` on every tick of `period` until `token` is cancelled
async fn run_periodic<F, Fut>(name: &'static str, period: Duration, token: CancellationToken, mut task: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut timer = tokio::time::interval(period);
    timer.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(task = name, "Periodic task stopped");
                break;
            }
            _ = timer.tick() => task().await,
        }
    }
}

#[async_trait]
impl Gateway for ApiGateway {
    async fn process_request(
        &self,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        self.state.dispatch(request).await
    }

    async fn start(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;
        if server_state.server_handle.is_some() {
            return Err(GatewayError::InternalError(
                "Server is already running".to_string(),
            ));
        }

        let config = self.state.config.get_config().await;
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "invalid listen address {}:{}: {}",
                    config.server.host, config.server.port, e
                ))
            })?;

        let listener = std::net::TcpListener::bind(addr)
            .map_err(|e| GatewayError::InternalError(format!("cannot bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| GatewayError::InternalError(format!("cannot read bound address: {}", e)))?;
        let server = axum::Server::from_tcp(listener)
            .map_err(|e| GatewayError::InternalError(format!("cannot serve on {}: {}", addr, e)))?;

        let token = CancellationToken::new();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let server_token = token.clone();

        tracing::info!("Starting traffic gateway on {}", local_addr);
        let server_handle = tokio::spawn(async move {
            let graceful = server.serve(app).with_graceful_shutdown(async move {
                server_token.cancelled().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            });

            if let Err(e) = graceful.await {
                tracing::error!("Server error: {}", e);
            }
            tracing::info!("Server on {} has been shut down", local_addr);
        });

        server_state.background = self.spawn_background(&config, &token);
        server_state.server_handle = Some(server_handle);
        server_state.shutdown = Some(token);
        server_state.local_addr = Some(local_addr);

        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;

        let Some(token) = server_state.shutdown.take() else {
            return Err(GatewayError::InternalError(
                "Server is not running".to_string(),
            ));
        };
        token.cancel();

        for handle in server_state.background.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }

        server_state.local_addr = None;
        match server_state.server_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                GatewayError::InternalError(format!("Error while shutting down server: {}", e))
            }),
            None => Ok(()),
        }
    }
}
