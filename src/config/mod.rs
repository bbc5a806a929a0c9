use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::router::{RouteTable, Router};
use crate::error::{ConfigError, GatewayError, PersistenceError};
use crate::models::Route;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log level, overridden by RUST_LOG
    pub level: String,

    /// Append log output to this file instead of stdout
    pub log_file: Option<String>,

    /// Whether to log in JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            json_format: false,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Whether rate limiting is enforced at all
    pub enabled: bool,

    /// Requests per minute for routes without their own limit
    pub default_limit: u32,
}

impl RateLimitConfig {
    /// The default limit is the fallback for unlimited routes and must be positive
    pub fn validate(&self) -> Result<(), String> {
        if self.default_limit == 0 {
            return Err("rateLimit.defaultLimit must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: 100,
        }
    }
}

/// Forwarding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Upstream header timeout in seconds for routes without their own
    pub default_timeout: u64,

    /// Largest proxied request body accepted, in bytes. Read when the server starts.
    pub max_body_bytes: usize,
}

impl ProxyConfig {
    /// The default timeout is the fallback for routes without one and must be positive
    pub fn validate(&self) -> Result<(), String> {
        if self.default_timeout == 0 {
            return Err("proxy.defaultTimeout must be greater than 0".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("proxy.maxBodyBytes must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_timeout: 30,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Backend health probing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthConfig {
    /// Seconds between probe rounds
    pub interval: u64,

    /// Probe timeout in seconds
    pub timeout: u64,

    /// Probe path appended to the service origin
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: 60,
            timeout: 5,
            path: "/health".to_string(),
        }
    }
}

/// Traffic rollup schedule, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyticsConfig {
    pub sample_interval: u64,
    pub hour_interval: u64,
    pub day_interval: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            sample_interval: 60,
            hour_interval: 60 * 60,
            day_interval: 24 * 60 * 60,
        }
    }
}

/// Main gateway configuration, persisted as a single JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub proxy: ProxyConfig,
    pub health: HealthConfig,
    pub analytics: AnalyticsConfig,

    /// Where credentials persist, if anywhere
    pub credentials_file: Option<String>,

    /// Configured routes in registration order
    pub routes: Vec<Route>,

    /// Next route ID to hand out, so deleted IDs are never reused
    pub next_route_id: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            health: HealthConfig::default(),
            analytics: AnalyticsConfig::default(),
            credentials_file: None,
            routes: Vec::new(),
            next_route_id: 1,
        }
    }
}

impl GatewayConfig {
    /// Configuration with the stock route set, written when no file exists yet
    pub fn with_default_routes() -> Self {
        let routes = vec![
            Route {
                id: 1,
                ..Route::new(
                    "/api/users",
                    "http://user-service:8080",
                    &["GET", "POST", "PUT", "DELETE"],
                )
                .with_rate_limit(100)
                .with_timeout(30)
                .with_auth(true)
            },
            Route {
                id: 2,
                ..Route::new(
                    "/api/products",
                    "http://product-service:8080",
                    &["GET", "POST", "PUT", "DELETE"],
                )
                .with_rate_limit(50)
                .with_timeout(30)
                .with_auth(true)
            },
            Route {
                id: 3,
                ..Route::new("/api/auth", "http://auth-service:8080", &["POST"])
                    .with_rate_limit(20)
                    .with_timeout(10)
            },
            Route {
                id: 4,
                ..Route::new("/public", "http://static-service:8080", &["GET"])
                    .with_rate_limit(500)
                    .with_timeout(5)
            },
        ];

        Self {
            routes,
            next_route_id: 5,
            ..Self::default()
        }
    }

    /// Reject unusable fallbacks and repair `next_route_id` so it stays
    /// ahead of every stored route
    fn normalize(&mut self) -> Result<(), ConfigError> {
        self.rate_limit
            .validate()
            .and_then(|_| self.proxy.validate())
            .map_err(ConfigError::ValidationError)?;

        let floor = self.routes.iter().map(|r| r.id + 1).max().unwrap_or(1);
        self.next_route_id = self.next_route_id.max(floor);
        Ok(())
    }

    /// Settings view without the route set
    pub fn settings(&self) -> Self {
        Self {
            routes: Vec::new(),
            ..self.clone()
        }
    }
}

/// Partial settings update accepted by the config endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub rate_limit: Option<RateLimitConfig>,
    pub proxy: Option<ProxyConfig>,
}

/// Configuration manager trait
#[async_trait]
pub trait ConfigManager: Send + Sync {
    /// Get the current configuration
    async fn get_config(&self) -> GatewayConfig;

    /// Load configuration from file
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<(), GatewayError>;

    /// Save configuration to file
    async fn save_to_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<(), GatewayError>;
}

/// Configuration manager backed by a JSON file
pub struct FileConfigManager {
    path: PathBuf,
    config: Arc<RwLock<GatewayConfig>>,
}

impl FileConfigManager {
    /// Manager holding `config`, persisting to `path`
    pub fn new(path: impl Into<PathBuf>, config: GatewayConfig) -> Self {
        Self {
            path: path.into(),
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Load the document at `path`, creating it with the default routes if absent
    pub async fn load_or_init(path: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let path = path.into();

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let manager = Self::new(path.clone(), GatewayConfig::default());
            manager.load_from_file(&path).await?;
            tracing::info!(path = %path.display(), "Loaded gateway configuration");
            return Ok(manager);
        }

        tracing::info!(
            path = %path.display(),
            "Configuration file not found, writing default route set"
        );
        let manager = Self::new(path.clone(), GatewayConfig::with_default_routes());
        manager.save_to_file(&path).await?;
        Ok(manager)
    }

    /// Path of the persisted document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot the route table into the document and write it out.
    ///
    /// The document lock is held across the write, so concurrent mutations
    /// persist in order and the last write carries the latest route set.
    pub async fn persist_routes(&self, table: &RouteTable) -> Result<(), GatewayError> {
        let mut config = self.config.write().await;
        config.routes = table.list().await;
        config.next_route_id = table.next_id().await;
        write_atomically(&self.path, &*config).await
    }

    /// Apply a settings update and write the document
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<GatewayConfig, GatewayError> {
        if let Some(rate_limit) = &update.rate_limit {
            rate_limit.validate().map_err(GatewayError::Validation)?;
        }
        if let Some(proxy) = &update.proxy {
            proxy.validate().map_err(GatewayError::Validation)?;
        }

        let mut config = self.config.write().await;
        if let Some(rate_limit) = update.rate_limit {
            config.rate_limit = rate_limit;
        }
        if let Some(proxy) = update.proxy {
            config.proxy = proxy;
        }
        write_atomically(&self.path, &*config).await?;
        Ok(config.settings())
    }
}

#[async_trait]
impl ConfigManager for FileConfigManager {
    async fn get_config(&self) -> GatewayConfig {
        self.config.read().await.clone()
    }

    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<(), GatewayError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|e| {
            ConfigError::LoadError(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut loaded: GatewayConfig = serde_json::from_slice(&data).map_err(|e| {
            ConfigError::LoadError(format!("cannot parse {}: {}", path.display(), e))
        })?;
        loaded.normalize()?;

        *self.config.write().await = loaded;
        Ok(())
    }

    async fn save_to_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<(), GatewayError> {
        let config = self.config.read().await;
        write_atomically(path.as_ref(), &*config).await
    }
}

/// Serialize `value` next to `path` and rename it into place
pub(crate) async fn write_atomically<T: Serialize>(path: &Path, value: &T) -> Result<(), GatewayError> {
    let data = serde_json::to_vec_pretty(value).map_err(PersistenceError::from)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &data)
        .await
        .map_err(|source| PersistenceError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(())
}
