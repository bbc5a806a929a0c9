use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use hyper::header::AUTHORIZATION;
use tracing::{Instrument, Level};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::{ConfigError, GatewayError};
use crate::middleware::{Middleware, MiddlewareHandler};

/// Initialize the tracing system.
///
/// `RUST_LOG` wins over the configured level. Output goes to stdout unless a
/// log file is configured, in which case it is appended to that file.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), GatewayError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ConfigError::ValidationError(format!("cannot open log file {}: {}", path, e))
                })?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(config.log_file.is_none())
        .with_writer(writer);

    let fmt_layer = if config.json_format {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| GatewayError::InternalError(format!("tracing already initialized: {}", e)))?;

    tracing::info!(
        level = %config.level,
        json = config.json_format,
        "Tracing system initialized"
    );
    Ok(())
}

/// How much the logging middleware records per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Request line and outcome
    Basic,
    /// Also request headers, with credentials hidden
    Detailed,
}

/// Middleware wrapping each forwarded request in a span and logging its outcome
pub struct LoggingMiddleware {
    log_level: LogLevel,
}

impl LoggingMiddleware {
    pub fn new(log_level: LogLevel) -> Self {
        Self { log_level }
    }

    /// Request headers are logged only when the configured level is debug or finer
    pub fn for_config(config: &LoggingConfig) -> Self {
        match config.level.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Self::new(LogLevel::Detailed),
            _ => Self::new(LogLevel::Basic),
        }
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let route_id = request.route().map(|r| r.id);
        let span = tracing::span!(
            Level::INFO,
            "request",
            request_id = %request.request_id,
            method = %request.method,
            path = %request.path(),
            route_id = ?route_id,
            client_ip = ?request.client_ip,
        );

        span.in_scope(|| {
            tracing::info!(status = "received", "Request received: {} {}", request.method, request.uri);

            if self.log_level == LogLevel::Detailed {
                for (name, value) in request.headers.iter() {
                    if *name == AUTHORIZATION {
                        tracing::debug!(header_name = %name, "Authorization header present (value hidden)");
                    } else {
                        tracing::debug!(header_name = %name, header_value = ?value, "Request header");
                    }
                }
            }
        });

        let start = Instant::now();
        let result = next.handle(request).instrument(span.clone()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        span.in_scope(|| match &result {
            Ok(response) if response.status.is_client_error() || response.status.is_server_error() => {
                tracing::warn!(
                    status = "completed",
                    status_code = response.status.as_u16(),
                    backend = ?response.backend_name,
                    elapsed_ms,
                    "Upstream answered with an error status"
                );
            }
            Ok(response) => {
                tracing::info!(
                    status = "completed",
                    status_code = response.status.as_u16(),
                    backend = ?response.backend_name,
                    elapsed_ms,
                    "Request completed"
                );
            }
            Err(error) => {
                tracing::warn!(
                    status = "rejected",
                    status_code = error.status_code(),
                    error_message = %error,
                    elapsed_ms,
                    "Request failed"
                );
            }
        });

        result
    }

    fn name(&self) -> &str {
        "logging"
    }
}
