// Traffic Gateway Library

pub mod config;
pub mod core;
pub mod error;
pub mod middleware;
pub mod models;
pub mod monitor;
pub mod stats;

// Re-export commonly used types
pub use config::{ConfigManager, FileConfigManager, GatewayConfig};
pub use core::{
    gateway::{ApiGateway, Gateway, GatewayState},
    request::GatewayRequest,
    response::GatewayResponse,
    router::{RouteTable, Router},
};
pub use error::{ConfigError, GatewayError, PersistenceError};
pub use middleware::{Middleware, MiddlewareHandler};
pub use models::{Credential, Route, Service, ServiceStatus, Stats, TrafficDataPoint};
