// Models for the traffic gateway

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Method entry that matches every HTTP verb
pub const ANY_METHOD: &str = "*";

/// Route definition mapping an inbound path prefix to a backend target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Route ID, assigned by the route table
    #[serde(default)]
    pub id: u64,

    /// Path prefix, always starting with `/`
    pub path: String,

    /// Absolute URL of the backend
    pub target: String,

    /// Allowed HTTP methods (`*` means any)
    pub methods: Vec<String>,

    /// Requests per rolling minute (0 means the gateway default)
    #[serde(default)]
    pub rate_limit: u32,

    /// Upstream header timeout in seconds (0 means the gateway default)
    #[serde(default)]
    pub timeout: u64,

    /// Whether requests must carry a bound credential
    #[serde(default)]
    pub auth_required: bool,

    /// Inactive routes never match
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Route {
    /// Create an active route allowing the given methods
    pub fn new(path: impl Into<String>, target: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            id: 0,
            path: path.into(),
            target: target.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            rate_limit: 0,
            timeout: 0,
            auth_required: false,
            active: true,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_auth(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether the request path falls under this route's path
    pub fn matches_path(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }

        request_path
            .strip_prefix(self.path.as_str())
            .map_or(false, |rest| rest.starts_with('/'))
    }

    /// Whether the method is allowed on this route
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == ANY_METHOD || m == method)
    }
}

/// Health status of a backend service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Unknown,
    Healthy,
    Warning,
    Error,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Warning => "warning",
            ServiceStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Backend service derived from route targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Backend hostname
    pub name: String,

    /// First route target seen for this host
    pub url: String,

    /// Last probe outcome
    pub status: ServiceStatus,

    /// When the last probe finished
    pub last_checked: Option<DateTime<Utc>>,
}

impl Service {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            status: ServiceStatus::Unknown,
            last_checked: None,
        }
    }
}

/// Per-route request counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStat {
    /// Completed requests
    pub requests: u64,

    /// Completed requests that failed
    pub errors: u64,

    /// Running mean latency in seconds
    pub avg_latency: f64,

    /// errors / requests
    pub error_rate: f64,
}

/// Gateway statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_requests: u64,
    pub requests_per_second: f64,
    /// Request-weighted mean of route latencies, in seconds
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub active_connections: usize,
    /// Seconds since the aggregator started
    pub uptime: u64,
    pub route_stats: HashMap<String, RouteStat>,
}

/// One point of a traffic time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficDataPoint {
    /// RFC 3339 timestamp
    pub timestamp: String,

    pub requests: f64,

    pub errors: f64,

    /// Mean latency in milliseconds
    pub latency: f64,
}

/// API credential bound to a single route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: u64,

    pub route_id: u64,

    pub name: String,

    pub api_key: String,

    /// Hex SHA-256 of the secret; empty once redacted
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_hash: String,

    pub enabled: bool,

    pub created: DateTime<Utc>,

    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl Credential {
    /// Copy of this credential with the secret hash removed
    pub fn redacted(&self) -> Self {
        Self {
            secret_hash: String::new(),
            ..self.clone()
        }
    }
}
