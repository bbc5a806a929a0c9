use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hyper::header::{HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::HeaderMap;
use reqwest::{redirect, Client, Url};

use crate::config::ProxyConfig;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::{ConfigError, GatewayError};
use crate::middleware::MiddlewareHandler;
use crate::models::Route;
use crate::stats::StatsAggregator;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers scoped to a single connection, never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Reverse proxy forwarding matched requests to their route target
pub struct ProxyEngine {
    client: Client,
    default_timeout_secs: AtomicU64,
    stats: Arc<StatsAggregator>,
}

impl ProxyEngine {
    pub fn new(config: &ProxyConfig, stats: Arc<StatsAggregator>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::InternalError(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_timeout_secs: AtomicU64::new(config.default_timeout),
            stats,
        })
    }

    /// Change the timeout used by routes without their own
    pub fn set_default_timeout(&self, seconds: u64) {
        self.default_timeout_secs.store(seconds, Ordering::Relaxed);
    }

    /// Upper bound on the wait for upstream response headers
    pub fn effective_timeout(&self, route: &Route) -> Duration {
        let seconds = if route.timeout > 0 {
            route.timeout
        } else {
            self.default_timeout_secs.load(Ordering::Relaxed)
        };
        Duration::from_secs(seconds)
    }

    /// Forward `request` to the target of `route`.
    ///
    /// Exactly one stats record is written per call, flagged as an error
    /// when the upstream could not be reached or configured.
    pub async fn forward(
        &self,
        request: GatewayRequest,
        route: &Route,
    ) -> Result<GatewayResponse, GatewayError> {
        let _in_flight = self.stats.begin_request();
        let start = Instant::now();

        let result = self.dispatch(request, route).await;

        let elapsed = start.elapsed();
        self.stats.record(&route.path, elapsed, result.is_err()).await;

        result.map(|response| response.with_processing_time(elapsed.as_millis() as u64))
    }

    async fn dispatch(
        &self,
        request: GatewayRequest,
        route: &Route,
    ) -> Result<GatewayResponse, GatewayError> {
        let target = parse_target(&route.target)?;
        let backend = target.host_str().unwrap_or_default().to_string();
        let url = upstream_url(&target, request.uri.path(), request.uri.query())?;

        let mut headers = strip_hop_by_hop(&request.headers);
        headers.remove(HOST);
        if let Some(ip) = request.client_ip {
            append_forwarded_for(&mut headers, &ip.to_string());
        }

        let upstream = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(headers)
            .body(request.body)
            .build()
            .map_err(|e| GatewayError::UpstreamUnavailable(format!("cannot build request: {}", e)))?;

        let timeout = self.effective_timeout(route);
        tracing::debug!(upstream = %url, timeout_secs = timeout.as_secs(), "Forwarding request");

        let response = match tokio::time::timeout(timeout, self.client.execute(upstream)).await {
            Err(_) => {
                tracing::warn!(upstream = %url, "Upstream did not answer in time");
                return Err(GatewayError::UpstreamTimeout);
            }
            Ok(Err(e)) if e.is_timeout() => return Err(GatewayError::UpstreamTimeout),
            Ok(Err(e)) => {
                tracing::warn!(upstream = %url, error = %e, "Upstream unreachable");
                return Err(GatewayError::UpstreamUnavailable(e.to_string()));
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(format!("reading upstream body: {}", e)))?;

        Ok(GatewayResponse::new(status, headers, body).with_backend_name(backend))
    }
}

#[async_trait]
impl MiddlewareHandler for ProxyEngine {
    async fn handle(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let route = request
            .route()
            .cloned()
            .ok_or_else(|| GatewayError::InternalError("no route attached to request".to_string()))?;
        self.forward(request, &route).await
    }
}

fn parse_target(target: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(target).map_err(|e| ConfigError::InvalidTarget {
        target: target.to_string(),
        reason: e.to_string(),
    })?;

    if url.host_str().is_none() || !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidTarget {
            target: target.to_string(),
            reason: "expected an absolute http(s) URL".to_string(),
        }
        .into());
    }
    Ok(url)
}

/// Join the target base path with the request path, keeping both queries
fn upstream_url(target: &Url, path: &str, query: Option<&str>) -> Result<Url, GatewayError> {
    let base = target.path();
    let joined = match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    };

    let query = match (target.query(), query) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some(format!("{}&{}", a, b)),
        (Some(a), _) if !a.is_empty() => Some(a.to_string()),
        (_, Some(b)) if !b.is_empty() => Some(b.to_string()),
        _ => None,
    };

    let mut url = target.clone();
    url.set_path(&joined);
    url.set_query(query.as_deref());
    Ok(url)
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();

    // Names listed in Connection are hop-by-hop too
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        out.remove(name);
    }

    for name in HOP_BY_HOP {
        out.remove(name);
    }
    out
}

fn append_forwarded_for(headers: &mut HeaderMap, client_ip: &str) {
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, client_ip),
        _ => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
