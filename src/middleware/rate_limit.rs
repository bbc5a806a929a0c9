use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::error::GatewayError;
use crate::middleware::{Middleware, MiddlewareHandler};

/// Token bucket for a single route path
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: u32) -> Self {
        let capacity = f64::from(limit);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

/// Per-path token-bucket rate limiter
pub struct RateLimiter {
    enabled: AtomicBool,
    default_limit: AtomicU32,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            default_limit: AtomicU32::new(config.default_limit),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a request on `path` may proceed.
    ///
    /// A `configured_limit` of 0 falls back to the default limit. The bucket
    /// for a path keeps the capacity it was created with until it is forgotten.
    pub async fn allow(&self, path: &str, configured_limit: u32) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return true;
        }

        let limit = if configured_limit > 0 {
            configured_limit
        } else {
            self.default_limit.load(Ordering::Relaxed)
        };

        let bucket = self.bucket(path, limit).await;
        let mut bucket = bucket.lock().await;
        bucket.try_take()
    }

    async fn bucket(&self, path: &str, limit: u32) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.read().await.get(path) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(path.to_string())
            .or_insert_with(|| {
                tracing::debug!(path, limit, "Creating rate limit bucket");
                Arc::new(Mutex::new(TokenBucket::new(limit)))
            })
            .clone()
    }

    /// Drop the bucket for `path` so the next request starts a fresh one
    pub async fn forget(&self, path: &str) {
        self.buckets.write().await.remove(path);
    }

    /// Apply new settings; existing buckets keep their capacity
    pub fn reconfigure(&self, config: &RateLimitConfig) {
        self.enabled.store(config.enabled, Ordering::Relaxed);
        self.default_limit
            .store(config.default_limit, Ordering::Relaxed);
    }

    #[cfg(test)]
    async fn tokens(&self, path: &str) -> Option<f64> {
        let bucket = self.buckets.read().await.get(path).cloned()?;
        let tokens = bucket.lock().await.tokens;
        Some(tokens)
    }
}

/// Middleware rejecting requests once the matched route's bucket is empty
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn process_request(
        &self,
        request: GatewayRequest,
        next: Arc<dyn MiddlewareHandler>,
    ) -> Result<GatewayResponse, GatewayError> {
        let route = request.route().ok_or_else(|| {
            GatewayError::InternalError("rate limiting requires a matched route".to_string())
        })?;

        if !self.limiter.allow(&route.path, route.rate_limit).await {
            tracing::warn!(path = %route.path, limit = route.rate_limit, "Rate limit exceeded");
            return Err(GatewayError::RateLimitExceeded);
        }

        next.handle(request).await
    }

    fn name(&self) -> &str {
        "rate_limit"
    }
}
