pub mod analytics;
pub mod history;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::{RouteStat, Stats, TrafficDataPoint};
use analytics::{
    AnalyticsSnapshot, Distributions, ErrorTypeCount, Granularity, LatencyCount, PathCount,
    TrafficBuffers,
};

/// Requests completed since the last minute sample
#[derive(Debug, Default)]
struct Window {
    requests: u64,
    errors: u64,
    latency_ms_sum: f64,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: u64,
    total_errors: u64,
    routes: HashMap<String, RouteStat>,
    window: Window,
    distributions: Distributions,
}

/// Aggregates request statistics and rolls them up into traffic series.
///
/// Lock order is always counters before traffic.
pub struct StatsAggregator {
    started: Instant,
    in_flight: AtomicUsize,
    counters: RwLock<Counters>,
    traffic: RwLock<TrafficBuffers>,
}

/// Marks one request in flight until dropped
pub struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            in_flight: AtomicUsize::new(0),
            counters: RwLock::new(Counters::default()),
            traffic: RwLock::new(TrafficBuffers::default()),
        }
    }

    /// Count a request as in flight for the lifetime of the guard
    pub fn begin_request(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            counter: &self.in_flight,
        }
    }

    pub fn active_connections(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Record one completed forward on the route with path `path`
    pub async fn record(&self, path: &str, latency: Duration, is_error: bool) {
        let latency_secs = latency.as_secs_f64();
        let latency_ms = latency_secs * 1000.0;

        let mut counters = self.counters.write().await;
        counters.total_requests += 1;
        if is_error {
            counters.total_errors += 1;
        }

        let stat = counters.routes.entry(path.to_string()).or_default();
        stat.requests += 1;
        stat.avg_latency += (latency_secs - stat.avg_latency) / stat.requests as f64;
        if is_error {
            stat.errors += 1;
        }
        stat.error_rate = stat.errors as f64 / stat.requests as f64;

        counters.window.requests += 1;
        counters.window.latency_ms_sum += latency_ms;
        if is_error {
            counters.window.errors += 1;
        }

        counters.distributions.record_request(path, latency_ms);
    }

    /// Count a failure in the error-type distribution
    pub async fn record_error_type(&self, label: &str) {
        self.counters
            .write()
            .await
            .distributions
            .record_error(label);
    }

    pub async fn snapshot(&self) -> Stats {
        let counters = self.counters.read().await;
        let elapsed = self.started.elapsed();

        let requests_per_second = if elapsed.as_secs_f64() > 0.0 {
            counters.total_requests as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let (weighted, counted) = counters
            .routes
            .values()
            .fold((0.0, 0u64), |(weighted, counted), stat| {
                (
                    weighted + stat.avg_latency * stat.requests as f64,
                    counted + stat.requests,
                )
            });
        let avg_response_time = if counted > 0 {
            weighted / counted as f64
        } else {
            0.0
        };

        let error_rate = if counters.total_requests > 0 {
            counters.total_errors as f64 / counters.total_requests as f64
        } else {
            0.0
        };

        Stats {
            total_requests: counters.total_requests,
            requests_per_second,
            avg_response_time,
            error_rate,
            active_connections: self.active_connections(),
            uptime: elapsed.as_secs(),
            route_stats: counters.routes.clone(),
        }
    }

    /// Close the current window into a minute point.
    ///
    /// A window without traffic still yields a point with zero values.
    pub async fn sample_minute(&self) -> TrafficDataPoint {
        let window = {
            let mut counters = self.counters.write().await;
            std::mem::take(&mut counters.window)
        };

        let latency = if window.requests > 0 {
            window.latency_ms_sum / window.requests as f64
        } else {
            0.0
        };
        let point = TrafficDataPoint {
            timestamp: Utc::now().to_rfc3339(),
            requests: window.requests as f64,
            errors: window.errors as f64,
            latency,
        };

        self.traffic.write().await.minute.push(point.clone());
        tracing::debug!(
            requests = point.requests,
            errors = point.errors,
            latency_ms = point.latency,
            "Minute traffic sample"
        );
        point
    }

    /// Average the minute buffer into the hour buffer
    pub async fn rollup_hour(&self) -> Option<TrafficDataPoint> {
        let mut traffic = self.traffic.write().await;
        traffic.rollup_hour(Utc::now().to_rfc3339())
    }

    /// Average the hour buffer into the day buffer
    pub async fn rollup_day(&self) -> Option<TrafficDataPoint> {
        let mut traffic = self.traffic.write().await;
        traffic.rollup_day(Utc::now().to_rfc3339())
    }

    pub async fn traffic_series(&self, granularity: Granularity) -> Vec<TrafficDataPoint> {
        self.traffic.read().await.series(granularity)
    }

    pub async fn path_distribution(&self) -> Vec<PathCount> {
        self.counters.read().await.distributions.path_items()
    }

    pub async fn error_types(&self) -> Vec<ErrorTypeCount> {
        self.counters.read().await.distributions.error_items()
    }

    pub async fn latency_distribution(&self) -> Vec<LatencyCount> {
        self.counters.read().await.distributions.latency_items()
    }

    /// Traffic buffers and distributions as one document
    pub async fn export(&self) -> AnalyticsSnapshot {
        let counters = self.counters.read().await;
        let traffic = self.traffic.read().await;

        AnalyticsSnapshot {
            minute_data: traffic.minute.to_vec(),
            hour_data: traffic.hour.to_vec(),
            day_data: traffic.day.to_vec(),
            path_distribution: counters.distributions.paths.clone(),
            error_types: counters.distributions.error_types.clone(),
            latency_distribution: counters.distributions.latency.clone(),
        }
    }

    /// Replace traffic buffers and distributions with `snapshot`.
    ///
    /// Buffers keep their capacity; oversized series keep their newest points.
    pub async fn import(&self, snapshot: AnalyticsSnapshot) {
        let mut counters = self.counters.write().await;
        let mut traffic = self.traffic.write().await;

        traffic.minute.replace(snapshot.minute_data);
        traffic.hour.replace(snapshot.hour_data);
        traffic.day.replace(snapshot.day_data);

        counters.distributions = Distributions {
            paths: snapshot.path_distribution,
            error_types: snapshot.error_types,
            latency: snapshot.latency_distribution,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test]
    async fn test_incremental_mean_matches_arithmetic_mean() {
        let stats = StatsAggregator::new();
        let latencies = [10, 20, 60, 130, 5];
        for latency in latencies {
            stats.record("/api/users", ms(latency), false).await;
        }

        let snapshot = stats.snapshot().await;
        let route = &snapshot.route_stats["/api/users"];
        let expected = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64 / 1000.0;

        assert_eq!(route.requests, 5);
        assert!((route.avg_latency - expected).abs() < 1e-9);
        assert!((snapshot.avg_response_time - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_error_rates_and_weighted_average() {
        let stats = StatsAggregator::new();
        stats.record("/a", ms(100), true).await;
        stats.record("/a", ms(100), false).await;
        stats.record("/b", ms(400), false).await;
        stats.record("/b", ms(400), false).await;

        let snapshot = stats.snapshot().await;
        assert_eq!(snapshot.total_requests, 4);
        assert!((snapshot.error_rate - 0.25).abs() < 1e-9);
        assert!((snapshot.route_stats["/a"].error_rate - 0.5).abs() < 1e-9);
        assert_eq!(snapshot.route_stats["/b"].errors, 0);
        assert!((snapshot.avg_response_time - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_in_flight_guard_releases_on_drop() {
        let stats = StatsAggregator::new();
        {
            let _first = stats.begin_request();
            let _second = stats.begin_request();
            assert_eq!(stats.snapshot().await.active_connections, 2);
        }
        assert_eq!(stats.snapshot().await.active_connections, 0);
    }

    #[tokio::test]
    async fn test_minute_sample_drains_window() {
        let stats = StatsAggregator::new();
        stats.record("/a", ms(20), false).await;
        stats.record("/a", ms(40), true).await;

        let point = stats.sample_minute().await;
        assert_eq!(point.requests, 2.0);
        assert_eq!(point.errors, 1.0);
        assert!((point.latency - 30.0).abs() < 1e-9);

        let idle = stats.sample_minute().await;
        assert_eq!(idle.requests, 0.0);
        assert_eq!(stats.traffic_series(Granularity::Minute).await.len(), 2);
    }

    #[tokio::test]
    async fn test_sixty_minutes_roll_up_to_their_average() {
        let stats = StatsAggregator::new();
        let mut expected = 0.0;
        for minute in 0..60u64 {
            let requests = minute % 5 + 1;
            expected += requests as f64;
            for _ in 0..requests {
                stats.record("/a", ms(10), false).await;
            }
            stats.sample_minute().await;
        }
        expected /= 60.0;

        let hour = stats.rollup_hour().await.unwrap();
        assert!((hour.requests - expected).abs() < 1e-9);
        assert!((hour.latency - 10.0).abs() < 1e-9);

        let series = stats.traffic_series(Granularity::Hour).await;
        assert_eq!(series.len(), 1);

        let day = stats.rollup_day().await.unwrap();
        assert!((day.requests - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_minute_buffer_is_bounded() {
        let stats = StatsAggregator::new();
        for _ in 0..75 {
            stats.sample_minute().await;
        }
        assert_eq!(
            stats.traffic_series(Granularity::Minute).await.len(),
            analytics::MINUTE_POINTS
        );
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let source = StatsAggregator::new();
        source.record("/api/users", ms(30), false).await;
        source.record("/api/orders", ms(700), true).await;
        source.record_error_type("Timeout").await;
        source.sample_minute().await;
        source.rollup_hour().await;

        let exported = source.export().await;
        let json = serde_json::to_string(&exported).unwrap();
        let parsed: AnalyticsSnapshot = serde_json::from_str(&json).unwrap();

        let target = StatsAggregator::new();
        target.import(parsed).await;

        assert_eq!(target.export().await, exported);
        assert_eq!(target.error_types().await[0].count, 1);
    }
}
