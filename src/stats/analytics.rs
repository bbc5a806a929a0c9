use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::models::TrafficDataPoint;
use crate::stats::history::BoundedHistory;

/// Minute samples kept (one hour)
pub const MINUTE_POINTS: usize = 60;
/// Hour points kept (one day)
pub const HOUR_POINTS: usize = 24;
/// Day points kept (one week)
pub const DAY_POINTS: usize = 7;

/// Error categories tracked by the error-type distribution
pub const ERROR_TYPES: [&str; 5] = [
    "Rate Limit Exceeded",
    "Authentication Failed",
    "Timeout",
    "Service Unavailable",
    "Configuration Error",
];

/// Latency ranges, in display order
pub const LATENCY_BUCKETS: [&str; 6] = [
    "0-50ms",
    "51-100ms",
    "101-200ms",
    "201-500ms",
    "501-1000ms",
    ">1000ms",
];

/// Range label for a latency in milliseconds
pub fn latency_bucket(latency_ms: f64) -> &'static str {
    match latency_ms {
        ms if ms <= 50.0 => LATENCY_BUCKETS[0],
        ms if ms <= 100.0 => LATENCY_BUCKETS[1],
        ms if ms <= 200.0 => LATENCY_BUCKETS[2],
        ms if ms <= 500.0 => LATENCY_BUCKETS[3],
        ms if ms <= 1000.0 => LATENCY_BUCKETS[4],
        _ => LATENCY_BUCKETS[5],
    }
}

/// Resolution of a traffic time series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl FromStr for Granularity {
    type Err = GatewayError;

    /// Accepts `minute|hour|day` and the dashboard ranges `hourly|daily|weekly`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" | "hourly" => Ok(Granularity::Minute),
            "hour" | "daily" => Ok(Granularity::Hour),
            "day" | "weekly" => Ok(Granularity::Day),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown traffic range '{}'",
                other
            ))),
        }
    }
}

/// Point whose fields are the means of `points`; `None` if there are none
pub fn average<'a>(
    points: impl IntoIterator<Item = &'a TrafficDataPoint>,
    timestamp: String,
) -> Option<TrafficDataPoint> {
    let mut count = 0usize;
    let mut sum = TrafficDataPoint {
        timestamp,
        requests: 0.0,
        errors: 0.0,
        latency: 0.0,
    };

    for point in points {
        count += 1;
        sum.requests += point.requests;
        sum.errors += point.errors;
        sum.latency += point.latency;
    }

    if count == 0 {
        return None;
    }

    let n = count as f64;
    sum.requests /= n;
    sum.errors /= n;
    sum.latency /= n;
    Some(sum)
}

/// Minute, hour and day traffic buffers
#[derive(Debug, Clone)]
pub struct TrafficBuffers {
    pub minute: BoundedHistory<TrafficDataPoint>,
    pub hour: BoundedHistory<TrafficDataPoint>,
    pub day: BoundedHistory<TrafficDataPoint>,
}

impl Default for TrafficBuffers {
    fn default() -> Self {
        Self {
            minute: BoundedHistory::new(MINUTE_POINTS),
            hour: BoundedHistory::new(HOUR_POINTS),
            day: BoundedHistory::new(DAY_POINTS),
        }
    }
}

impl TrafficBuffers {
    pub fn series(&self, granularity: Granularity) -> Vec<TrafficDataPoint> {
        match granularity {
            Granularity::Minute => self.minute.to_vec(),
            Granularity::Hour => self.hour.to_vec(),
            Granularity::Day => self.day.to_vec(),
        }
    }

    /// Average the minute buffer into a new hour point
    pub fn rollup_hour(&mut self, timestamp: String) -> Option<TrafficDataPoint> {
        let point = average(self.minute.iter(), timestamp)?;
        self.hour.push(point.clone());
        Some(point)
    }

    /// Average the hour buffer into a new day point
    pub fn rollup_day(&mut self, timestamp: String) -> Option<TrafficDataPoint> {
        let point = average(self.hour.iter(), timestamp)?;
        self.day.push(point.clone());
        Some(point)
    }
}

/// Request counts by path, error category and latency range
#[derive(Debug, Clone, PartialEq)]
pub struct Distributions {
    pub paths: BTreeMap<String, u64>,
    pub error_types: BTreeMap<String, u64>,
    pub latency: BTreeMap<String, u64>,
}

impl Default for Distributions {
    fn default() -> Self {
        Self {
            paths: BTreeMap::new(),
            error_types: ERROR_TYPES.iter().map(|t| (t.to_string(), 0)).collect(),
            latency: LATENCY_BUCKETS.iter().map(|b| (b.to_string(), 0)).collect(),
        }
    }
}

impl Distributions {
    pub fn record_request(&mut self, path: &str, latency_ms: f64) {
        *self.paths.entry(path.to_string()).or_insert(0) += 1;
        *self
            .latency
            .entry(latency_bucket(latency_ms).to_string())
            .or_insert(0) += 1;
    }

    pub fn record_error(&mut self, label: &str) {
        *self.error_types.entry(label.to_string()).or_insert(0) += 1;
    }

    /// Paths by descending request count
    pub fn path_items(&self) -> Vec<PathCount> {
        let mut items: Vec<PathCount> = self
            .paths
            .iter()
            .map(|(path, count)| PathCount {
                path: path.clone(),
                count: *count,
            })
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
        items
    }

    /// Error categories by descending count
    pub fn error_items(&self) -> Vec<ErrorTypeCount> {
        let mut items: Vec<ErrorTypeCount> = self
            .error_types
            .iter()
            .map(|(kind, count)| ErrorTypeCount {
                kind: kind.clone(),
                count: *count,
            })
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.kind.cmp(&b.kind)));
        items
    }

    /// Latency ranges in ascending order, unknown labels last
    pub fn latency_items(&self) -> Vec<LatencyCount> {
        let mut items: Vec<LatencyCount> = self
            .latency
            .iter()
            .map(|(range, count)| LatencyCount {
                range: range.clone(),
                count: *count,
            })
            .collect();
        items.sort_by_key(|item| {
            LATENCY_BUCKETS
                .iter()
                .position(|b| *b == item.range)
                .unwrap_or(LATENCY_BUCKETS.len())
        });
        items
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathCount {
    pub path: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorTypeCount {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyCount {
    pub range: String,
    pub count: u64,
}

/// Exportable analytics state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    #[serde(default)]
    pub minute_data: Vec<TrafficDataPoint>,
    #[serde(default)]
    pub hour_data: Vec<TrafficDataPoint>,
    #[serde(default)]
    pub day_data: Vec<TrafficDataPoint>,
    #[serde(default)]
    pub path_distribution: BTreeMap<String, u64>,
    #[serde(default)]
    pub error_types: BTreeMap<String, u64>,
    #[serde(default)]
    pub latency_distribution: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(requests: f64, errors: f64, latency: f64) -> TrafficDataPoint {
        TrafficDataPoint {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            requests,
            errors,
            latency,
        }
    }

    #[test]
    fn test_latency_buckets() {
        assert_eq!(latency_bucket(0.0), "0-50ms");
        assert_eq!(latency_bucket(50.0), "0-50ms");
        assert_eq!(latency_bucket(50.5), "51-100ms");
        assert_eq!(latency_bucket(150.0), "101-200ms");
        assert_eq!(latency_bucket(1000.0), "501-1000ms");
        assert_eq!(latency_bucket(4000.0), ">1000ms");
    }

    #[test]
    fn test_granularity_aliases() {
        assert_eq!("hourly".parse::<Granularity>().unwrap(), Granularity::Minute);
        assert_eq!("DAILY".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!("day".parse::<Granularity>().unwrap(), Granularity::Day);
        assert!("yearly".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_average_divides_by_points_present() {
        let points = vec![point(10.0, 1.0, 20.0), point(20.0, 3.0, 40.0)];
        let avg = average(points.iter(), "t".to_string()).unwrap();

        assert_eq!(avg.requests, 15.0);
        assert_eq!(avg.errors, 2.0);
        assert_eq!(avg.latency, 30.0);
        assert!(average(Vec::<TrafficDataPoint>::new().iter(), "t".to_string()).is_none());
    }

    #[test]
    fn test_empty_source_appends_nothing() {
        let mut buffers = TrafficBuffers::default();
        assert!(buffers.rollup_hour("t".to_string()).is_none());
        assert!(buffers.rollup_day("t".to_string()).is_none());
        assert!(buffers.hour.is_empty());
        assert!(buffers.day.is_empty());
    }

    #[test]
    fn test_distribution_items_are_ordered() {
        let mut distributions = Distributions::default();
        distributions.record_request("/a", 10.0);
        distributions.record_request("/b", 300.0);
        distributions.record_request("/b", 2000.0);
        distributions.record_error("Timeout");

        let paths = distributions.path_items();
        assert_eq!(paths[0].path, "/b");
        assert_eq!(paths[0].count, 2);

        assert_eq!(distributions.error_items()[0].kind, "Timeout");

        let latency = distributions.latency_items();
        assert_eq!(latency.len(), LATENCY_BUCKETS.len());
        assert_eq!(latency[0].range, "0-50ms");
        assert_eq!(latency[5].count, 1);
    }
}
