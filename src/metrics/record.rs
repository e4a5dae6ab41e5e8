use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
pub const DEFAULT_SLOW_REQUEST_MS: u64 = 2000;

/// One finished request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub endpoint: String,
    pub method: String,
    /// Unix milliseconds when the request started.
    pub timestamp_ms: i64,
    pub response_time_ms: u64,
    pub status_code: u16,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl MetricRecord {
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        timestamp: DateTime<Utc>,
        response_time_ms: u64,
        status_code: u16,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into().to_ascii_uppercase(),
            timestamp_ms: timestamp.timestamp_millis(),
            response_time_ms,
            status_code,
            cache_hit: false,
            user_id: None,
        }
    }

    pub fn with_cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = hit;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms).unwrap_or_default()
    }

    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Records kept per (day, endpoint, method); oldest dropped first.
    pub capacity: usize,
    pub retention_days: u32,
    pub slow_request_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            retention_days: DEFAULT_RETENTION_DAYS,
            slow_request_ms: DEFAULT_SLOW_REQUEST_MS,
        }
    }
}

impl MetricsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days.max(1);
        self
    }

    pub fn with_slow_request_ms(mut self, ms: u64) -> Self {
        self.slow_request_ms = ms;
        self
    }
}

/// Per-day figures. Rates are percentages in `0.0..=100.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAnalytics {
    /// `YYYY-MM-DD` (UTC).
    pub date: String,
    pub requests: u64,
    pub avg_response_time_ms: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
    pub slow_requests: u64,
}

impl DailyAnalytics {
    pub(crate) fn from_records(date: String, records: &[MetricRecord], slow_ms: u64) -> Self {
        let requests = records.len() as u64;
        if requests == 0 {
            return Self::empty(date);
        }
        let total_time: u64 = records.iter().map(|r| r.response_time_ms).sum();
        let hits = records.iter().filter(|r| r.cache_hit).count() as f64;
        let errors = records.iter().filter(|r| r.is_error()).count() as f64;
        let slow = records
            .iter()
            .filter(|r| r.response_time_ms > slow_ms)
            .count() as u64;
        let n = requests as f64;
        Self {
            date,
            requests,
            avg_response_time_ms: total_time as f64 / n,
            cache_hit_rate: hits / n * 100.0,
            error_rate: errors / n * 100.0,
            slow_requests: slow,
        }
    }

    pub(crate) fn empty(date: String) -> Self {
        Self {
            date,
            requests: 0,
            avg_response_time_ms: 0.0,
            cache_hit_rate: 0.0,
            error_rate: 0.0,
            slow_requests: 0,
        }
    }
}

/// Aggregate over the last N days. Averages and rates are weighted by each
/// day's request count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointAnalytics {
    pub endpoint: String,
    pub method: String,
    pub days: u32,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
    pub slow_requests: u64,
    /// Newest first.
    pub daily: Vec<DailyAnalytics>,
    /// Days whose sequence could not be read.
    pub failed_days: Vec<String>,
}

impl EndpointAnalytics {
    pub(crate) fn aggregate(
        endpoint: &str,
        method: &str,
        daily: Vec<DailyAnalytics>,
        failed_days: Vec<String>,
    ) -> Self {
        let total: u64 = daily.iter().map(|d| d.requests).sum();
        let weighted = |f: fn(&DailyAnalytics) -> f64| -> f64 {
            if total == 0 {
                return 0.0;
            }
            daily.iter().map(|d| f(d) * d.requests as f64).sum::<f64>() / total as f64
        };
        Self {
            endpoint: endpoint.to_string(),
            method: method.to_ascii_uppercase(),
            days: (daily.len() + failed_days.len()) as u32,
            total_requests: total,
            avg_response_time_ms: weighted(|d| d.avg_response_time_ms),
            cache_hit_rate: weighted(|d| d.cache_hit_rate),
            error_rate: weighted(|d| d.error_rate),
            slow_requests: daily.iter().map(|d| d.slow_requests).sum(),
            daily,
            failed_days,
        }
    }
}
