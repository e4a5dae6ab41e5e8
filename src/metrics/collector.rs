use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use futures::future::join_all;
use tracing::{debug, warn};

use super::record::{DailyAnalytics, EndpointAnalytics, MetricRecord, MetricsConfig};
use crate::cache::locks::KeyedLocks;
use crate::cache::{codec, CacheKey, KeyCodec, Namespace, StoreHandle};
use crate::clock::SharedClock;
use crate::Result;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Collects request outcomes into per-(day, endpoint, method) sequences held
/// in the shared store.
///
/// Appends are read-modify-write. Appends to the same sequence are serialized
/// within this process and different sequences never wait on each other;
/// across processes a record may be lost, which is acceptable for metrics.
pub struct MetricsCollector {
    store: StoreHandle,
    clock: SharedClock,
    config: MetricsConfig,
    appends: KeyedLocks,
}

impl MetricsCollector {
    pub fn new(store: StoreHandle, config: MetricsConfig, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            config,
            appends: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn sequence_key(&self, date: NaiveDate, endpoint: &str, method: &str) -> Result<CacheKey> {
        CacheKey::new(
            Namespace::Metrics,
            format!(
                "{}.{}.{}",
                date.format(DAY_FORMAT),
                method.to_ascii_uppercase(),
                KeyCodec::escape(endpoint)
            ),
        )
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.config.retention_days.max(1)) * 86_400)
    }

    /// Append one record to its day's sequence, dropping the oldest when full.
    pub async fn record(&self, record: MetricRecord) -> Result<()> {
        let date = record.timestamp().date_naive();
        let key = self.sequence_key(date, &record.endpoint, &record.method)?;

        let _guard = self.appends.lock(&key.encode()).await;
        let mut sequence = self.load(&key).await?.unwrap_or_default();
        sequence.push_back(record);
        while sequence.len() > self.config.capacity {
            sequence.pop_front();
        }
        let payload = codec::encode(Namespace::Metrics, &sequence, self.clock.unix_secs())?;
        self.store.set(&key, payload, self.retention()).await?;
        debug!(key = %key, len = sequence.len(), "metric recorded");
        Ok(())
    }

    /// Fire-and-forget [`record`](Self::record). Failures are logged, never
    /// returned.
    pub fn spawn_record(self: &Arc<Self>, record: MetricRecord) -> tokio::task::JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let endpoint = record.endpoint.clone();
            if let Err(err) = collector.record(record).await {
                warn!(endpoint = %endpoint, error = %err, "metric write dropped");
            }
        })
    }

    /// Read a sequence. An unreadable payload is discarded and replaced.
    async fn load(&self, key: &CacheKey) -> Result<Option<VecDeque<MetricRecord>>> {
        let Some(payload) = self.store.get(key).await? else {
            return Ok(None);
        };
        match codec::decode::<VecDeque<MetricRecord>>(Namespace::Metrics, &payload) {
            Ok(envelope) => Ok(Some(envelope.data)),
            Err(err) => {
                warn!(key = %key, error = %err, "discarding unreadable metric sequence");
                Ok(None)
            }
        }
    }

    async fn read_day(&self, key: &CacheKey) -> Result<Vec<MetricRecord>> {
        match self.store.get(key).await? {
            None => Ok(Vec::new()),
            Some(payload) => {
                let envelope =
                    codec::decode::<VecDeque<MetricRecord>>(Namespace::Metrics, &payload)?;
                Ok(envelope.data.into())
            }
        }
    }

    /// Aggregate the last `days` days (today included), clamped to between one
    /// day and the retention period.
    ///
    /// A day that cannot be read is reported in `failed_days` and excluded
    /// from the totals; the other days are still aggregated.
    pub async fn endpoint_analytics(
        &self,
        endpoint: &str,
        method: &str,
        days: u32,
    ) -> Result<EndpointAnalytics> {
        let today = self.clock.now().date_naive();
        let days = days.clamp(1, self.config.retention_days.max(1));
        let dates: Vec<NaiveDate> = (0..days)
            .filter_map(|i| today.checked_sub_days(Days::new(u64::from(i))))
            .collect();

        let mut keys = Vec::with_capacity(dates.len());
        for date in &dates {
            keys.push(self.sequence_key(*date, endpoint, method)?);
        }
        let reads = join_all(keys.iter().map(|key| self.read_day(key))).await;

        let mut daily = Vec::with_capacity(dates.len());
        let mut failed_days = Vec::new();
        for ((date, key), result) in dates.iter().zip(&keys).zip(reads) {
            let label = date.format(DAY_FORMAT).to_string();
            match result {
                Ok(records) => daily.push(DailyAnalytics::from_records(
                    label,
                    &records,
                    self.config.slow_request_ms,
                )),
                Err(err) => {
                    warn!(key = %key, error = %err, "metric day unreadable");
                    failed_days.push(label);
                }
            }
        }
        Ok(EndpointAnalytics::aggregate(
            endpoint,
            method,
            daily,
            failed_days,
        ))
    }

    /// Start of the UTC day `days_ago` days before now.
    pub fn day_start(&self, days_ago: u32) -> DateTime<Utc> {
        let today = self.clock.now().date_naive();
        today
            .checked_sub_days(Days::new(u64::from(days_ago)))
            .unwrap_or(today)
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or_else(|| self.clock.now())
    }
}
