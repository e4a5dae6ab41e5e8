//! Store liveness check.

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::warn;

use crate::cache::{CacheKey, Namespace, StoreHandle};
use crate::{Error, ErrorContext, Result};

const CHECK_TTL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub backend: &'static str,
    /// Wall time of the whole write/read/delete round trip.
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Write, read back and delete a unique check key.
///
/// Never fails: any problem is reported as `healthy: false` with the error
/// text.
pub async fn health_check(store: &StoreHandle) -> HealthStatus {
    let started = Instant::now();
    let outcome = round_trip(store).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(()) => HealthStatus {
            healthy: true,
            backend: store.backend_name(),
            latency_ms,
            error: None,
        },
        Err(err) => {
            warn!(backend = store.backend_name(), error = %err, "store health check failed");
            HealthStatus {
                healthy: false,
                backend: store.backend_name(),
                latency_ms,
                error: Some(err.to_string()),
            }
        }
    }
}

async fn round_trip(store: &StoreHandle) -> Result<()> {
    let key = CacheKey::new(
        Namespace::Metrics,
        format!("health-check.{}", uuid::Uuid::new_v4().simple()),
    )?;
    let token = Bytes::from(uuid::Uuid::new_v4().to_string());

    store.set(&key, token.clone(), CHECK_TTL).await?;
    let read = store.get(&key).await;
    // remove the key even when the read failed
    let removed = store.delete(&key).await;

    match read? {
        Some(value) if value == token => {}
        Some(_) => {
            return Err(Error::store_unavailable(
                "check value changed between write and read",
                ErrorContext::new()
                    .with_field_path(key.encode())
                    .with_source("health_check"),
            ))
        }
        None => {
            return Err(Error::store_unavailable(
                "check value missing after write",
                ErrorContext::new()
                    .with_field_path(key.encode())
                    .with_source("health_check"),
            ))
        }
    }
    removed?;
    Ok(())
}
