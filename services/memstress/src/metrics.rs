//! Prometheus metrics for the memstress service
//!
//! All metrics live in the default registry and are exposed through the
//! `/metrics` route. A periodic recorder task refreshes the point-in-time
//! gauges independent of request traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_histogram_vec,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::MemoryStore;
use crate::usage::UsageProbe;

// Metrics storage
pub(crate) struct Metrics {
    pub(crate) requests: IntCounterVec,
    pub(crate) request_duration: HistogramVec,
    pub(crate) blocks_allocated: IntCounter,
    pub(crate) random_failures: IntCounter,
    pub(crate) recorder_ticks: IntCounter,
    pub(crate) held_blocks: IntGauge,
    pub(crate) held_bytes: IntGauge,
    pub(crate) allocated_bytes: IntGauge,
    pub(crate) resident_bytes: IntGauge,
}

lazy_static! {
    pub(crate) static ref METRICS: Option<Metrics> = register_metrics();
}

// Register all metrics with the default registry, with proper error handling
fn register_metrics() -> Option<Metrics> {
    let requests = match register_int_counter_vec!(
        "memstress_http_requests_total",
        "Count of all HTTP requests",
        &["handler"]
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register request counter: {}", e);
            return None;
        }
    };

    let request_duration = match register_histogram_vec!(
        "memstress_http_request_duration_seconds",
        "Duration of all HTTP requests",
        &["handler"],
        // Paced batches hold a request open for up to a second per block.
        vec![0.001, 0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register request duration histogram: {}", e);
            return None;
        }
    };

    let blocks_allocated = match register_int_counter!(
        "memstress_blocks_allocated_total",
        "Total blocks appended to the memory store"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register block counter: {}", e);
            return None;
        }
    };

    let random_failures = match register_int_counter!(
        "memstress_random_source_failures_total",
        "Total allocation batches aborted by random source failures"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register random failure counter: {}", e);
            return None;
        }
    };

    let recorder_ticks = match register_int_counter!(
        "memstress_recorder_ticks_total",
        "Total metrics recorder ticks"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register recorder tick counter: {}", e);
            return None;
        }
    };

    // The registry keeps the build info gauge alive; nothing updates it
    // after startup.
    match register_int_gauge!(
        prometheus::opts!("memstress_build_info", "Build information about this binary")
            .const_label("version", env!("CARGO_PKG_VERSION"))
    ) {
        Ok(m) => m.set(1),
        Err(e) => {
            tracing::error!("failed to register build info gauge: {}", e);
            return None;
        }
    }

    let held_blocks = match register_int_gauge!(
        "memstress_held_blocks",
        "Blocks currently held in the memory store"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register held blocks gauge: {}", e);
            return None;
        }
    };

    let held_bytes = match register_int_gauge!(
        "memstress_held_bytes",
        "Bytes currently held in the memory store"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register held bytes gauge: {}", e);
            return None;
        }
    };

    let allocated_bytes = match register_int_gauge!(
        "memstress_allocated_bytes",
        "Live heap bytes reported by the allocator"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register allocated bytes gauge: {}", e);
            return None;
        }
    };

    let resident_bytes = match register_int_gauge!(
        "memstress_resident_bytes",
        "Resident bytes reported by the allocator"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register resident bytes gauge: {}", e);
            return None;
        }
    };

    Some(Metrics {
        requests,
        request_duration,
        blocks_allocated,
        random_failures,
        recorder_ticks,
        held_blocks,
        held_bytes,
        allocated_bytes,
        resident_bytes,
    })
}

/// Record one handled HTTP request
pub(crate) fn record_request(handler: &str, started: Instant) {
    if let Some(m) = METRICS.as_ref() {
        m.requests.with_label_values(&[handler]).inc();
        m.request_duration
            .with_label_values(&[handler])
            .observe(started.elapsed().as_secs_f64());
    }
}

/// Record one block appended to the store
pub(crate) fn record_block_allocated() {
    if let Some(m) = METRICS.as_ref() {
        m.blocks_allocated.inc();
    }
}

/// Record an aborted allocation batch
pub(crate) fn record_random_failure() {
    if let Some(m) = METRICS.as_ref() {
        m.random_failures.inc();
    }
}

/// Encode the default registry in Prometheus text exposition format
#[must_use]
pub fn encode() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            String::from_utf8(buffer).unwrap_or_else(|_| "error encoding metrics".to_string())
        }
        Err(e) => {
            warn!("failed to encode metrics: {}", e);
            "error gathering metrics".to_string()
        }
    }
}

fn as_gauge(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Spawn the periodic recorder: every tick it increments the heartbeat
/// counter and refreshes the store and allocator gauges. The task stops
/// when the shutdown channel fires and can be awaited for a clean exit.
pub fn spawn_recorder(
    store: Arc<MemoryStore>,
    usage: Arc<dyn UsageProbe>,
    tick: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(m) = METRICS.as_ref() else { continue };
                    m.recorder_ticks.inc();
                    m.held_blocks.set(as_gauge(store.block_count() as u64));
                    m.held_bytes.set(as_gauge(store.held_bytes()));
                    match usage.snapshot() {
                        Ok(snapshot) => {
                            m.allocated_bytes.set(as_gauge(snapshot.allocated_bytes));
                            m.resident_bytes.set(as_gauge(snapshot.resident_bytes));
                        }
                        Err(e) => warn!("recorder failed to read memory statistics: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("metrics recorder stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_registered_series() {
        record_request("test", Instant::now());
        record_block_allocated();

        let body = encode();
        assert!(body.contains("memstress_http_requests_total"));
        assert!(body.contains("memstress_blocks_allocated_total"));
        assert!(body.contains("memstress_build_info"));
    }
}
