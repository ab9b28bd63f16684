//! Observability metrics for comment ingestion
//!
//! Counters and histograms for remote calls, retries, credential rotation,
//! cache effectiveness and unit outcomes.
//!
//! ## Architecture
//!
//! - Uses the `metrics` crate facade; recording is a no-op until an exporter
//!   is installed
//! - [`init_metrics`] installs a Prometheus scrape endpoint (opt-in from the CLI)

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Correlation ID generator for call tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the metrics system with a Prometheus exporter
///
/// Idempotent: later calls are ignored.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "api_calls_total",
        Unit::Count,
        "Total number of remote API call attempts"
    );
    describe_histogram!(
        "api_call_duration_seconds",
        Unit::Seconds,
        "Remote API call duration in seconds"
    );
    describe_counter!(
        "api_retries_total",
        Unit::Count,
        "Total number of retried remote API calls"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_counter!(
        "quota_rotations_total",
        Unit::Count,
        "Number of switches to another API credential"
    );
    describe_counter!("cache_hits_total", Unit::Count, "Metadata cache hits");
    describe_counter!("cache_misses_total", Unit::Count, "Metadata cache misses");
    describe_counter!(
        "cache_evictions_total",
        Unit::Count,
        "Metadata cache LRU evictions"
    );
    describe_counter!(
        "units_finished_total",
        Unit::Count,
        "Units of work finished, labelled by outcome"
    );

    *initialized = true;
    info!(%addr, "Metrics system initialized");
    Ok(())
}

/// Generate a new correlation ID for call tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("call-{id:08x}")
}

/// Timing and outcome of one remote call attempt
pub struct ApiCallMetrics {
    operation: &'static str,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl ApiCallMetrics {
    /// Start recording an attempt
    pub fn start(operation: &'static str, attempt: u32) -> Self {
        Self {
            operation,
            start_time: Instant::now(),
            correlation_id: generate_correlation_id(),
            attempt,
        }
    }

    /// Record the attempt's outcome (`ok` or an error class label)
    pub fn record(&self, outcome: &'static str) {
        let duration = self.start_time.elapsed();

        counter!(
            "api_calls_total",
            "operation" => self.operation,
            "outcome" => outcome,
        )
        .increment(1);
        histogram!("api_call_duration_seconds", "operation" => self.operation)
            .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            attempt = self.attempt,
            outcome,
            duration_ms = duration.as_millis() as u64,
            "Remote call finished"
        );
    }

    /// Correlation id of this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("api_retries_total").increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Record a switch to another credential
pub fn record_quota_rotation() {
    counter!("quota_rotations_total").increment(1);
}

/// Record a cache lookup
pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!("cache_hits_total").increment(1);
    } else {
        counter!("cache_misses_total").increment(1);
    }
}

/// Record an LRU eviction
pub fn record_cache_eviction() {
    counter!("cache_evictions_total").increment(1);
}

/// Record a finished unit of work
pub fn record_unit_finished(status: &'static str) {
    counter!("units_finished_total", "status" => status).increment(1);
}
