//! Status and health check handlers
//!
//! HTTP endpoints for monitoring service health:
//! - `/status` - Detailed service status with runtime metrics
//! - `/health` - Simple health check for systemd/load balancers
//! - `/ready`  - Readiness probe
//!
//! # Architecture
//!
//! ```text
//! HTTP Request ──> Axum Router ──> status_handler ──> RuntimeStats
//!                                        │                │
//!                                        ▼                ▼
//!                              StatusResponse    LatencyHistogram
//!                                        │         + global metrics
//!                                        ▼
//!                                   JSON Response
//! ```

use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument};

use crate::metrics::global_metrics;

/// Service version from Cargo.toml
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name from Cargo.toml
pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

// ============================================================================
// Response Types
// ============================================================================

/// Health check response for simple liveness probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status (always "healthy" if responding)
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Detailed service status response with runtime metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Service version (from Cargo.toml)
    pub version: String,

    /// Service name
    pub name: String,

    /// Service uptime in seconds
    pub uptime_seconds: u64,

    /// Total local invoices created
    pub invoices_created: u64,

    /// Total reconciliation passes evaluated
    pub reconciliations_processed: u64,

    /// Total entitlements granted
    pub entitlements_granted: u64,

    /// Memory usage metrics
    pub memory: MemoryMetrics,

    /// Reconciliation latency statistics (percentiles)
    pub reconcile_latency: LatencyMetrics,

    /// Service status (always "running" if responding)
    pub status: String,

    /// ISO8601 timestamp of when status was generated
    pub timestamp: String,
}

/// Memory usage metrics collected from sysinfo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size - actual physical memory used (bytes)
    pub rss_bytes: u64,

    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

/// Latency percentile metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// 50th percentile (median) latency in milliseconds
    pub p50_ms: f64,

    /// 95th percentile latency in milliseconds
    pub p95_ms: f64,

    /// 99th percentile latency in milliseconds
    pub p99_ms: f64,

    /// Total number of samples recorded
    pub total_samples: u64,

    /// Mean latency in milliseconds
    pub mean_ms: f64,

    /// Maximum latency recorded in milliseconds
    pub max_ms: f64,
}

// ============================================================================
// Latency Histogram
// ============================================================================

/// Thread-safe latency histogram for reconciliation timings.
///
/// Uses HdrHistogram for efficient percentile calculations with minimal
/// memory. Tracks latencies from 1 microsecond to 60 seconds with 3
/// significant figures of precision.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create a new latency histogram
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, 60_000_000, 3).expect("Failed to create histogram");
        Self {
            inner: RwLock::new(histogram),
        }
    }

    /// Record a latency value in microseconds.
    ///
    /// Values outside the histogram bounds are silently ignored.
    pub fn record(&self, latency_us: u64) {
        let mut hist = self.inner.write();
        let _ = hist.record(latency_us);
    }

    /// Record a latency duration
    pub fn record_duration(&self, duration: std::time::Duration) {
        self.record(duration.as_micros() as u64);
    }

    /// Get the total count of recorded values
    pub fn count(&self) -> u64 {
        self.inner.read().len()
    }

    /// Get complete latency metrics, percentiles in milliseconds
    pub fn metrics(&self) -> LatencyMetrics {
        let hist = self.inner.read();
        LatencyMetrics {
            p50_ms: hist.value_at_percentile(50.0) as f64 / 1000.0,
            p95_ms: hist.value_at_percentile(95.0) as f64 / 1000.0,
            p99_ms: hist.value_at_percentile(99.0) as f64 / 1000.0,
            total_samples: hist.len(),
            mean_ms: hist.mean() / 1000.0,
            max_ms: hist.max() as f64 / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Runtime Stats
// ============================================================================

/// Per-process runtime state backing the status endpoint.
///
/// Counters live in [`crate::metrics`]; this holds what cannot be a global:
/// the start instant and the reconcile latency histogram.
#[derive(Debug)]
pub struct RuntimeStats {
    start_time: Instant,
    /// Latency of reconciliation passes, webhook and poll combined
    pub reconcile_latency: LatencyHistogram,
}

impl RuntimeStats {
    /// Create runtime stats anchored at the current instant
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            reconcile_latency: LatencyHistogram::new(),
        }
    }

    /// Service uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Build the status response from current state
    pub fn status_response(&self) -> StatusResponse {
        let metrics = global_metrics();
        StatusResponse {
            version: SERVICE_VERSION.to_string(),
            name: SERVICE_NAME.to_string(),
            uptime_seconds: self.uptime_seconds(),
            invoices_created: metrics.invoices_created_total.load(Ordering::Relaxed),
            reconciliations_processed: metrics.reconciliations_total.load(Ordering::Relaxed),
            entitlements_granted: metrics.entitlements_granted_total.load(Ordering::Relaxed),
            memory: collect_memory_metrics(),
            reconcile_latency: self.reconcile_latency.metrics(),
            status: "running".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// System Metrics Collection
// ============================================================================

/// Collect memory metrics for the current process using sysinfo.
fn collect_memory_metrics() -> MemoryMetrics {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => MemoryMetrics {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        },
        None => {
            debug!("Could not find current process in sysinfo");
            MemoryMetrics::default()
        }
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// Health check endpoint handler.
///
/// # Route
/// `GET /health`
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    debug!("Health check requested");
    (StatusCode::OK, Json(HealthResponse::default()))
}

/// Readiness check endpoint handler.
///
/// # Route
/// `GET /ready`
#[instrument(skip_all)]
pub async fn readiness_handler() -> impl IntoResponse {
    debug!("Readiness check requested");
    (StatusCode::OK, Json(HealthResponse::default()))
}
