//! Metrics Collection for CoursePay Observability
//!
//! This module provides production-ready metrics collection with:
//! - Atomic counters for invoices, reconciliations, and grants
//! - Labeled breakdowns (reconcile source/outcome, gateway operation)
//! - Prometheus-compatible text format export via `GET /metrics`
//!
//! # Example
//!
//! ```rust,no_run
//! use coursepay::metrics::global_metrics;
//!
//! global_metrics().record_reconcile("webhook", "confirmed");
//! let output = global_metrics().to_prometheus_format();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};

/// Metrics collection for the payment core
///
/// Thread-safe metrics collector using atomics and RwLocks for
/// high-performance concurrent access.
#[derive(Debug)]
pub struct Metrics {
    // === Counters ===
    /// Total local invoices created
    pub invoices_created_total: AtomicU64,
    /// Total invoices swept to expired
    pub invoices_expired_total: AtomicU64,
    /// Total reconciliation passes evaluated
    pub reconciliations_total: AtomicU64,
    /// Total entitlements granted (fresh grants and re-activations)
    pub entitlements_granted_total: AtomicU64,
    /// Total webhook deliveries received
    pub webhooks_received_total: AtomicU64,
    /// Total gateway call failures
    pub gateway_errors_total: AtomicU64,

    // === Labeled counters ===
    /// Reconciliations broken down by (source, outcome)
    reconciliations_by_source_outcome: RwLock<HashMap<(String, String), u64>>,
    /// Gateway errors broken down by operation
    gateway_errors_by_op: RwLock<HashMap<String, u64>>,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            invoices_created_total: AtomicU64::new(0),
            invoices_expired_total: AtomicU64::new(0),
            reconciliations_total: AtomicU64::new(0),
            entitlements_granted_total: AtomicU64::new(0),
            webhooks_received_total: AtomicU64::new(0),
            gateway_errors_total: AtomicU64::new(0),
            reconciliations_by_source_outcome: RwLock::new(HashMap::new()),
            gateway_errors_by_op: RwLock::new(HashMap::new()),
        }
    }

    /// Record a local invoice creation
    pub fn record_invoice_created(&self) {
        self.invoices_created_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an invoice swept to expired
    pub fn record_invoice_expired(&self) {
        self.invoices_expired_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one reconciliation pass with its trigger source and outcome
    pub fn record_reconcile(&self, source: &str, outcome: &str) {
        self.reconciliations_total.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut breakdown) = self.reconciliations_by_source_outcome.write() {
            *breakdown
                .entry((source.to_string(), outcome.to_string()))
                .or_insert(0) += 1;
        }
    }

    /// Record a granted (or re-activated) entitlement
    pub fn record_entitlement_granted(&self) {
        self.entitlements_granted_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound webhook delivery
    pub fn record_webhook_received(&self) {
        self.webhooks_received_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed gateway call
    pub fn record_gateway_error(&self, op: &str) {
        self.gateway_errors_total.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut breakdown) = self.gateway_errors_by_op.write() {
            *breakdown.entry(op.to_string()).or_insert(0) += 1;
        }
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "coursepay_invoices_created_total {}\n",
            self.invoices_created_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "coursepay_invoices_expired_total {}\n",
            self.invoices_expired_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "coursepay_reconciliations_total {}\n",
            self.reconciliations_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "coursepay_entitlements_granted_total {}\n",
            self.entitlements_granted_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "coursepay_webhooks_received_total {}\n",
            self.webhooks_received_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "coursepay_gateway_errors_total {}\n",
            self.gateway_errors_total.load(Ordering::Relaxed)
        ));

        if let Ok(breakdown) = self.reconciliations_by_source_outcome.read() {
            let mut entries: Vec<_> = breakdown.iter().collect();
            entries.sort();
            for ((source, outcome), count) in entries {
                output.push_str(&format!(
                    "coursepay_reconciliations{{source=\"{source}\",outcome=\"{outcome}\"}} {count}\n"
                ));
            }
        }
        if let Ok(breakdown) = self.gateway_errors_by_op.read() {
            let mut entries: Vec<_> = breakdown.iter().collect();
            entries.sort();
            for (op, count) in entries {
                output.push_str(&format!(
                    "coursepay_gateway_errors{{op=\"{op}\"}} {count}\n"
                ));
            }
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance for the service
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get or initialize the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
