//! Error types for CoursePay
//!
//! This module provides the error type hierarchy using `thiserror`,
//! shared across the gateway, stores, lifecycle and reconciliation layers.
//!
//! Note that several reconciliation outcomes that look like failures are
//! deliberately *not* errors: a stale invoice or a lost status race is a
//! normal result (`ReconcileOutcome`), because callers must treat them as
//! success. Only conditions that require the caller to change course are
//! modeled here.

use thiserror::Error;

use crate::store::{BuyerId, ItemId};

/// The main error type for CoursePay operations
#[derive(Error, Debug)]
pub enum Error {
    /// Payment provider gateway errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The buyer already holds an active entitlement for the item.
    /// Rejected before any provider call is made.
    #[error("Buyer {buyer} already owns item {item}")]
    AlreadyEntitled {
        /// Buyer requesting the invoice
        buyer: BuyerId,
        /// Item the buyer already owns
        item: ItemId,
    },

    /// The catalog has no such item
    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    /// No invoice with the given identity
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Payment provider gateway errors.
///
/// The transient/permanent split drives the retry policy: transient errors
/// and timeouts are retried for idempotent operations, permanent errors are
/// surfaced immediately.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Transient network or provider-side (5xx) failure; safe to retry
    #[error("Transient provider failure: {0}")]
    Transient(String),

    /// The provider did not answer within the request timeout.
    ///
    /// After invoice creation this means "outcome unknown", never "failed":
    /// the provider may have created the invoice before the deadline.
    #[error("Provider request timed out after {0}ms")]
    Timeout(u64),

    /// Provider rejected the request (4xx-class); retrying will not help
    #[error("Provider rejected request{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Permanent {
        /// HTTP status returned by the provider, when there was one
        status: Option<u16>,
        /// Provider error message
        message: String,
    },
}

impl GatewayError {
    /// Whether the retry policy may re-issue the failed call.
    ///
    /// Only meaningful for idempotent operations; creation is never
    /// auto-retried regardless of this flag.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_) | GatewayError::Timeout(_))
    }

    /// Create a permanent error with an HTTP status attached
    pub fn permanent(status: u16, message: impl Into<String>) -> Self {
        GatewayError::Permanent {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a permanent error with no HTTP status
    pub fn rejected(message: impl Into<String>) -> Self {
        GatewayError::Permanent {
            status: None,
            message: message.into(),
        }
    }
}

/// Persistence-layer errors.
///
/// The in-memory stores only produce `NotFound`; the `Backend` variant
/// exists so a database-backed implementation can surface its failures
/// through the same trait without widening the signatures.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// No record with the given key
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Underlying storage backend failed
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type alias for CoursePay operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the operation that produced this error can be retried by the
    /// caller as-is (used to map lifecycle failures to "try again" at the
    /// HTTP edge).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Gateway(g) => g.is_retryable(),
            Error::Store(StoreError::Backend(_)) => true,
            _ => false,
        }
    }
}
