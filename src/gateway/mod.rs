//! Payment Provider Gateway
//!
//! Abstract capability over the external payment provider: create an
//! invoice, cancel an invoice, check whether an invoice has been paid.
//!
//! # Architecture
//!
//! ```text
//! Lifecycle / Reconcile ──▶ PaymentGateway (trait)
//!                                │
//!                    ┌───────────┴───────────┐
//!                    ▼                       ▼
//!               HttpGateway             MockGateway
//!           (reqwest + retry)         (tests, local runs)
//! ```
//!
//! The provider is chosen once, at invoice creation, and recorded on the
//! invoice as a [`ProviderKind`]; nothing downstream branches on provider
//! names.
//!
//! # Retry contract
//!
//! Only idempotent operations (`check_paid`, `cancel_invoice`) are retried
//! by the gateway layer. `create_invoice` is never auto-retried: a timeout
//! there means "outcome unknown" and the caller recovers by re-requesting
//! the invoice, which backfills the provider side instead of duplicating it.

pub mod http;
pub mod mock;
pub mod retry;

pub use http::HttpGateway;
pub use mock::MockGateway;
pub use retry::RetryPolicy;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Which provider implementation carries an invoice.
///
/// Recorded on the invoice at creation; used to pick the gateway instance,
/// never re-dispatched by string comparison downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// The hosted payment-link provider spoken over HTTP
    Paylink,
    /// In-process mock, for tests and local runs
    Mock,
}

impl ProviderKind {
    /// String form used in logs and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paylink => "paylink",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating a provider-side invoice
#[derive(Debug, Clone, Serialize)]
pub struct CreateInvoiceRequest {
    /// Amount due in minor currency units
    pub amount_minor: i64,
    /// ISO currency code
    pub currency: String,
    /// Human-readable purchase description shown on the payment page
    pub description: String,
    /// Correlation reference echoed back in webhook notifications
    /// (the internal invoice id)
    pub callback_ref: String,
    /// Key the provider uses to de-duplicate retried creations
    pub idempotency_key: String,
}

/// Provider-side invoice as returned by creation
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInvoice {
    /// Provider-assigned reference for all later calls
    pub provider_ref: String,
    /// Payment link / QR payload for the buyer
    pub payment_url: Option<String>,
    /// Provider-side expiry, when the provider reports one
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of an idempotent paid-status check against the provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentCheck {
    /// Whether the provider considers the invoice paid
    pub paid: bool,
    /// Amount actually paid, in minor units
    pub paid_amount_minor: Option<i64>,
    /// Provider's payment identifier, when paid
    pub provider_payment_id: Option<String>,
}

impl PaymentCheck {
    /// A check reporting no payment yet
    pub fn unpaid() -> Self {
        Self::default()
    }

    /// A check reporting full payment
    pub fn paid(amount_minor: i64, payment_id: impl Into<String>) -> Self {
        Self {
            paid: true,
            paid_amount_minor: Some(amount_minor),
            provider_payment_id: Some(payment_id.into()),
        }
    }
}

/// Capability contract for one payment provider.
///
/// Implementations must keep `check_paid` side-effect-free at the provider
/// and `cancel_invoice` safe to repeat.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Which provider this gateway speaks for
    fn kind(&self) -> ProviderKind;

    /// Create an invoice at the provider.
    ///
    /// Not auto-retried. A [`GatewayError::Timeout`] here means the provider
    /// may or may not have created the invoice; callers must treat it as
    /// "unknown, reconcile later", never as failure.
    async fn create_invoice(
        &self,
        request: &CreateInvoiceRequest,
    ) -> Result<ProviderInvoice, GatewayError>;

    /// Cancel an invoice at the provider, best-effort. Local state stays
    /// authoritative for whether this system honors the invoice.
    async fn cancel_invoice(&self, provider_ref: &str) -> Result<(), GatewayError>;

    /// Ask the provider whether the invoice has been paid. Idempotent and
    /// side-effect-free; retried on transient failure.
    async fn check_paid(&self, provider_ref: &str) -> Result<PaymentCheck, GatewayError>;
}
