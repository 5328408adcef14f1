//! Reconciliation Engine
//!
//! The single entry point through which an invoice becomes `Paid` and an
//! entitlement is granted. Both trigger paths, the provider's webhook and
//! the buyer's status poll, call [`ReconcileEngine::reconcile`]; the
//! [`ReconcileSource`] they pass is carried for logging and metrics only,
//! and the two paths are byte-identical in effect.
//!
//! # Flow
//!
//! ```text
//! reconcile(invoice, source)
//!     │ already Paid? ───────────────▶ AlreadyConfirmed (idempotent no-op)
//!     │ terminal non-paid? ──────────▶ Stale (never resurrected)
//!     │ no provider invoice yet? ────▶ Pending
//!     ▼
//! gateway.check_paid  ◀── provider is the source of truth; the webhook
//!     │                   payload is only ever a hint to look
//!     │ not paid, or paid < amount ──▶ Pending
//!     ▼
//! confirm_paid (conditional update: Paid iff AwaitingPayment)
//!     ├─ Won ────▶ grant entitlement, Confirmed     ◀── exactly one caller
//!     ├─ AlreadyPaid ▶ AlreadyConfirmed (race lost == success)
//!     └─ Ineligible ─▶ Stale
//! ```
//!
//! No lock is held across the gateway call: the external verification
//! happens first, and the local conditional update is the entire critical
//! section.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gateway::PaymentGateway;
use crate::metrics::global_metrics;
use crate::store::{
    ConfirmOutcome, EntitlementStore, GrantOutcome, GrantReason, Invoice, InvoiceId,
    InvoiceStatus, InvoiceStore, TransitionOutcome,
};

/// Which trigger path invoked reconciliation. Logging/metrics only; the
/// state transitions are identical for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileSource {
    /// Provider webhook delivery
    Webhook,
    /// Buyer-initiated status poll
    Poll,
}

impl ReconcileSource {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Poll => "poll",
        }
    }
}

impl fmt::Display for ReconcileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one reconciliation pass. All variants are normal results;
/// losing the confirmation race or hitting a stale invoice is not an error.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// This call verified payment, won the status race, and granted the
    /// entitlement
    Confirmed(Invoice),
    /// The invoice was already Paid (earlier call or concurrent winner).
    /// Callers treat this exactly like `Confirmed`.
    AlreadyConfirmed(Invoice),
    /// Payment not (fully) made yet; invoice unchanged
    Pending(Invoice),
    /// The invoice is terminal and unpaid (expired/cancelled/failed);
    /// nothing was or will be mutated
    Stale(Invoice),
}

impl ReconcileOutcome {
    /// The invoice as observed by this pass
    pub fn invoice(&self) -> &Invoice {
        match self {
            Self::Confirmed(inv)
            | Self::AlreadyConfirmed(inv)
            | Self::Pending(inv)
            | Self::Stale(inv) => inv,
        }
    }

    /// Whether the invoice is paid after this pass
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Confirmed(_) | Self::AlreadyConfirmed(_))
    }

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed(_) => "confirmed",
            Self::AlreadyConfirmed(_) => "already_confirmed",
            Self::Pending(_) => "pending",
            Self::Stale(_) => "stale",
        }
    }
}

/// Applies provider-verified payment facts to invoices, exactly once each
pub struct ReconcileEngine {
    invoices: Arc<dyn InvoiceStore>,
    entitlements: Arc<dyn EntitlementStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl ReconcileEngine {
    /// Wire the engine to its collaborators
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        entitlements: Arc<dyn EntitlementStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            invoices,
            entitlements,
            gateway,
        }
    }

    /// Resolve a provider reference to the invoice it belongs to
    /// (webhook correlation).
    pub async fn invoice_by_provider_ref(&self, provider_ref: &str) -> Result<Invoice> {
        self.invoices
            .find_by_provider_ref(provider_ref)
            .await?
            .ok_or_else(|| Error::InvoiceNotFound(provider_ref.to_string()))
    }

    /// Evaluate whether the invoice is now paid and apply the consequences
    /// exactly once.
    ///
    /// Commutative across sources and deliveries: any interleaving of
    /// webhook and poll calls, including duplicates, converges on the same
    /// final state with exactly one entitlement grant.
    pub async fn reconcile(
        &self,
        invoice_id: InvoiceId,
        source: ReconcileSource,
    ) -> Result<ReconcileOutcome> {
        let invoice = self
            .invoices
            .get(invoice_id)
            .await?
            .ok_or_else(|| Error::InvoiceNotFound(invoice_id.to_string()))?;

        let outcome = self.evaluate(invoice, source).await?;
        self.invoices.touch_reconciled(invoice_id, Utc::now()).await?;
        global_metrics().record_reconcile(source.as_str(), outcome.as_str());
        Ok(outcome)
    }

    async fn evaluate(
        &self,
        invoice: Invoice,
        source: ReconcileSource,
    ) -> Result<ReconcileOutcome> {
        // Primary defense against duplicate webhooks and webhook/poll races
        if invoice.status == InvoiceStatus::Paid {
            return self.already_confirmed(invoice, source).await;
        }
        if invoice.status.is_terminal() {
            return Ok(ReconcileOutcome::Stale(invoice));
        }

        // Local row exists but the provider side was never created; an early
        // poll here is harmless.
        let Some(provider_ref) = invoice.provider_ref.clone() else {
            return Ok(ReconcileOutcome::Pending(invoice));
        };

        // Horizon enforcement on read: a dead sweeper must not keep an
        // overdue invoice reconcilable forever.
        let now = Utc::now();
        if invoice.is_past_expiry(now) {
            return match self
                .invoices
                .transition(invoice.id, InvoiceStatus::AwaitingPayment, InvoiceStatus::Expired)
                .await?
            {
                TransitionOutcome::Applied(inv) => {
                    info!(invoice_id = %inv.id, source = %source, "Invoice expired on reconcile");
                    Ok(ReconcileOutcome::Stale(inv))
                }
                // Raced with a concurrent confirm or sweep; re-read the truth
                TransitionOutcome::Unchanged(inv) if inv.status == InvoiceStatus::Paid => {
                    self.already_confirmed(inv, source).await
                }
                TransitionOutcome::Unchanged(inv) => Ok(ReconcileOutcome::Stale(inv)),
            };
        }

        // Provider is the source of truth; no lock is held across this call
        let check = self.gateway.check_paid(&provider_ref).await.map_err(Error::from)?;

        if !check.paid {
            return Ok(ReconcileOutcome::Pending(invoice));
        }
        let paid_amount = match check.paid_amount_minor {
            Some(amount) if amount >= invoice.amount_minor => amount,
            reported => {
                // Partial (or unreported) amounts never fulfill
                warn!(
                    invoice_id = %invoice.id,
                    source = %source,
                    expected_minor = invoice.amount_minor,
                    reported_minor = ?reported,
                    "Provider reports payment below invoice amount; leaving pending"
                );
                return Ok(ReconcileOutcome::Pending(invoice));
            }
        };

        match self
            .invoices
            .confirm_paid(invoice.id, paid_amount, check.provider_payment_id.clone())
            .await?
        {
            ConfirmOutcome::Won(inv) => {
                info!(
                    invoice_id = %inv.id,
                    source = %source,
                    paid_minor = paid_amount,
                    provider_payment_id = check.provider_payment_id.as_deref().unwrap_or("-"),
                    "Payment confirmed"
                );
                self.grant_for(&inv).await?;
                Ok(ReconcileOutcome::Confirmed(inv))
            }
            ConfirmOutcome::AlreadyPaid(inv) => self.already_confirmed(inv, source).await,
            ConfirmOutcome::Ineligible(inv) => Ok(ReconcileOutcome::Stale(inv)),
        }
    }

    /// Success path for callers that did not win the transition. Also heals
    /// the rare case where a previous winner crashed between confirming the
    /// invoice and granting: the grant upsert is idempotent, so re-asserting
    /// it here cannot double-grant.
    async fn already_confirmed(
        &self,
        invoice: Invoice,
        source: ReconcileSource,
    ) -> Result<ReconcileOutcome> {
        if !self
            .entitlements
            .is_active(&invoice.buyer, &invoice.item)
            .await?
        {
            warn!(
                invoice_id = %invoice.id,
                source = %source,
                "Paid invoice without entitlement; re-asserting grant"
            );
            self.grant_for(&invoice).await?;
        }
        Ok(ReconcileOutcome::AlreadyConfirmed(invoice))
    }

    async fn grant_for(&self, invoice: &Invoice) -> Result<()> {
        let outcome = self
            .entitlements
            .grant(
                invoice.buyer.clone(),
                invoice.item.clone(),
                invoice.id,
                GrantReason::Purchase,
            )
            .await?;
        match outcome {
            GrantOutcome::Granted | GrantOutcome::Reactivated => {
                global_metrics().record_entitlement_granted();
                info!(
                    invoice_id = %invoice.id,
                    buyer = %invoice.buyer,
                    item = %invoice.item,
                    outcome = ?outcome,
                    "Entitlement granted"
                );
            }
            GrantOutcome::AlreadyActive => {}
        }
        Ok(())
    }
}
