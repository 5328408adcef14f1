//! Invoice Lifecycle Manager
//!
//! Orchestrates invoice creation, supersession and expiry. The creation
//! path is built so that every failure mode leaves the system in a state
//! from which a plain retry of `request_invoice` converges:
//!
//! ```text
//! request_invoice
//!     │  buyer already entitled? ──▶ reject (no provider call)
//!     ▼
//! open invoice for (buyer, item)?
//!     ├─ yes, has provider data ──▶ return it unchanged
//!     ├─ yes, still Created ──────▶ backfill provider side, return
//!     └─ no ──▶ insert Created row (race-safe; loser adopts winner's row)
//!                   │
//!                   ▼
//!          gateway create ── ok ──▶ AwaitingPayment, return
//!                   │
//!                   ├─ transient/timeout ──▶ row stays Created, "try again"
//!                   └─ permanent ─────────▶ row moves to Failed, surface
//! ```
//!
//! A provider-create timeout is "outcome unknown": the local row stays
//! `Created` and the next `request_invoice` re-sends the same idempotency
//! key, so the provider de-duplicates rather than double-issuing.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::{Error, GatewayError, Result};
use crate::gateway::{CreateInvoiceRequest, PaymentGateway};
use crate::metrics::global_metrics;
use crate::store::{
    BuyerId, EntitlementStore, InsertOutcome, Invoice, InvoiceStatus, InvoiceStore, ItemId,
    NewInvoice, TransitionOutcome,
};

/// Default payment window
pub const DEFAULT_INVOICE_TTL_HOURS: i64 = 24;

/// Orchestrator for invoice creation, supersession and expiry
pub struct InvoiceLifecycle {
    invoices: Arc<dyn InvoiceStore>,
    entitlements: Arc<dyn EntitlementStore>,
    catalog: Arc<dyn Catalog>,
    gateway: Arc<dyn PaymentGateway>,
    invoice_ttl: Duration,
}

impl InvoiceLifecycle {
    /// Wire the lifecycle manager to its collaborators
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        entitlements: Arc<dyn EntitlementStore>,
        catalog: Arc<dyn Catalog>,
        gateway: Arc<dyn PaymentGateway>,
        invoice_ttl: Duration,
    ) -> Self {
        Self {
            invoices,
            entitlements,
            catalog,
            gateway,
            invoice_ttl,
        }
    }

    /// Issue (or re-issue) the invoice for a buyer/item pair.
    ///
    /// Idempotent from the buyer's point of view: reloading the checkout
    /// page calls this again and gets the same invoice back. Rejects with
    /// [`Error::AlreadyEntitled`] before any provider work when the buyer
    /// already owns the item.
    pub async fn request_invoice(&self, buyer: BuyerId, item: ItemId) -> Result<Invoice> {
        if self.entitlements.is_active(&buyer, &item).await? {
            return Err(Error::AlreadyEntitled { buyer, item });
        }

        let catalog_item = self
            .catalog
            .item(&item)
            .await
            .ok_or_else(|| Error::UnknownItem(item.clone()))?;

        if let Some(existing) = self.invoices.find_open(&buyer, &item).await? {
            if existing.has_provider_data() {
                info!(
                    invoice_id = %existing.id,
                    buyer = %buyer,
                    item = %item,
                    "Reusing open invoice"
                );
                return Ok(existing);
            }
            // A prior attempt died between local create and provider create
            return self.backfill_provider(existing, &catalog_item.title).await;
        }

        let row = Invoice::new(NewInvoice {
            buyer: buyer.clone(),
            item: item.clone(),
            amount_minor: catalog_item.price_minor,
            currency: catalog_item.currency.clone(),
            provider: self.gateway.kind(),
            expires_at: Utc::now() + self.invoice_ttl,
        });

        let row = match self.invoices.insert_if_absent(row).await? {
            InsertOutcome::Inserted(inv) => {
                global_metrics().record_invoice_created();
                info!(
                    invoice_id = %inv.id,
                    buyer = %buyer,
                    item = %item,
                    amount_minor = inv.amount_minor,
                    "Created local invoice"
                );
                inv
            }
            // Lost a concurrent create; adopt the winner's row
            InsertOutcome::Existing(inv) if inv.has_provider_data() => return Ok(inv),
            InsertOutcome::Existing(inv) => inv,
        };

        self.backfill_provider(row, &catalog_item.title).await
    }

    /// Cancel the open invoice for a pair (provider-side best-effort, local
    /// authoritative) and issue a fresh one.
    pub async fn replace_invoice(&self, buyer: BuyerId, item: ItemId) -> Result<Invoice> {
        if let Some(old) = self.invoices.find_open(&buyer, &item).await? {
            if let Some(provider_ref) = old.provider_ref.as_deref() {
                if let Err(err) = self.gateway.cancel_invoice(provider_ref).await {
                    warn!(
                        invoice_id = %old.id,
                        provider_ref,
                        error = %err,
                        "Provider-side cancel failed; cancelling locally anyway"
                    );
                }
            }
            match self
                .invoices
                .transition(old.id, old.status, InvoiceStatus::Cancelled)
                .await?
            {
                TransitionOutcome::Applied(inv) => {
                    info!(invoice_id = %inv.id, buyer = %buyer, item = %item, "Cancelled superseded invoice");
                }
                TransitionOutcome::Unchanged(inv) => {
                    // The old invoice changed under us (it may even have been
                    // paid); request_invoice below re-evaluates from scratch.
                    warn!(
                        invoice_id = %inv.id,
                        status = %inv.status,
                        "Invoice moved while being superseded"
                    );
                }
            }
        }
        self.request_invoice(buyer, item).await
    }

    /// Sweep invoices whose payment window closed to `Expired`.
    ///
    /// Returns how many invoices this call expired. Safe to run from
    /// multiple processes: the guarded transition lets only one sweeper win
    /// per invoice, and an invoice paid between the scan and the sweep is
    /// left alone.
    pub async fn expire_overdue(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.invoices.open_expiring_before(now).await?;
        let mut expired = 0;
        for invoice in due {
            match self
                .invoices
                .transition(invoice.id, InvoiceStatus::AwaitingPayment, InvoiceStatus::Expired)
                .await?
            {
                TransitionOutcome::Applied(inv) => {
                    expired += 1;
                    global_metrics().record_invoice_expired();
                    info!(invoice_id = %inv.id, buyer = %inv.buyer, item = %inv.item, "Invoice expired");
                }
                TransitionOutcome::Unchanged(_) => {}
            }
        }
        Ok(expired)
    }

    async fn backfill_provider(&self, invoice: Invoice, title: &str) -> Result<Invoice> {
        let request = CreateInvoiceRequest {
            amount_minor: invoice.amount_minor,
            currency: invoice.currency.clone(),
            description: title.to_string(),
            callback_ref: invoice.id.to_string(),
            idempotency_key: invoice.idempotency_key.clone(),
        };

        let provider_invoice = match self.gateway.create_invoice(&request).await {
            Ok(created) => created,
            Err(err @ GatewayError::Permanent { .. }) => {
                warn!(
                    invoice_id = %invoice.id,
                    error = %err,
                    "Provider permanently rejected invoice creation"
                );
                self.invoices
                    .transition(invoice.id, InvoiceStatus::Created, InvoiceStatus::Failed)
                    .await?;
                global_metrics().record_gateway_error("create_invoice");
                return Err(err.into());
            }
            Err(err) => {
                // Transient or timeout: outcome unknown. The row stays
                // Created so the next request_invoice retries creation with
                // the same idempotency key.
                warn!(
                    invoice_id = %invoice.id,
                    error = %err,
                    "Provider invoice creation did not complete; will retry on next request"
                );
                global_metrics().record_gateway_error("create_invoice");
                return Err(err.into());
            }
        };

        match self
            .invoices
            .attach_provider(
                invoice.id,
                provider_invoice.provider_ref.clone(),
                provider_invoice.payment_url.clone(),
            )
            .await?
        {
            TransitionOutcome::Applied(inv) => {
                info!(
                    invoice_id = %inv.id,
                    provider_ref = %provider_invoice.provider_ref,
                    provider = %inv.provider,
                    "Invoice awaiting payment"
                );
                Ok(inv)
            }
            // A concurrent request already backfilled this row; the provider
            // de-duplicated on the idempotency key, so both calls saw the
            // same provider invoice.
            TransitionOutcome::Unchanged(inv) => Ok(inv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, MemoryCatalog};
    use crate::gateway::MockGateway;
    use crate::store::{GrantReason, MemoryEntitlementStore, MemoryInvoiceStore};

    struct Fixture {
        lifecycle: InvoiceLifecycle,
        invoices: Arc<MemoryInvoiceStore>,
        entitlements: Arc<MemoryEntitlementStore>,
        gateway: Arc<MockGateway>,
    }

    fn fixture() -> Fixture {
        let invoices = Arc::new(MemoryInvoiceStore::new());
        let entitlements = Arc::new(MemoryEntitlementStore::new());
        let gateway = Arc::new(MockGateway::new());
        let catalog = Arc::new(MemoryCatalog::with_items([CatalogItem {
            id: ItemId::new("course-1"),
            title: "Rust for Beginners".into(),
            price_minor: 10_000,
            currency: "USD".into(),
        }]));
        let lifecycle = InvoiceLifecycle::new(
            invoices.clone(),
            entitlements.clone(),
            catalog,
            gateway.clone(),
            Duration::hours(DEFAULT_INVOICE_TTL_HOURS),
        );
        Fixture {
            lifecycle,
            invoices,
            entitlements,
            gateway,
        }
    }

    fn buyer() -> BuyerId {
        BuyerId::new("buyer-1")
    }

    fn item() -> ItemId {
        ItemId::new("course-1")
    }

    #[tokio::test]
    async fn test_request_creates_awaiting_invoice() {
        let fx = fixture();
        let invoice = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap();

        assert_eq!(invoice.status, InvoiceStatus::AwaitingPayment);
        assert!(invoice.has_provider_data());
        assert_eq!(invoice.amount_minor, 10_000);
        assert_eq!(invoice.currency, "USD");
    }

    #[tokio::test]
    async fn test_rerequest_returns_same_invoice() {
        let fx = fixture();
        let first = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap();
        let second = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap();

        assert_eq!(first.id, second.id);
        // Only one provider-side creation happened
        assert_eq!(
            fx.gateway
                .create_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_entitled_buyer_rejected_before_gateway() {
        let fx = fixture();
        fx.entitlements
            .grant(
                buyer(),
                item(),
                crate::store::InvoiceId::generate(),
                GrantReason::AdminGrant,
            )
            .await
            .unwrap();

        let err = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyEntitled { .. }));
        assert_eq!(
            fx.gateway
                .create_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_unknown_item_rejected() {
        let fx = fixture();
        let err = fx
            .lifecycle
            .request_invoice(buyer(), ItemId::new("no-such-course"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownItem(_)));
    }

    #[tokio::test]
    async fn test_transient_create_failure_leaves_created_row() {
        let fx = fixture();
        fx.gateway
            .fail_next_create(GatewayError::Timeout(10_000));

        let err = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap_err();
        assert!(err.is_retryable());

        let open = fx.invoices.find_open(&buyer(), &item()).await.unwrap().unwrap();
        assert_eq!(open.status, InvoiceStatus::Created);
        assert!(!open.has_provider_data());
        let stuck_key = open.idempotency_key.clone();

        // Retry backfills the same row with the same idempotency key
        let invoice = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap();
        assert_eq!(invoice.id, open.id);
        assert_eq!(invoice.idempotency_key, stuck_key);
        assert_eq!(invoice.status, InvoiceStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_permanent_create_failure_fails_invoice() {
        let fx = fixture();
        fx.gateway
            .fail_next_create(GatewayError::permanent(422, "unsupported currency"));

        let err = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap_err();
        assert!(!err.is_retryable());

        // Row is terminal, so the next request starts a fresh invoice
        assert!(fx.invoices.find_open(&buyer(), &item()).await.unwrap().is_none());
        let fresh = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap();
        assert_eq!(fresh.status, InvoiceStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_replace_cancels_old_and_creates_new() {
        let fx = fixture();
        let old = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap();
        let new = fx.lifecycle.replace_invoice(buyer(), item()).await.unwrap();

        assert_ne!(old.id, new.id);
        assert_eq!(new.status, InvoiceStatus::AwaitingPayment);
        assert_eq!(
            fx.gateway.cancelled_refs(),
            vec![old.provider_ref.clone().unwrap()]
        );
        let old_row = fx.invoices.get(old.id).await.unwrap().unwrap();
        assert_eq!(old_row.status, InvoiceStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_replace_survives_provider_cancel_failure() {
        let fx = fixture();
        let old = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap();
        fx.gateway
            .fail_next_cancel(GatewayError::Transient("provider down".into()));

        // Local cancellation is authoritative
        let new = fx.lifecycle.replace_invoice(buyer(), item()).await.unwrap();
        assert_ne!(old.id, new.id);
        let old_row = fx.invoices.get(old.id).await.unwrap().unwrap();
        assert_eq!(old_row.status, InvoiceStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_expire_overdue_sweeps_only_past_horizon() {
        let fx = fixture();
        let invoice = fx.lifecycle.request_invoice(buyer(), item()).await.unwrap();

        // Nothing due yet
        assert_eq!(fx.lifecycle.expire_overdue().await.unwrap(), 0);

        // A second invoice whose window already closed
        let past = Invoice::new(NewInvoice {
            buyer: BuyerId::new("buyer-2"),
            item: item(),
            amount_minor: 10_000,
            currency: "USD".into(),
            provider: fx.gateway.kind(),
            expires_at: Utc::now() - Duration::minutes(1),
        });
        let past_id = past.id;
        fx.invoices.insert_if_absent(past).await.unwrap();
        fx.invoices
            .attach_provider(past_id, "PMOCK-X".into(), None)
            .await
            .unwrap();

        assert_eq!(fx.lifecycle.expire_overdue().await.unwrap(), 1);
        let swept = fx.invoices.get(past_id).await.unwrap().unwrap();
        assert_eq!(swept.status, InvoiceStatus::Expired);

        // The fresh invoice is untouched
        let fresh = fx.invoices.get(invoice.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, InvoiceStatus::AwaitingPayment);
    }
}
