//! Invoice lifecycle integration tests
//!
//! Creation idempotency under concurrency, provider-failure recovery,
//! supersession, and the expiry sweep, all through the public API.

use std::sync::Arc;

use chrono::Duration;

use coursepay::catalog::{CatalogItem, MemoryCatalog};
use coursepay::gateway::MockGateway;
use coursepay::lifecycle::InvoiceLifecycle;
use coursepay::store::{
    BuyerId, InvoiceStatus, InvoiceStore, ItemId, MemoryEntitlementStore, MemoryInvoiceStore,
};
use coursepay::GatewayError;

struct Harness {
    lifecycle: Arc<InvoiceLifecycle>,
    invoices: Arc<MemoryInvoiceStore>,
    gateway: Arc<MockGateway>,
}

fn harness() -> Harness {
    let invoices = Arc::new(MemoryInvoiceStore::new());
    let entitlements = Arc::new(MemoryEntitlementStore::new());
    let gateway = Arc::new(MockGateway::new());
    let catalog = Arc::new(MemoryCatalog::with_items([
        CatalogItem {
            id: ItemId::new("course-1"),
            title: "Rust for Beginners".into(),
            price_minor: 10_000,
            currency: "USD".into(),
        },
        CatalogItem {
            id: ItemId::new("course-2"),
            title: "Async Rust in Practice".into(),
            price_minor: 15_000,
            currency: "USD".into(),
        },
    ]));
    Harness {
        lifecycle: Arc::new(InvoiceLifecycle::new(
            invoices.clone(),
            entitlements,
            catalog,
            gateway.clone(),
            Duration::hours(24),
        )),
        invoices,
        gateway,
    }
}

fn buyer() -> BuyerId {
    BuyerId::new("buyer-1")
}

fn item() -> ItemId {
    ItemId::new("course-1")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_requests_produce_one_invoice() {
    let h = harness();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let lifecycle = h.lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle.request_invoice(buyer(), item()).await
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let invoice = handle.await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::AwaitingPayment);
        ids.insert(invoice.id);
    }

    // Every caller converged on the same invoice
    assert_eq!(ids.len(), 1);

    // And the store holds exactly one open invoice for the pair
    let open = h.invoices.find_open(&buyer(), &item()).await.unwrap().unwrap();
    assert!(ids.contains(&open.id));
    let all = h.invoices.list_for_buyer(&buyer()).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn distinct_items_get_distinct_invoices() {
    let h = harness();
    let a = h
        .lifecycle
        .request_invoice(buyer(), ItemId::new("course-1"))
        .await
        .unwrap();
    let b = h
        .lifecycle
        .request_invoice(buyer(), ItemId::new("course-2"))
        .await
        .unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(a.amount_minor, 10_000);
    assert_eq!(b.amount_minor, 15_000);
}

#[tokio::test]
async fn checkout_reload_reuses_invoice_and_payment_link() {
    let h = harness();
    let first = h.lifecycle.request_invoice(buyer(), item()).await.unwrap();
    let second = h.lifecycle.request_invoice(buyer(), item()).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.payment_url, second.payment_url);
    assert_eq!(
        h.gateway
            .create_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn creation_timeout_recovers_without_duplicates() {
    let h = harness();
    h.gateway.fail_next_create(GatewayError::Timeout(10_000));

    // First attempt: provider outcome unknown, row parked in Created
    let err = h.lifecycle.request_invoice(buyer(), item()).await.unwrap_err();
    assert!(err.is_retryable());
    let parked = h.invoices.find_open(&buyer(), &item()).await.unwrap().unwrap();
    assert_eq!(parked.status, InvoiceStatus::Created);

    // Retry completes provider creation on the same row
    let invoice = h.lifecycle.request_invoice(buyer(), item()).await.unwrap();
    assert_eq!(invoice.id, parked.id);
    assert_eq!(invoice.status, InvoiceStatus::AwaitingPayment);
    assert!(invoice.payment_url.is_some());

    let all = h.invoices.list_for_buyer(&buyer()).await.unwrap();
    assert_eq!(all.len(), 1, "retry must not mint a second invoice");
}

#[tokio::test]
async fn permanent_rejection_fails_invoice_and_allows_retry() {
    let h = harness();
    h.gateway
        .fail_next_create(GatewayError::permanent(422, "unsupported currency"));

    let err = h.lifecycle.request_invoice(buyer(), item()).await.unwrap_err();
    assert!(!err.is_retryable());

    let all = h.invoices.list_for_buyer(&buyer()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, InvoiceStatus::Failed);

    // The failed row is terminal, so a new purchase attempt starts clean
    let invoice = h.lifecycle.request_invoice(buyer(), item()).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::AwaitingPayment);
    assert_ne!(invoice.id, all[0].id);
}

#[tokio::test]
async fn replace_supersedes_open_invoice() {
    let h = harness();
    let old = h.lifecycle.request_invoice(buyer(), item()).await.unwrap();
    let new = h.lifecycle.replace_invoice(buyer(), item()).await.unwrap();

    assert_ne!(old.id, new.id);
    let old_row = h.invoices.get(old.id).await.unwrap().unwrap();
    assert_eq!(old_row.status, InvoiceStatus::Cancelled);
    assert_eq!(
        h.gateway.cancelled_refs(),
        vec![old.provider_ref.clone().unwrap()]
    );

    // The audit trail on the superseded invoice shows the cancellation
    let last = old_row.history.last().unwrap();
    assert_eq!(last.to, InvoiceStatus::Cancelled);
}

#[tokio::test]
async fn expiry_sweep_closes_overdue_invoices() {
    let invoices = Arc::new(MemoryInvoiceStore::new());
    let entitlements = Arc::new(MemoryEntitlementStore::new());
    let gateway = Arc::new(MockGateway::new());
    let catalog = Arc::new(MemoryCatalog::with_items([CatalogItem {
        id: ItemId::new("course-1"),
        title: "Rust for Beginners".into(),
        price_minor: 10_000,
        currency: "USD".into(),
    }]));
    // Zero-length payment window: everything is overdue immediately
    let lifecycle = InvoiceLifecycle::new(
        invoices.clone(),
        entitlements,
        catalog,
        gateway,
        Duration::zero(),
    );

    let invoice = lifecycle.request_invoice(buyer(), item()).await.unwrap();
    assert_eq!(lifecycle.expire_overdue().await.unwrap(), 1);

    let row = invoices.get(invoice.id).await.unwrap().unwrap();
    assert_eq!(row.status, InvoiceStatus::Expired);

    // Second sweep finds nothing
    assert_eq!(lifecycle.expire_overdue().await.unwrap(), 0);
}
