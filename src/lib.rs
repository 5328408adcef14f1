//! CoursePay - Invoice Lifecycle & Entitlement-Granting Engine
//!
//! The payment core of an online-course marketplace: creates provider
//! invoices, reconciles their paid status from two independent triggers
//! (provider webhook and buyer poll), and grants purchased entitlements
//! exactly once, under duplicate notifications, out-of-order delivery,
//! concurrent writers, and provider failures.
//!
//! # Architecture
//!
//! ```text
//! Checkout ──▶ InvoiceLifecycle ──▶ PaymentGateway ──▶ Provider
//!                    │                    ▲
//!                    ▼                    │ verified check_paid
//!              InvoiceStore ◀── ReconcileEngine ◀── webhook / poll
//!                                    │
//!                                    ▼ (transition winner only)
//!                             EntitlementStore
//! ```
//!
//! The single concurrency-control primitive is the store's conditional
//! status update: "set Paid where status = AwaitingPayment". Exactly one
//! concurrent reconciler wins it; everyone else observes the Paid state and
//! reports success. No lock is held across a provider call.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::Duration;
//! use coursepay::catalog::{CatalogItem, MemoryCatalog};
//! use coursepay::gateway::MockGateway;
//! use coursepay::lifecycle::InvoiceLifecycle;
//! use coursepay::reconcile::{ReconcileEngine, ReconcileSource};
//! use coursepay::store::{BuyerId, ItemId, MemoryEntitlementStore, MemoryInvoiceStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let invoices = Arc::new(MemoryInvoiceStore::new());
//!     let entitlements = Arc::new(MemoryEntitlementStore::new());
//!     let gateway = Arc::new(MockGateway::new());
//!     let catalog = Arc::new(MemoryCatalog::with_items([CatalogItem {
//!         id: ItemId::new("course-rust-101"),
//!         title: "Rust for Beginners".into(),
//!         price_minor: 10_000,
//!         currency: "USD".into(),
//!     }]));
//!
//!     let lifecycle = InvoiceLifecycle::new(
//!         invoices.clone(),
//!         entitlements.clone(),
//!         catalog,
//!         gateway.clone(),
//!         Duration::hours(24),
//!     );
//!     let engine = ReconcileEngine::new(invoices, entitlements, gateway);
//!
//!     let invoice = lifecycle
//!         .request_invoice(BuyerId::new("buyer-1"), ItemId::new("course-rust-101"))
//!         .await?;
//!     let outcome = engine.reconcile(invoice.id, ReconcileSource::Poll).await?;
//!     println!("invoice {} is {}", invoice.id, outcome.as_str());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod catalog;
pub mod config;
pub mod cors;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod reconcile;
pub mod store;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, GatewayError, Result, StoreError};
pub use gateway::{PaymentGateway, ProviderKind};
pub use lifecycle::InvoiceLifecycle;
pub use reconcile::{ReconcileEngine, ReconcileOutcome, ReconcileSource};
pub use store::{
    BuyerId, Entitlement, EntitlementStore, GrantReason, Invoice, InvoiceId, InvoiceStatus,
    InvoiceStore, ItemId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
