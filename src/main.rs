//! CoursePay server
//!
//! Serves the payment API and runs the background expiry sweep.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use coursepay::catalog::{Catalog, CatalogItem, MemoryCatalog};
use coursepay::config::Config;
use coursepay::gateway::{HttpGateway, MockGateway, PaymentGateway};
use coursepay::handlers::{api_router, AppState, RuntimeStats};
use coursepay::lifecycle::InvoiceLifecycle;
use coursepay::reconcile::ReconcileEngine;
use coursepay::store::{ItemId, MemoryEntitlementStore, MemoryInvoiceStore};

/// CoursePay payment server
#[derive(Parser, Debug)]
#[command(name = "coursepayd")]
#[command(author = "CoursePay Team <team@coursepay.dev>")]
#[command(version)]
#[command(about = "Invoice lifecycle and entitlement-granting engine")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8302")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env().context("loading configuration")?;

    let gateway: Arc<dyn PaymentGateway> = match &config.provider_url {
        Some(url) => {
            tracing::info!(provider_url = %url, "Using paylink provider gateway");
            Arc::new(
                HttpGateway::new(
                    url.clone(),
                    config.provider_token.clone(),
                    config.request_timeout,
                    config.retry_policy(),
                )
                .context("building provider gateway")?,
            )
        }
        None => {
            tracing::warn!("No provider configured; using in-process mock gateway");
            Arc::new(MockGateway::new())
        }
    };

    let invoices = Arc::new(MemoryInvoiceStore::new());
    let entitlements = Arc::new(MemoryEntitlementStore::new());
    let catalog: Arc<dyn Catalog> = Arc::new(demo_catalog());

    let lifecycle = InvoiceLifecycle::new(
        invoices.clone(),
        entitlements.clone(),
        catalog,
        gateway.clone(),
        config.invoice_ttl,
    );
    let engine = ReconcileEngine::new(invoices.clone(), entitlements.clone(), gateway);

    let state = Arc::new(AppState {
        lifecycle,
        engine,
        invoices: invoices.clone(),
        entitlements,
        stats: RuntimeStats::new(),
    });

    // Background expiry sweep; the store-level guarded transition keeps it
    // safe next to live reconciliation.
    let sweep_state = state.clone();
    let sweep_interval = config.expiry_sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweep_state.lifecycle.expire_overdue().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(expired = n, "Expiry sweep completed"),
                Err(err) => tracing::error!(error = %err, "Expiry sweep failed"),
            }
        }
    });

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!(
        version = coursepay::VERSION,
        addr = %addr,
        "CoursePay server starting"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, api_router(state))
        .await
        .context("serving API")?;

    Ok(())
}

/// Items served when the catalog collaborator is not wired up (local runs).
fn demo_catalog() -> MemoryCatalog {
    MemoryCatalog::with_items([
        CatalogItem {
            id: ItemId::new("course-rust-101"),
            title: "Rust for Beginners".into(),
            price_minor: 10_000,
            currency: "USD".into(),
        },
        CatalogItem {
            id: ItemId::new("course-async-201"),
            title: "Async Rust in Practice".into(),
            price_minor: 15_000,
            currency: "USD".into(),
        },
    ])
}
