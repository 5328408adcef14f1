//! HTTP API for the payment core
//!
//! Three business routes, mapped 1:1 onto core operations:
//!
//! - `POST /invoices` → [`InvoiceLifecycle::request_invoice`]
//! - `POST /webhooks/payment` → [`ReconcileEngine::reconcile`] (webhook)
//! - `GET /invoices/{id}/status` → [`ReconcileEngine::reconcile`] (poll)
//!
//! The route layer holds no business logic. Two mapping rules matter:
//!
//! - The webhook handler acknowledges with 2xx even when reconciliation
//!   fails for business reasons, after logging: a 5xx would put the
//!   provider's delivery into endless retry and eventually disable the
//!   endpoint. Only infrastructure failure may 5xx.
//! - The poll handler swallows transient gateway trouble and reports the
//!   stored status instead; provider outages are invisible to the buyer.
//!
//! Buyer identity arrives in the `x-buyer-id` header, placed there by the
//! auth collaborator upstream. The amount is never read from the request;
//! pricing is the catalog's.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, warn};

use crate::cors::{cors_layer, BUYER_ID_HEADER};
use crate::error::Error;
use crate::handlers::status::{health_handler, readiness_handler, RuntimeStats};
use crate::lifecycle::InvoiceLifecycle;
use crate::metrics::global_metrics;
use crate::reconcile::{ReconcileEngine, ReconcileSource};
use crate::store::{BuyerId, EntitlementStore, Invoice, InvoiceId, InvoiceStore, ItemId};

/// Shared application state for the API router
pub struct AppState {
    /// Invoice creation / supersession / expiry
    pub lifecycle: InvoiceLifecycle,
    /// Payment reconciliation
    pub engine: ReconcileEngine,
    /// Invoice reads for fallback status reporting
    pub invoices: Arc<dyn InvoiceStore>,
    /// Entitlement reads for status responses
    pub entitlements: Arc<dyn EntitlementStore>,
    /// Uptime and latency tracking for `/status`
    pub stats: RuntimeStats,
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Body of `POST /invoices`
#[derive(Debug, Deserialize)]
pub struct CreateInvoiceBody {
    /// Catalog item to purchase
    pub item_id: String,
    /// Cancel any open invoice for this pair and issue a fresh one
    #[serde(default)]
    pub replace: bool,
}

/// Invoice as shown to buyers
#[derive(Debug, Serialize)]
pub struct InvoiceView {
    /// Internal invoice id, used for status polling
    pub id: InvoiceId,
    /// Purchased item
    pub item_id: ItemId,
    /// Amount due in minor units
    pub amount_minor: i64,
    /// ISO currency code
    pub currency: String,
    /// Current status
    pub status: String,
    /// Payment link for the buyer, when the provider side exists
    pub payment_url: Option<String>,
    /// End of the payment window
    pub expires_at: DateTime<Utc>,
    /// When the invoice was created
    pub created_at: DateTime<Utc>,
}

impl From<&Invoice> for InvoiceView {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.id,
            item_id: invoice.item.clone(),
            amount_minor: invoice.amount_minor,
            currency: invoice.currency.clone(),
            status: invoice.status.as_str().to_string(),
            payment_url: invoice.payment_url.clone(),
            expires_at: invoice.expires_at,
            created_at: invoice.created_at,
        }
    }
}

/// Body of `POST /webhooks/payment`.
///
/// Correlation is by the provider-assigned invoice reference; the rest of
/// the payload is never trusted as proof of payment.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// Provider's invoice reference
    pub provider_ref: String,
    /// Provider's event name, logged only
    #[serde(default)]
    pub event: Option<String>,
}

/// Acknowledgement returned to the provider
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always true; the provider only needs a 2xx
    pub received: bool,
}

/// Response of `GET /invoices/{id}/status`
#[derive(Debug, Serialize)]
pub struct InvoiceStatusView {
    /// Invoice id
    pub id: InvoiceId,
    /// Status after this poll's reconciliation pass
    pub status: String,
    /// Whether the invoice is paid
    pub paid: bool,
    /// Whether the buyer's entitlement is in place (checked when paid)
    pub entitlement_active: bool,
    /// Payment link, while payment is still possible
    pub payment_url: Option<String>,
    /// End of the payment window
    pub expires_at: DateTime<Utc>,
}

/// Error body for buyer-facing failures
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable error
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn buyer_from_headers(headers: &HeaderMap) -> Option<BuyerId> {
    headers
        .get(BUYER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(BuyerId::new)
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// `POST /invoices`: issue (or re-issue) the invoice for the caller and
/// the requested item.
#[instrument(skip_all)]
pub async fn create_invoice_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateInvoiceBody>,
) -> Response {
    let Some(buyer) = buyer_from_headers(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing buyer identity");
    };
    let item = ItemId::new(body.item_id);

    let result = if body.replace {
        state.lifecycle.replace_invoice(buyer, item).await
    } else {
        state.lifecycle.request_invoice(buyer, item).await
    };

    match result {
        Ok(invoice) => (StatusCode::CREATED, Json(InvoiceView::from(&invoice))).into_response(),
        Err(Error::AlreadyEntitled { item, .. }) => error_response(
            StatusCode::CONFLICT,
            format!("already entitled to {item}"),
        ),
        Err(Error::UnknownItem(item)) => {
            error_response(StatusCode::NOT_FOUND, format!("unknown item {item}"))
        }
        Err(err) if err.is_retryable() => {
            warn!(error = %err, "Invoice creation hit transient provider trouble");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "payment provider unavailable, try again",
            )
        }
        Err(err) => {
            error!(error = %err, "Invoice creation failed");
            error_response(StatusCode::BAD_GATEWAY, "payment provider rejected the request")
        }
    }
}

/// `POST /webhooks/payment`: provider notification that something changed.
///
/// Returns 2xx regardless of business outcome; the payload only tells the
/// engine to go verify with the provider.
#[instrument(skip_all, fields(provider_ref = %body.provider_ref))]
pub async fn payment_webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PaymentWebhook>,
) -> Response {
    global_metrics().record_webhook_received();

    let invoice = match state.engine.invoice_by_provider_ref(&body.provider_ref).await {
        Ok(invoice) => invoice,
        Err(err) => {
            // Unknown or long-gone reference; acknowledge so the provider
            // stops retrying a delivery we can never use.
            warn!(
                event = body.event.as_deref().unwrap_or("-"),
                error = %err,
                "Webhook for unknown provider reference"
            );
            return (StatusCode::OK, Json(WebhookAck { received: true })).into_response();
        }
    };

    let started = Instant::now();
    match state
        .engine
        .reconcile(invoice.id, ReconcileSource::Webhook)
        .await
    {
        Ok(outcome) => {
            state.stats.reconcile_latency.record_duration(started.elapsed());
            tracing::debug!(
                invoice_id = %invoice.id,
                outcome = outcome.as_str(),
                "Webhook reconciled"
            );
        }
        Err(err) => {
            // Business failure: log and acknowledge. The provider retries
            // webhooks on 5xx and disables endpoints that keep failing.
            error!(invoice_id = %invoice.id, error = %err, "Webhook reconciliation failed");
        }
    }
    (StatusCode::OK, Json(WebhookAck { received: true })).into_response()
}

/// `GET /invoices/{id}/status`: buyer-initiated reconciliation and status
/// report.
#[instrument(skip_all, fields(invoice_id = %id))]
pub async fn invoice_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(invoice_id) = id.parse::<InvoiceId>() else {
        return error_response(StatusCode::NOT_FOUND, "no such invoice");
    };

    let started = Instant::now();
    let outcome = state
        .engine
        .reconcile(invoice_id, ReconcileSource::Poll)
        .await;
    state.stats.reconcile_latency.record_duration(started.elapsed());

    let invoice = match outcome {
        Ok(outcome) => outcome.invoice().clone(),
        Err(Error::InvoiceNotFound(_)) => {
            return error_response(StatusCode::NOT_FOUND, "no such invoice");
        }
        Err(err) => {
            // Provider trouble during a poll is invisible to the buyer: the
            // stored status stands and the UI polls again later.
            warn!(invoice_id = %invoice_id, error = %err, "Poll reconciliation degraded");
            match state.invoices.get(invoice_id).await {
                Ok(Some(invoice)) => invoice,
                _ => return error_response(StatusCode::NOT_FOUND, "no such invoice"),
            }
        }
    };

    let paid = invoice.status == crate::store::InvoiceStatus::Paid;
    let entitlement_active = if paid {
        state
            .entitlements
            .is_active(&invoice.buyer, &invoice.item)
            .await
            .unwrap_or(false)
    } else {
        false
    };

    (
        StatusCode::OK,
        Json(InvoiceStatusView {
            id: invoice.id,
            status: invoice.status.as_str().to_string(),
            paid,
            entitlement_active,
            payment_url: if invoice.status.is_open() {
                invoice.payment_url.clone()
            } else {
                None
            },
            expires_at: invoice.expires_at,
        }),
    )
        .into_response()
}

/// `GET /status`: detailed runtime status
#[instrument(skip_all)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.stats.status_response())).into_response()
}

/// `GET /metrics`: Prometheus text format
pub async fn metrics_handler() -> Response {
    (StatusCode::OK, global_metrics().to_prometheus_format()).into_response()
}

// ============================================================================
// Router Setup
// ============================================================================

/// Build the full API router.
///
/// # Routes
/// - `POST /invoices` - create or re-request an invoice
/// - `GET /invoices/{id}/status` - poll-driven reconciliation
/// - `POST /webhooks/payment` - provider webhook entry point
/// - `GET /health`, `GET /ready`, `GET /status`, `GET /metrics` - probes
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/invoices", post(create_invoice_handler))
        .route("/invoices/:id/status", get(invoice_status_handler))
        .route("/webhooks/payment", post(payment_webhook_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors_layer())
        .with_state(state)
}
