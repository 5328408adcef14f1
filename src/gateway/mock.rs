//! Programmable in-process gateway
//!
//! Used by the test suite and by local runs without provider credentials.
//! Tests script failures per operation (each scripted failure is consumed
//! by one call, so "fail twice then succeed" exercises the retry path) and
//! flip invoices to paid with [`MockGateway::mark_paid`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::error::GatewayError;
use crate::gateway::{
    CreateInvoiceRequest, PaymentCheck, PaymentGateway, ProviderInvoice, ProviderKind,
};

#[derive(Default)]
struct MockState {
    /// Paid-status the provider would report, by provider ref
    checks: HashMap<String, PaymentCheck>,
    /// Refs cancelled at the provider
    cancelled: Vec<String>,
    /// Failures to inject, consumed one per call
    create_failures: Vec<GatewayError>,
    check_failures: Vec<GatewayError>,
    cancel_failures: Vec<GatewayError>,
}

/// In-memory [`PaymentGateway`] with scriptable behavior and call counters
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
    next_ref: AtomicU32,
    /// Calls to `create_invoice`, including failed ones
    pub create_calls: AtomicU32,
    /// Calls to `check_paid`, including failed ones
    pub check_calls: AtomicU32,
    /// Calls to `cancel_invoice`, including failed ones
    pub cancel_calls: AtomicU32,
}

impl MockGateway {
    /// A gateway where every created invoice starts unpaid
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `create_invoice` call to fail
    pub fn fail_next_create(&self, err: GatewayError) {
        self.state.lock().create_failures.push(err);
    }

    /// Script the next `check_paid` call to fail
    pub fn fail_next_check(&self, err: GatewayError) {
        self.state.lock().check_failures.push(err);
    }

    /// Script the next `cancel_invoice` call to fail
    pub fn fail_next_cancel(&self, err: GatewayError) {
        self.state.lock().cancel_failures.push(err);
    }

    /// Make the provider report the invoice as fully paid
    pub fn mark_paid(&self, provider_ref: &str, amount_minor: i64, payment_id: &str) {
        self.state.lock().checks.insert(
            provider_ref.to_string(),
            PaymentCheck::paid(amount_minor, payment_id),
        );
    }

    /// Make the provider report a partial payment
    pub fn mark_partially_paid(&self, provider_ref: &str, amount_minor: i64, payment_id: &str) {
        self.state.lock().checks.insert(
            provider_ref.to_string(),
            PaymentCheck {
                paid: true,
                paid_amount_minor: Some(amount_minor),
                provider_payment_id: Some(payment_id.to_string()),
            },
        );
    }

    /// Refs cancelled at the provider so far
    pub fn cancelled_refs(&self) -> Vec<String> {
        self.state.lock().cancelled.clone()
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn create_invoice(
        &self,
        _request: &CreateInvoiceRequest,
    ) -> Result<ProviderInvoice, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(err) = state.create_failures.pop() {
            return Err(err);
        }
        let n = self.next_ref.fetch_add(1, Ordering::SeqCst) + 1;
        let provider_ref = format!("PMOCK-{n}");
        state
            .checks
            .insert(provider_ref.clone(), PaymentCheck::unpaid());
        Ok(ProviderInvoice {
            payment_url: Some(format!("https://pay.mock.test/{provider_ref}")),
            expires_at: None,
            provider_ref,
        })
    }

    async fn cancel_invoice(&self, provider_ref: &str) -> Result<(), GatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(err) = state.cancel_failures.pop() {
            return Err(err);
        }
        state.cancelled.push(provider_ref.to_string());
        Ok(())
    }

    async fn check_paid(&self, provider_ref: &str) -> Result<PaymentCheck, GatewayError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(err) = state.check_failures.pop() {
            return Err(err);
        }
        Ok(state
            .checks
            .get(provider_ref)
            .cloned()
            .unwrap_or_else(PaymentCheck::unpaid))
    }
}
