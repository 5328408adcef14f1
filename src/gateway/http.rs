//! HTTP gateway for the hosted payment-link provider
//!
//! Speaks the provider's JSON REST API over `reqwest` with bearer auth and
//! bounded per-request timeouts. Classification of failures:
//!
//! - connect/network errors → [`GatewayError::Transient`]
//! - request deadline exceeded → [`GatewayError::Timeout`]
//! - 5xx / 429 → [`GatewayError::Transient`]
//! - other 4xx → [`GatewayError::Permanent`]
//!
//! `check_paid` and `cancel_invoice` run under the retry policy;
//! `create_invoice` is issued exactly once per call, with the caller's
//! idempotency key forwarded so the provider can de-duplicate a re-request.

use std::time::Duration;

use serde::Deserialize;

use crate::error::GatewayError;
use crate::gateway::retry::RetryPolicy;
use crate::gateway::{
    CreateInvoiceRequest, PaymentCheck, PaymentGateway, ProviderInvoice, ProviderKind,
};

/// Default per-request deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway client for the paylink provider
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    request_timeout: Duration,
    retry: RetryPolicy,
}

/// Provider wire format: invoice creation response
#[derive(Debug, Deserialize)]
struct WireInvoice {
    #[serde(rename = "ref")]
    provider_ref: String,
    payment_url: Option<String>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Provider wire format: invoice status response
#[derive(Debug, Deserialize)]
struct WireStatus {
    paid: bool,
    paid_amount_minor: Option<i64>,
    payment_id: Option<String>,
}

impl HttpGateway {
    /// Build a gateway client for the given provider endpoint
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::Transient(format!("client init: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            request_timeout,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_request_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            GatewayError::Transient(err.to_string())
        }
    }

    async fn read_failure(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        classify_status(status, body)
    }
}

/// Map a non-success provider status code to a gateway error
fn classify_status(status: u16, body: String) -> GatewayError {
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        body
    };
    if status >= 500 || status == 429 {
        GatewayError::Transient(format!("HTTP {status}: {message}"))
    } else {
        GatewayError::Permanent {
            status: Some(status),
            message,
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for HttpGateway {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paylink
    }

    async fn create_invoice(
        &self,
        request: &CreateInvoiceRequest,
    ) -> Result<ProviderInvoice, GatewayError> {
        let response = self
            .client
            .post(self.url("/v1/invoices"))
            .bearer_auth(&self.api_token)
            .header("idempotency-key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }
        let wire: WireInvoice = response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("malformed create response: {e}")))?;
        Ok(ProviderInvoice {
            provider_ref: wire.provider_ref,
            payment_url: wire.payment_url,
            expires_at: wire.expires_at,
        })
    }

    async fn cancel_invoice(&self, provider_ref: &str) -> Result<(), GatewayError> {
        let path = format!("/v1/invoices/{provider_ref}/cancel");
        self.retry
            .run("cancel_invoice", || async {
                let response = self
                    .client
                    .post(self.url(&path))
                    .bearer_auth(&self.api_token)
                    .send()
                    .await
                    .map_err(|e| self.map_request_error(e))?;
                // Already-gone and already-terminal both mean the provider
                // will not honor the invoice; that is what cancel wants.
                let status = response.status();
                if status.is_success() || matches!(status.as_u16(), 404 | 409) {
                    Ok(())
                } else {
                    Err(Self::read_failure(response).await)
                }
            })
            .await
    }

    async fn check_paid(&self, provider_ref: &str) -> Result<PaymentCheck, GatewayError> {
        let path = format!("/v1/invoices/{provider_ref}");
        self.retry
            .run("check_paid", || async {
                let response = self
                    .client
                    .get(self.url(&path))
                    .bearer_auth(&self.api_token)
                    .send()
                    .await
                    .map_err(|e| self.map_request_error(e))?;
                if !response.status().is_success() {
                    return Err(Self::read_failure(response).await);
                }
                let wire: WireStatus = response.json().await.map_err(|e| {
                    GatewayError::Transient(format!("malformed status response: {e}"))
                })?;
                Ok(PaymentCheck {
                    paid: wire.paid,
                    paid_amount_minor: wire.paid_amount_minor,
                    provider_payment_id: wire.payment_id,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(503, String::new()),
            GatewayError::Transient(_)
        ));
        assert!(matches!(
            classify_status(429, "slow down".into()),
            GatewayError::Transient(_)
        ));
        match classify_status(422, "unsupported currency".into()) {
            GatewayError::Permanent { status, message } => {
                assert_eq!(status, Some(422));
                assert_eq!(message, "unsupported currency");
            }
            other => panic!("expected Permanent, got {other:?}"),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = HttpGateway::new(
            "https://api.paylink.test/",
            "token",
            DEFAULT_REQUEST_TIMEOUT,
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(
            gateway.url("/v1/invoices"),
            "https://api.paylink.test/v1/invoices"
        );
    }

    #[test]
    fn test_wire_invoice_deserializes() {
        let json = r#"{
            "ref": "PL-8841",
            "payment_url": "https://pay.paylink.test/PL-8841",
            "expires_at": "2026-08-07T12:00:00Z"
        }"#;
        let wire: WireInvoice = serde_json::from_str(json).unwrap();
        assert_eq!(wire.provider_ref, "PL-8841");
        assert!(wire.payment_url.is_some());
        assert!(wire.expires_at.is_some());
    }

    #[test]
    fn test_wire_status_deserializes_unpaid() {
        let json = r#"{"paid": false, "paid_amount_minor": null, "payment_id": null}"#;
        let wire: WireStatus = serde_json::from_str(json).unwrap();
        assert!(!wire.paid);
        assert!(wire.paid_amount_minor.is_none());
    }
}
