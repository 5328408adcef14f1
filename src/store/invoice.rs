//! Invoice records and the invoice store
//!
//! An [`Invoice`] tracks one payment request from local creation through the
//! provider round-trip to a terminal state. Rows are never deleted; every
//! status change is appended to the row's [`StatusChange`] history.
//!
//! # Status machine
//!
//! ```text
//! Created ──(provider create ok)──▶ AwaitingPayment ──(verified paid)──▶ Paid
//!    │                                    │
//!    │                                    ├──(expiry horizon)──▶ Expired
//!    ├──(create permanently fails)─▶ Failed
//!    └──(superseded)──▶ Cancelled ◀──(superseded/cancelled)──┘
//! ```
//!
//! `Paid` is absorbing. All other transitions are rejected by
//! [`InvoiceStatus::can_transition_to`], and the store applies transitions
//! only through conditional updates on the expected prior status, so a
//! rejected transition is observable but never destructive.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::gateway::ProviderKind;
use crate::store::{BuyerId, ItemId};

/// Internal invoice identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(Uuid);

impl InvoiceId {
    /// Mint a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InvoiceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Local row exists, provider-side invoice not yet confirmed created
    Created,
    /// Provider invoice issued; waiting for the buyer to pay
    AwaitingPayment,
    /// Payment verified against the provider; entitlement granted
    Paid,
    /// Expiry horizon passed without payment
    Expired,
    /// Superseded or explicitly cancelled
    Cancelled,
    /// Provider permanently rejected creation
    Failed,
}

impl InvoiceStatus {
    /// String form used in logs and API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Expired | Self::Cancelled | Self::Failed
        )
    }

    /// An open invoice blocks creation of another for the same buyer+item
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Created | Self::AwaitingPayment)
    }

    /// The fixed partial order of permitted transitions.
    ///
    /// `Paid` is absorbing; no transition leaves it.
    pub fn can_transition_to(&self, to: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, to),
            (Created, AwaitingPayment)
                | (Created, Failed)
                | (Created, Cancelled)
                | (AwaitingPayment, Paid)
                | (AwaitingPayment, Expired)
                | (AwaitingPayment, Cancelled)
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in an invoice's transition audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status before the transition
    pub from: InvoiceStatus,
    /// Status after the transition
    pub to: InvoiceStatus,
    /// When the transition was applied
    pub at: DateTime<Utc>,
}

/// Parameters for a new local invoice row.
///
/// The provider is selected here, once, and carried on the record for the
/// rest of the invoice's life.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    /// Buyer the invoice is issued to
    pub buyer: BuyerId,
    /// Item being purchased
    pub item: ItemId,
    /// Amount in minor currency units
    pub amount_minor: i64,
    /// ISO currency code
    pub currency: String,
    /// Provider that will carry this invoice
    pub provider: ProviderKind,
    /// Expiry horizon for the payment window
    pub expires_at: DateTime<Utc>,
}

/// A payment request for one buyer/item pair, tracked locally and at the
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Internal identifier
    pub id: InvoiceId,
    /// Buyer the invoice is issued to
    pub buyer: BuyerId,
    /// Item being purchased
    pub item: ItemId,
    /// Amount due in minor currency units
    pub amount_minor: i64,
    /// ISO currency code
    pub currency: String,
    /// Provider carrying this invoice
    pub provider: ProviderKind,
    /// Provider-assigned reference, present once provider creation succeeded
    pub provider_ref: Option<String>,
    /// Payment link / QR payload handed to the buyer
    pub payment_url: Option<String>,
    /// Provider's payment identifier, recorded when the invoice is paid
    pub provider_payment_id: Option<String>,
    /// Amount the provider reports as paid, in minor units
    pub paid_amount_minor: Option<i64>,
    /// Current status
    pub status: InvoiceStatus,
    /// Key making provider-side creation safe to retry
    pub idempotency_key: String,
    /// When the local row was created
    pub created_at: DateTime<Utc>,
    /// End of the payment window
    pub expires_at: DateTime<Utc>,
    /// When reconciliation last evaluated this invoice
    pub last_reconciled_at: Option<DateTime<Utc>>,
    /// Timestamped transition history, append-only
    pub history: Vec<StatusChange>,
}

impl Invoice {
    /// Build a fresh `Created` row. The invoice id doubles as the attempt
    /// nonce in the idempotency key, so a superseding invoice for the same
    /// buyer+item gets a distinct key.
    pub fn new(params: NewInvoice) -> Self {
        let id = InvoiceId::generate();
        let idempotency_key = format!(
            "{}:{}:{}",
            params.buyer,
            params.item,
            id.as_uuid().simple()
        );
        Self {
            id,
            buyer: params.buyer,
            item: params.item,
            amount_minor: params.amount_minor,
            currency: params.currency,
            provider: params.provider,
            provider_ref: None,
            payment_url: None,
            provider_payment_id: None,
            paid_amount_minor: None,
            status: InvoiceStatus::Created,
            idempotency_key,
            created_at: Utc::now(),
            expires_at: params.expires_at,
            last_reconciled_at: None,
            history: Vec::new(),
        }
    }

    /// Whether the provider-side invoice exists and the buyer has payment
    /// data to act on
    pub fn has_provider_data(&self) -> bool {
        self.provider_ref.is_some()
    }

    /// Whether the payment window has closed
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn record_transition(&mut self, to: InvoiceStatus, at: DateTime<Utc>) {
        self.history.push(StatusChange {
            from: self.status,
            to,
            at,
        });
        self.status = to;
    }
}

/// Outcome of [`InvoiceStore::insert_if_absent`]
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// No open invoice existed; the new row was stored
    Inserted(Invoice),
    /// An open invoice for the same buyer+item already exists; the new row
    /// was discarded and the existing one returned
    Existing(Invoice),
}

/// Outcome of a guarded status transition
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The expected prior status matched; the transition was applied
    Applied(Invoice),
    /// The row was not in the expected status; nothing was changed.
    /// Carries the current row so the caller can decide what the miss means.
    Unchanged(Invoice),
}

impl TransitionOutcome {
    /// The invoice as it stands after the call, applied or not
    pub fn invoice(&self) -> &Invoice {
        match self {
            Self::Applied(inv) | Self::Unchanged(inv) => inv,
        }
    }
}

/// Outcome of the paid-confirmation conditional update
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// This caller won the race: status moved AwaitingPayment → Paid
    Won(Invoice),
    /// The invoice was already Paid; a concurrent caller won earlier.
    /// Callers treat this as success.
    AlreadyPaid(Invoice),
    /// The invoice is not eligible for confirmation (terminal non-paid, or
    /// still Created)
    Ineligible(Invoice),
}

/// Persistence seam for invoices.
///
/// Every mutation is a conditional update evaluated atomically inside the
/// store; there is no read-modify-write surface for callers to get wrong.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Store a new `Created` row unless an open invoice already exists for
    /// the same buyer+item. This is the race-safe check-then-create: of two
    /// concurrent callers, exactly one inserts and the other receives the
    /// winner's row.
    async fn insert_if_absent(&self, invoice: Invoice) -> Result<InsertOutcome, StoreError>;

    /// Fetch by internal id
    async fn get(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    /// Fetch by provider-assigned reference (webhook correlation)
    async fn find_by_provider_ref(&self, provider_ref: &str)
        -> Result<Option<Invoice>, StoreError>;

    /// The open (Created or AwaitingPayment) invoice for a buyer+item, if any
    async fn find_open(&self, buyer: &BuyerId, item: &ItemId)
        -> Result<Option<Invoice>, StoreError>;

    /// Backfill provider data onto a `Created` row and move it to
    /// `AwaitingPayment`. A row already past `Created` is left unchanged.
    async fn attach_provider(
        &self,
        id: InvoiceId,
        provider_ref: String,
        payment_url: Option<String>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// The single atomic confirmation primitive: set status to `Paid` and
    /// record payment details, if and only if the current status is
    /// `AwaitingPayment`. Exactly one of any number of concurrent callers
    /// observes [`ConfirmOutcome::Won`].
    async fn confirm_paid(
        &self,
        id: InvoiceId,
        paid_amount_minor: i64,
        provider_payment_id: Option<String>,
    ) -> Result<ConfirmOutcome, StoreError>;

    /// Guarded generic transition (cancel, expire, fail): applied only when
    /// the row is in `expected` and the move is permitted by the status
    /// machine.
    async fn transition(
        &self,
        id: InvoiceId,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Record that reconciliation evaluated this invoice
    async fn touch_reconciled(&self, id: InvoiceId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Open invoices whose payment window closes before `cutoff`
    async fn open_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, StoreError>;

    /// All invoices ever issued to a buyer, newest first
    async fn list_for_buyer(&self, buyer: &BuyerId) -> Result<Vec<Invoice>, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    rows: HashMap<InvoiceId, Invoice>,
    by_provider_ref: HashMap<String, InvoiceId>,
    /// Index of the single open invoice per buyer+item
    open: HashMap<(BuyerId, ItemId), InvoiceId>,
}

impl MemoryInner {
    fn drop_open_index(&mut self, invoice: &Invoice) {
        let key = (invoice.buyer.clone(), invoice.item.clone());
        if self.open.get(&key) == Some(&invoice.id) {
            self.open.remove(&key);
        }
    }
}

/// In-process invoice store.
///
/// All mutations happen under one write lock, which is what makes each
/// conditional update atomic with respect to concurrent callers. No lock is
/// ever held across an await point.
#[derive(Default)]
pub struct MemoryInvoiceStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryInvoiceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn insert_if_absent(&self, invoice: Invoice) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.write();
        let key = (invoice.buyer.clone(), invoice.item.clone());
        if let Some(existing_id) = inner.open.get(&key) {
            if let Some(existing) = inner.rows.get(existing_id) {
                if existing.status.is_open() {
                    return Ok(InsertOutcome::Existing(existing.clone()));
                }
            }
        }
        inner.open.insert(key, invoice.id);
        let stored = invoice.clone();
        inner.rows.insert(invoice.id, invoice);
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn get(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.inner.read().rows.get(&id).cloned())
    }

    async fn find_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<Invoice>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .by_provider_ref
            .get(provider_ref)
            .and_then(|id| inner.rows.get(id))
            .cloned())
    }

    async fn find_open(
        &self,
        buyer: &BuyerId,
        item: &ItemId,
    ) -> Result<Option<Invoice>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .open
            .get(&(buyer.clone(), item.clone()))
            .and_then(|id| inner.rows.get(id))
            .filter(|inv| inv.status.is_open())
            .cloned())
    }

    async fn attach_provider(
        &self,
        id: InvoiceId,
        provider_ref: String,
        payment_url: Option<String>,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut inner = self.inner.write();
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if row.status != InvoiceStatus::Created {
            return Ok(TransitionOutcome::Unchanged(row.clone()));
        }
        row.provider_ref = Some(provider_ref.clone());
        row.payment_url = payment_url;
        row.record_transition(InvoiceStatus::AwaitingPayment, Utc::now());
        let updated = row.clone();
        inner.by_provider_ref.insert(provider_ref, id);
        Ok(TransitionOutcome::Applied(updated))
    }

    async fn confirm_paid(
        &self,
        id: InvoiceId,
        paid_amount_minor: i64,
        provider_payment_id: Option<String>,
    ) -> Result<ConfirmOutcome, StoreError> {
        let mut inner = self.inner.write();
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        match row.status {
            InvoiceStatus::AwaitingPayment => {
                row.paid_amount_minor = Some(paid_amount_minor);
                row.provider_payment_id = provider_payment_id;
                row.record_transition(InvoiceStatus::Paid, Utc::now());
                let updated = row.clone();
                inner.drop_open_index(&updated);
                Ok(ConfirmOutcome::Won(updated))
            }
            InvoiceStatus::Paid => Ok(ConfirmOutcome::AlreadyPaid(row.clone())),
            _ => Ok(ConfirmOutcome::Ineligible(row.clone())),
        }
    }

    async fn transition(
        &self,
        id: InvoiceId,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut inner = self.inner.write();
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if row.status != expected || !expected.can_transition_to(to) {
            return Ok(TransitionOutcome::Unchanged(row.clone()));
        }
        row.record_transition(to, Utc::now());
        let updated = row.clone();
        if to.is_terminal() {
            inner.drop_open_index(&updated);
        }
        Ok(TransitionOutcome::Applied(updated))
    }

    async fn touch_reconciled(&self, id: InvoiceId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.last_reconciled_at = Some(at);
        Ok(())
    }

    async fn open_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let inner = self.inner.read();
        let mut due: Vec<Invoice> = inner
            .rows
            .values()
            .filter(|inv| inv.status == InvoiceStatus::AwaitingPayment && inv.expires_at < cutoff)
            .cloned()
            .collect();
        due.sort_by_key(|inv| inv.expires_at);
        Ok(due)
    }

    async fn list_for_buyer(&self, buyer: &BuyerId) -> Result<Vec<Invoice>, StoreError> {
        let inner = self.inner.read();
        let mut rows: Vec<Invoice> = inner
            .rows
            .values()
            .filter(|inv| &inv.buyer == buyer)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_invoice() -> Invoice {
        Invoice::new(NewInvoice {
            buyer: BuyerId::new("buyer-1"),
            item: ItemId::new("course-1"),
            amount_minor: 10_000,
            currency: "USD".to_string(),
            provider: ProviderKind::Mock,
            expires_at: Utc::now() + Duration::hours(24),
        })
    }

    #[test]
    fn test_status_partial_order() {
        use InvoiceStatus::*;
        assert!(Created.can_transition_to(AwaitingPayment));
        assert!(Created.can_transition_to(Failed));
        assert!(Created.can_transition_to(Cancelled));
        assert!(AwaitingPayment.can_transition_to(Paid));
        assert!(AwaitingPayment.can_transition_to(Expired));
        assert!(AwaitingPayment.can_transition_to(Cancelled));

        // Paid is absorbing
        for to in [Created, AwaitingPayment, Expired, Cancelled, Failed] {
            assert!(!Paid.can_transition_to(to));
        }
        // Terminal states admit nothing
        for from in [Expired, Cancelled, Failed] {
            for to in [Created, AwaitingPayment, Paid, Expired, Cancelled, Failed] {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
        // No skipping Created -> Paid
        assert!(!Created.can_transition_to(Paid));
    }

    #[test]
    fn test_idempotency_key_unique_per_attempt() {
        let a = new_invoice();
        let b = new_invoice();
        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert!(a.idempotency_key.starts_with("buyer-1:course-1:"));
    }

    #[tokio::test]
    async fn test_insert_if_absent_dedupes_open_invoice() {
        let store = MemoryInvoiceStore::new();
        let first = new_invoice();
        let first_id = first.id;

        match store.insert_if_absent(first).await.unwrap() {
            InsertOutcome::Inserted(inv) => assert_eq!(inv.id, first_id),
            InsertOutcome::Existing(_) => panic!("first insert must win"),
        }

        // Second insert for the same pair loses and gets the winner's row
        match store.insert_if_absent(new_invoice()).await.unwrap() {
            InsertOutcome::Existing(inv) => assert_eq!(inv.id, first_id),
            InsertOutcome::Inserted(_) => panic!("duplicate open invoice created"),
        }
    }

    #[tokio::test]
    async fn test_insert_allowed_after_terminal() {
        let store = MemoryInvoiceStore::new();
        let first = new_invoice();
        let first_id = first.id;
        store.insert_if_absent(first).await.unwrap();
        store
            .attach_provider(first_id, "P1".into(), None)
            .await
            .unwrap();
        store
            .transition(
                first_id,
                InvoiceStatus::AwaitingPayment,
                InvoiceStatus::Cancelled,
            )
            .await
            .unwrap();

        match store.insert_if_absent(new_invoice()).await.unwrap() {
            InsertOutcome::Inserted(inv) => assert_ne!(inv.id, first_id),
            InsertOutcome::Existing(_) => panic!("terminal invoice must not block creation"),
        }
    }

    #[tokio::test]
    async fn test_attach_provider_backfills_once() {
        let store = MemoryInvoiceStore::new();
        let inv = new_invoice();
        let id = inv.id;
        store.insert_if_absent(inv).await.unwrap();

        match store
            .attach_provider(id, "P1".into(), Some("https://pay.test/P1".into()))
            .await
            .unwrap()
        {
            TransitionOutcome::Applied(inv) => {
                assert_eq!(inv.status, InvoiceStatus::AwaitingPayment);
                assert_eq!(inv.provider_ref.as_deref(), Some("P1"));
                assert_eq!(inv.history.len(), 1);
            }
            TransitionOutcome::Unchanged(_) => panic!("backfill must apply to Created row"),
        }

        // A second attach is a no-op
        match store.attach_provider(id, "P2".into(), None).await.unwrap() {
            TransitionOutcome::Unchanged(inv) => {
                assert_eq!(inv.provider_ref.as_deref(), Some("P1"));
            }
            TransitionOutcome::Applied(_) => panic!("backfill applied twice"),
        }

        let found = store.find_by_provider_ref("P1").await.unwrap();
        assert_eq!(found.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_confirm_paid_is_single_winner() {
        let store = MemoryInvoiceStore::new();
        let inv = new_invoice();
        let id = inv.id;
        store.insert_if_absent(inv).await.unwrap();
        store.attach_provider(id, "P1".into(), None).await.unwrap();

        match store.confirm_paid(id, 10_000, Some("pay_1".into())).await.unwrap() {
            ConfirmOutcome::Won(inv) => {
                assert_eq!(inv.status, InvoiceStatus::Paid);
                assert_eq!(inv.paid_amount_minor, Some(10_000));
                assert_eq!(inv.provider_payment_id.as_deref(), Some("pay_1"));
            }
            other => panic!("expected Won, got {other:?}"),
        }

        match store.confirm_paid(id, 10_000, Some("pay_dup".into())).await.unwrap() {
            ConfirmOutcome::AlreadyPaid(inv) => {
                // Losing caller must not overwrite the winner's record
                assert_eq!(inv.provider_payment_id.as_deref(), Some("pay_1"));
            }
            other => panic!("expected AlreadyPaid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_confirm_paid_ineligible_states() {
        let store = MemoryInvoiceStore::new();
        let inv = new_invoice();
        let id = inv.id;
        store.insert_if_absent(inv).await.unwrap();

        // Still Created: nothing to confirm
        assert!(matches!(
            store.confirm_paid(id, 10_000, None).await.unwrap(),
            ConfirmOutcome::Ineligible(_)
        ));

        store.attach_provider(id, "P1".into(), None).await.unwrap();
        store
            .transition(id, InvoiceStatus::AwaitingPayment, InvoiceStatus::Expired)
            .await
            .unwrap();

        // Terminal non-paid: never resurrected
        match store.confirm_paid(id, 10_000, None).await.unwrap() {
            ConfirmOutcome::Ineligible(inv) => assert_eq!(inv.status, InvoiceStatus::Expired),
            other => panic!("expected Ineligible, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transition_guard_rejects_mismatch() {
        let store = MemoryInvoiceStore::new();
        let inv = new_invoice();
        let id = inv.id;
        store.insert_if_absent(inv).await.unwrap();

        // Wrong expected status: no-op
        match store
            .transition(id, InvoiceStatus::AwaitingPayment, InvoiceStatus::Expired)
            .await
            .unwrap()
        {
            TransitionOutcome::Unchanged(inv) => {
                assert_eq!(inv.status, InvoiceStatus::Created);
                assert!(inv.history.is_empty());
            }
            TransitionOutcome::Applied(_) => panic!("guard must reject mismatched expected"),
        }

        // Disallowed edge: Created -> Expired is not in the partial order
        assert!(matches!(
            store
                .transition(id, InvoiceStatus::Created, InvoiceStatus::Expired)
                .await
                .unwrap(),
            TransitionOutcome::Unchanged(_)
        ));
    }

    #[tokio::test]
    async fn test_open_expiring_before() {
        let store = MemoryInvoiceStore::new();
        let mut inv = new_invoice();
        inv.expires_at = Utc::now() - Duration::minutes(5);
        let id = inv.id;
        store.insert_if_absent(inv).await.unwrap();
        store.attach_provider(id, "P1".into(), None).await.unwrap();

        let due = store.open_expiring_before(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);

        // Created rows are not swept; the backfill path owns them
        let other = Invoice::new(NewInvoice {
            buyer: BuyerId::new("buyer-2"),
            item: ItemId::new("course-1"),
            amount_minor: 5_000,
            currency: "USD".to_string(),
            provider: ProviderKind::Mock,
            expires_at: Utc::now() - Duration::minutes(1),
        });
        store.insert_if_absent(other).await.unwrap();
        let due = store.open_expiring_before(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_history_accumulates() {
        let store = MemoryInvoiceStore::new();
        let inv = new_invoice();
        let id = inv.id;
        store.insert_if_absent(inv).await.unwrap();
        store.attach_provider(id, "P1".into(), None).await.unwrap();
        store.confirm_paid(id, 10_000, None).await.unwrap();

        let inv = store.get(id).await.unwrap().unwrap();
        let edges: Vec<(InvoiceStatus, InvoiceStatus)> =
            inv.history.iter().map(|c| (c.from, c.to)).collect();
        assert_eq!(
            edges,
            vec![
                (InvoiceStatus::Created, InvoiceStatus::AwaitingPayment),
                (InvoiceStatus::AwaitingPayment, InvoiceStatus::Paid),
            ]
        );
    }
}
