//! Entitlements: what a buyer may access, and why
//!
//! One row per (buyer, item) pair, ever. Granting twice updates the row in
//! place under the upsert rules below; it never creates a duplicate.
//! Revocation flips the active flag and records when, keeping the audit
//! trail append-only in spirit: a revoked entitlement stays on file.
//!
//! The grant primitive is shared by the reconciliation engine (reason
//! `Purchase`) and administrative tooling (reason `AdminGrant`), so the
//! uniqueness invariant holds no matter who grants.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{BuyerId, InvoiceId, ItemId};

/// Why an entitlement was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantReason {
    /// Granted by reconciliation of a paid invoice
    Purchase,
    /// Granted by an operator outside the purchase flow
    AdminGrant,
}

impl GrantReason {
    /// String form used in logs and API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::AdminGrant => "admin_grant",
        }
    }
}

impl fmt::Display for GrantReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buyer's right to access one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    /// Buyer holding the entitlement
    pub buyer: BuyerId,
    /// Item the entitlement covers
    pub item: ItemId,
    /// Whether access is currently granted
    pub active: bool,
    /// When the current grant was made
    pub granted_at: DateTime<Utc>,
    /// Optional end of access
    pub expires_at: Option<DateTime<Utc>>,
    /// When access was revoked, if it ever was
    pub revoked_at: Option<DateTime<Utc>>,
    /// Invoice that granted the current access
    pub source_invoice: InvoiceId,
    /// Why the current access was granted
    pub reason: GrantReason,
}

impl Entitlement {
    /// Whether the entitlement grants access right now
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

/// Outcome of the grant upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// No row existed; access granted fresh
    Granted,
    /// The pair was already active. Provenance is left untouched
    /// (first grant wins), so repeated calls are harmless.
    AlreadyActive,
    /// A previously revoked row was re-activated; the new invoice becomes
    /// the provenance
    Reactivated,
}

/// Persistence seam for entitlements
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Upsert keyed on (buyer, item). Safe to call any number of times with
    /// the same invoice, and safe under concurrent callers.
    async fn grant(
        &self,
        buyer: BuyerId,
        item: ItemId,
        source_invoice: InvoiceId,
        reason: GrantReason,
    ) -> Result<GrantOutcome, StoreError>;

    /// Revoke access, recording when. Returns false when there was nothing
    /// active to revoke.
    async fn revoke(&self, buyer: &BuyerId, item: &ItemId) -> Result<bool, StoreError>;

    /// Fetch the row for a pair, active or not
    async fn get(&self, buyer: &BuyerId, item: &ItemId)
        -> Result<Option<Entitlement>, StoreError>;

    /// Whether the buyer currently has access to the item
    async fn is_active(&self, buyer: &BuyerId, item: &ItemId) -> Result<bool, StoreError>;
}

/// In-process entitlement store. The grant upsert runs under one write
/// lock, making it atomic with respect to concurrent callers.
#[derive(Default)]
pub struct MemoryEntitlementStore {
    rows: RwLock<HashMap<(BuyerId, ItemId), Entitlement>>,
}

impl MemoryEntitlementStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn grant(
        &self,
        buyer: BuyerId,
        item: ItemId,
        source_invoice: InvoiceId,
        reason: GrantReason,
    ) -> Result<GrantOutcome, StoreError> {
        let mut rows = self.rows.write();
        let key = (buyer.clone(), item.clone());
        match rows.get_mut(&key) {
            None => {
                rows.insert(
                    key,
                    Entitlement {
                        buyer,
                        item,
                        active: true,
                        granted_at: Utc::now(),
                        expires_at: None,
                        revoked_at: None,
                        source_invoice,
                        reason,
                    },
                );
                Ok(GrantOutcome::Granted)
            }
            Some(existing) if existing.active => Ok(GrantOutcome::AlreadyActive),
            Some(existing) => {
                existing.active = true;
                existing.granted_at = Utc::now();
                existing.revoked_at = None;
                existing.source_invoice = source_invoice;
                existing.reason = reason;
                Ok(GrantOutcome::Reactivated)
            }
        }
    }

    async fn revoke(&self, buyer: &BuyerId, item: &ItemId) -> Result<bool, StoreError> {
        let mut rows = self.rows.write();
        match rows.get_mut(&(buyer.clone(), item.clone())) {
            Some(existing) if existing.active => {
                existing.active = false;
                existing.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(
        &self,
        buyer: &BuyerId,
        item: &ItemId,
    ) -> Result<Option<Entitlement>, StoreError> {
        Ok(self.rows.read().get(&(buyer.clone(), item.clone())).cloned())
    }

    async fn is_active(&self, buyer: &BuyerId, item: &ItemId) -> Result<bool, StoreError> {
        let rows = self.rows.read();
        Ok(rows
            .get(&(buyer.clone(), item.clone()))
            .map(|e| e.grants_access(Utc::now()))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (BuyerId, ItemId) {
        (BuyerId::new("buyer-1"), ItemId::new("course-1"))
    }

    #[tokio::test]
    async fn test_first_grant_inserts_active_row() {
        let store = MemoryEntitlementStore::new();
        let (buyer, item) = pair();
        let invoice = InvoiceId::generate();

        let outcome = store
            .grant(buyer.clone(), item.clone(), invoice, GrantReason::Purchase)
            .await
            .unwrap();
        assert_eq!(outcome, GrantOutcome::Granted);

        let row = store.get(&buyer, &item).await.unwrap().unwrap();
        assert!(row.active);
        assert_eq!(row.source_invoice, invoice);
        assert_eq!(row.reason, GrantReason::Purchase);
        assert!(store.is_active(&buyer, &item).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_grant_keeps_original_provenance() {
        let store = MemoryEntitlementStore::new();
        let (buyer, item) = pair();
        let first = InvoiceId::generate();
        let second = InvoiceId::generate();

        store
            .grant(buyer.clone(), item.clone(), first, GrantReason::Purchase)
            .await
            .unwrap();
        let outcome = store
            .grant(buyer.clone(), item.clone(), second, GrantReason::Purchase)
            .await
            .unwrap();
        assert_eq!(outcome, GrantOutcome::AlreadyActive);

        // First grant wins provenance
        let row = store.get(&buyer, &item).await.unwrap().unwrap();
        assert_eq!(row.source_invoice, first);
    }

    #[tokio::test]
    async fn test_revoke_then_regrant_updates_provenance() {
        let store = MemoryEntitlementStore::new();
        let (buyer, item) = pair();
        let first = InvoiceId::generate();
        let second = InvoiceId::generate();

        store
            .grant(buyer.clone(), item.clone(), first, GrantReason::Purchase)
            .await
            .unwrap();
        assert!(store.revoke(&buyer, &item).await.unwrap());
        assert!(!store.is_active(&buyer, &item).await.unwrap());

        // Row stays on file after revocation
        let row = store.get(&buyer, &item).await.unwrap().unwrap();
        assert!(row.revoked_at.is_some());

        let outcome = store
            .grant(buyer.clone(), item.clone(), second, GrantReason::AdminGrant)
            .await
            .unwrap();
        assert_eq!(outcome, GrantOutcome::Reactivated);

        let row = store.get(&buyer, &item).await.unwrap().unwrap();
        assert!(row.active);
        assert!(row.revoked_at.is_none());
        assert_eq!(row.source_invoice, second);
        assert_eq!(row.reason, GrantReason::AdminGrant);
    }

    #[tokio::test]
    async fn test_revoke_without_grant_is_false() {
        let store = MemoryEntitlementStore::new();
        let (buyer, item) = pair();
        assert!(!store.revoke(&buyer, &item).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entitlement_denies_access() {
        let store = MemoryEntitlementStore::new();
        let (buyer, item) = pair();
        store
            .grant(
                buyer.clone(),
                item.clone(),
                InvoiceId::generate(),
                GrantReason::Purchase,
            )
            .await
            .unwrap();

        {
            let mut rows = store.rows.write();
            let row = rows.get_mut(&(buyer.clone(), item.clone())).unwrap();
            row.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        }
        assert!(!store.is_active(&buyer, &item).await.unwrap());
    }
}
