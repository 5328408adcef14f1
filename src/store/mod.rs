//! Persistent state for the payment core
//!
//! Two logical tables back the whole engine:
//!
//! - **Invoices** ([`invoice`]): every payment request ever issued, with its
//!   provider reference, status, and a timestamped transition history.
//!   Rows are never deleted; they are the audit trail.
//! - **Entitlements** ([`entitlement`]): what each buyer may access, with
//!   provenance back to the invoice that granted it.
//!
//! Both are exposed as async traits so the in-memory implementations used
//! here and in tests can be swapped for a database-backed store. The store
//! mutation methods are the concurrency-control primitives of the system:
//! every status change is a conditional update on the expected prior state,
//! evaluated atomically inside the store.

pub mod entitlement;
pub mod invoice;

pub use entitlement::{
    Entitlement, EntitlementStore, GrantOutcome, GrantReason, MemoryEntitlementStore,
};
pub use invoice::{
    ConfirmOutcome, InsertOutcome, Invoice, InvoiceId, InvoiceStatus, InvoiceStore,
    MemoryInvoiceStore, NewInvoice, StatusChange, TransitionOutcome,
};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Verified buyer identity, supplied by the auth collaborator.
///
/// The core trusts this value and performs no authentication itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuyerId(String);

impl BuyerId {
    /// Wrap a buyer identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuyerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a purchasable catalog item (a course).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wrap an item identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
