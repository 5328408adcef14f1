//! Catalog collaborator
//!
//! The course catalog is an external system as far as the payment core is
//! concerned; this trait is the slice of it the core needs. Invoices are
//! always priced from here, never from a client-supplied amount.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::store::ItemId;

/// A purchasable catalog entry as the payment core sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Item identifier
    pub id: ItemId,
    /// Title shown on the provider's payment page
    pub title: String,
    /// Authoritative price in minor currency units
    pub price_minor: i64,
    /// ISO currency code the item is sold in
    pub currency: String,
}

/// Read-only view of the course catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up an item; `None` means it does not exist or is not for sale
    async fn item(&self, id: &ItemId) -> Option<CatalogItem>;
}

/// In-process catalog used by tests and local runs
#[derive(Default)]
pub struct MemoryCatalog {
    items: RwLock<HashMap<ItemId, CatalogItem>>,
}

impl MemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an item
    pub fn put(&self, item: CatalogItem) {
        self.items.write().insert(item.id.clone(), item);
    }

    /// Build a catalog from a list of items
    pub fn with_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let catalog = Self::new();
        for item in items {
            catalog.put(item);
        }
        catalog
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn item(&self, id: &ItemId) -> Option<CatalogItem> {
        self.items.read().get(id).cloned()
    }
}
