use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use mediflow_core::AggregateId;

/// Catalog item identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogItemId(pub AggregateId);

impl CatalogItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CatalogItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Reference data for a single supply item.
///
/// Prices are captured onto order lines at placement time; later catalog
/// price changes never flow back into existing orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: CatalogItemId,
    pub display_name: String,
    /// Price per unit in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    /// Manufacturer batch/lot code, if tracked.
    pub batch: Option<String>,
    /// Shelf-life expiry, if tracked. Returned stock is consumed FIFO to
    /// bound exposure to this.
    pub expiry: Option<NaiveDate>,
}

/// Lookup into the catalog by item identity.
///
/// This is the only catalog operation the fulfillment core consumes.
pub trait CatalogLookup: Send + Sync {
    fn lookup(&self, id: CatalogItemId) -> Option<CatalogItem>;
}

/// In-memory catalog for wiring and tests.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: std::sync::RwLock<std::collections::HashMap<CatalogItemId, CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an item. Catalog maintenance itself is out of scope; this exists
    /// so the service layer has something to resolve prices against.
    pub fn insert(&self, item: CatalogItem) {
        if let Ok(mut items) = self.items.write() {
            items.insert(item.id, item);
        }
    }
}

impl CatalogLookup for InMemoryCatalog {
    fn lookup(&self, id: CatalogItemId) -> Option<CatalogItem> {
        self.items.read().ok().and_then(|items| items.get(&id).cloned())
    }
}

impl<C> CatalogLookup for std::sync::Arc<C>
where
    C: CatalogLookup + ?Sized,
{
    fn lookup(&self, id: CatalogItemId) -> Option<CatalogItem> {
        (**self).lookup(id)
    }
}
