//! Inventory catalog reference data.
//!
//! Read-mostly leaf module: item identity, unit price, batch/expiry metadata.
//! Consumed by ordering and returns; **never mutated by the fulfillment core**
//! (stock adjustment is owned by a separate subsystem).

pub mod item;

pub use item::{CatalogItem, CatalogItemId, CatalogLookup, InMemoryCatalog};
