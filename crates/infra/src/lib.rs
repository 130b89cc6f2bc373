//! Infrastructure layer: event store, dispatch, coordination, read models.
//!
//! Everything here is storage-technology agnostic: the in-memory store is the
//! only backend shipped, and anything supporting per-stream compare-and-swap
//! can replace it.

pub mod command_dispatcher;
pub mod event_store;
pub mod order_numbers;
pub mod read_model;
pub mod reconciliation;
pub mod service;
pub mod substitution;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use order_numbers::OrderNumberSequence;
pub use read_model::{AvailableReturn, IndexingEventBus, ReturnLedgerIndex, ReturnedStock};
pub use reconciliation::{reconcile, ReconciliationLine};
pub use service::{CollectedItem, FulfillmentService, PlacedOrder};
pub use substitution::{SubstitutionCoordinator, SubstitutionOutcome, MAX_CONFLICT_RETRIES};

/// Stream type for order aggregates.
pub const ORDER_AGGREGATE_TYPE: &str = "fulfillment.order";
/// Stream type for return ledger aggregates.
pub const RETURN_AGGREGATE_TYPE: &str = "returns.return";
