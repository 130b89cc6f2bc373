//! Read model over the return ledger.
//!
//! The [`ReturnLedgerIndex`] folds published return events into per-return
//! rows so the write side never has to scan event streams to answer "which
//! returns can cover item X right now" or "what came back from order Y".
//!
//! Consumers of the bus get at-least-once delivery, so application is
//! idempotent: each row remembers the last stream position it absorbed and
//! drops anything at or below it.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use mediflow_catalog::CatalogItemId;
use mediflow_core::AggregateId;
use mediflow_events::{EventBus, EventEnvelope, Subscription};
use mediflow_returns::{ReturnEvent, ReturnId, ReturnStatus};

use crate::RETURN_AGGREGATE_TYPE;

/// A return with stock still open for substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableReturn {
    pub return_id: ReturnId,
    pub item_id: CatalogItemId,
    pub source_order_id: AggregateId,
    pub remaining_quantity: u32,
    pub collected_at: DateTime<Utc>,
}

/// A return traced back to the order it was collected from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedStock {
    pub return_id: ReturnId,
    pub item_id: CatalogItemId,
    /// Quantity handed back at collection, before any later substitution
    /// drew it down. Billing adjustments key off this figure.
    pub returned_quantity: u32,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to deserialize return event payload: {0}")]
    Deserialize(String),

    #[error("event for unknown return {0} (stream applied out of order?)")]
    MissingRow(ReturnId),

    #[error("index lock poisoned")]
    Poisoned,
}

impl From<IndexError> for crate::command_dispatcher::DispatchError {
    fn from(value: IndexError) -> Self {
        match value {
            IndexError::Deserialize(msg) => Self::Deserialize(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct ReturnRow {
    return_id: ReturnId,
    item_id: CatalogItemId,
    source_order_id: AggregateId,
    initial_quantity: u32,
    remaining_quantity: u32,
    status: ReturnStatus,
    collected_at: DateTime<Utc>,
    /// Highest stream sequence number folded into this row.
    last_sequence: u64,
}

/// In-memory index of the return ledger, keyed by return id.
#[derive(Debug, Default)]
pub struct ReturnLedgerIndex {
    rows: RwLock<HashMap<ReturnId, ReturnRow>>,
}

impl ReturnLedgerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one published envelope into the index. Envelopes from other
    /// aggregate types pass through untouched; replayed envelopes are
    /// dropped by the per-row sequence check.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), IndexError> {
        if envelope.aggregate_type() != RETURN_AGGREGATE_TYPE {
            return Ok(());
        }

        let event: ReturnEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| IndexError::Deserialize(e.to_string()))?;
        let sequence = envelope.sequence_number();

        let mut rows = self.rows.write().map_err(|_| IndexError::Poisoned)?;

        match event {
            ReturnEvent::ReturnCollected(e) => {
                let row = rows.entry(e.return_id).or_insert(ReturnRow {
                    return_id: e.return_id,
                    item_id: e.item_id,
                    source_order_id: e.source_order_id,
                    initial_quantity: e.quantity,
                    remaining_quantity: e.quantity,
                    status: ReturnStatus::AvailableForReuse,
                    collected_at: e.occurred_at,
                    last_sequence: sequence,
                });
                row.last_sequence = row.last_sequence.max(sequence);
            }
            ReturnEvent::ReturnConsumed(e) => {
                let row = rows
                    .get_mut(&e.return_id)
                    .ok_or(IndexError::MissingRow(e.return_id))?;
                if sequence <= row.last_sequence {
                    return Ok(());
                }
                row.remaining_quantity = row.remaining_quantity.saturating_sub(e.quantity);
                if row.remaining_quantity == 0 {
                    row.status = ReturnStatus::Used;
                }
                row.last_sequence = sequence;
            }
            ReturnEvent::ConsumptionReversed(e) => {
                let row = rows
                    .get_mut(&e.return_id)
                    .ok_or(IndexError::MissingRow(e.return_id))?;
                if sequence <= row.last_sequence {
                    return Ok(());
                }
                row.remaining_quantity += e.quantity;
                if row.status == ReturnStatus::Used {
                    row.status = ReturnStatus::AvailableForReuse;
                }
                row.last_sequence = sequence;
            }
            ReturnEvent::ReturnDisposed(e) => {
                let row = rows
                    .get_mut(&e.return_id)
                    .ok_or(IndexError::MissingRow(e.return_id))?;
                if sequence <= row.last_sequence {
                    return Ok(());
                }
                row.status = e.disposition.into();
                row.last_sequence = sequence;
            }
        }

        Ok(())
    }

    /// Returns still available for reuse against the given catalog item,
    /// oldest collection first (FIFO consumption order).
    pub fn available_for_item(
        &self,
        item_id: CatalogItemId,
    ) -> Result<Vec<AvailableReturn>, IndexError> {
        let rows = self.rows.read().map_err(|_| IndexError::Poisoned)?;
        let mut out: Vec<AvailableReturn> = rows
            .values()
            .filter(|r| {
                r.item_id == item_id
                    && r.status == ReturnStatus::AvailableForReuse
                    && r.remaining_quantity > 0
            })
            .map(|r| AvailableReturn {
                return_id: r.return_id,
                item_id: r.item_id,
                source_order_id: r.source_order_id,
                remaining_quantity: r.remaining_quantity,
                collected_at: r.collected_at,
            })
            .collect();
        // Tie-break on id so ordering is stable under equal timestamps.
        out.sort_by(|a, b| {
            a.collected_at
                .cmp(&b.collected_at)
                .then_with(|| a.return_id.0.cmp(&b.return_id.0))
        });
        Ok(out)
    }

    /// All returns collected from the given order (the origin relation,
    /// regardless of what later consumed them).
    pub fn returned_from_order(
        &self,
        source_order_id: AggregateId,
    ) -> Result<Vec<ReturnedStock>, IndexError> {
        let rows = self.rows.read().map_err(|_| IndexError::Poisoned)?;
        let mut out: Vec<ReturnedStock> = rows
            .values()
            .filter(|r| r.source_order_id == source_order_id)
            .map(|r| ReturnedStock {
                return_id: r.return_id,
                item_id: r.item_id,
                returned_quantity: r.initial_quantity,
            })
            .collect();
        out.sort_by(|a, b| a.return_id.0.cmp(&b.return_id.0));
        Ok(out)
    }
}

/// Bus decorator that folds every published envelope into the index before
/// forwarding it, so the index is consistent with the store the moment a
/// dispatch returns. Subscribers see the same envelopes as with the inner
/// bus alone.
#[derive(Debug)]
pub struct IndexingEventBus<B> {
    index: std::sync::Arc<ReturnLedgerIndex>,
    inner: B,
}

impl<B> IndexingEventBus<B> {
    pub fn new(index: std::sync::Arc<ReturnLedgerIndex>, inner: B) -> Self {
        Self { index, inner }
    }

    pub fn index(&self) -> &ReturnLedgerIndex {
        &self.index
    }
}

#[derive(Debug)]
pub enum IndexingBusError<E> {
    Index(IndexError),
    Inner(E),
}

impl<B> EventBus<EventEnvelope<JsonValue>> for IndexingEventBus<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    type Error = IndexingBusError<B::Error>;

    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        self.index
            .apply_envelope(&message)
            .map_err(IndexingBusError::Index)?;
        self.inner.publish(message).map_err(IndexingBusError::Inner)
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.inner.subscribe()
    }
}
