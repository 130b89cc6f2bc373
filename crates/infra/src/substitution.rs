//! Cross-aggregate substitution coordination.
//!
//! Substitution touches two streams: the return (consumption decrement) and
//! the order (substitution record). There is no cross-stream transaction, so
//! the coordinator sequences the writes and compensates on partial failure:
//!
//! 1. validate both sides against freshly loaded state
//! 2. append `ReturnConsumed` to the return stream (tentative decrement)
//! 3. append `SubstitutionRecorded` to the order stream
//! 4. if step 3 fails, append `ConsumptionReversed` to the return stream
//!
//! Both appends carry the stream version observed at load time, so a
//! concurrent writer on either side produces a `Conflict` instead of a lost
//! update. Conflicts are retried from scratch up to [`MAX_CONFLICT_RETRIES`]
//! times; every other error is returned as-is with no side effects beyond
//! the compensation above.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use mediflow_catalog::CatalogItemId;
use mediflow_core::{ActorId, Aggregate, AggregateId, ExpectedVersion};
use mediflow_events::{Event, EventBus, EventEnvelope};
use mediflow_orders::{Order, OrderCommand, OrderId, OrderStatus, RecordSubstitution};
use mediflow_returns::{
    ConsumeForSubstitution, Return, ReturnCommand, ReturnId, ReverseConsumption,
};

use crate::command_dispatcher::{apply_history, stream_version, validate_loaded_stream};
use crate::command_dispatcher::DispatchError;
use crate::event_store::{EventStore, StoredEvent, UncommittedEvent};
use crate::{ORDER_AGGREGATE_TYPE, RETURN_AGGREGATE_TYPE};

/// How many times a conflicted substitution is re-run before giving up.
pub const MAX_CONFLICT_RETRIES: u32 = 3;

/// The committed events of a successful substitution, both sides.
#[derive(Debug)]
pub struct SubstitutionOutcome {
    pub return_events: Vec<StoredEvent>,
    pub order_events: Vec<StoredEvent>,
}

/// Coordinates the two-stream substitution write path.
#[derive(Debug)]
pub struct SubstitutionCoordinator<S, B> {
    store: S,
    bus: B,
}

impl<S, B> SubstitutionCoordinator<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> SubstitutionCoordinator<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Substitute `quantity` units of `item_id` on `order_id` with stock
    /// drawn from `return_id`.
    pub fn substitute(
        &self,
        order_id: OrderId,
        item_id: CatalogItemId,
        return_id: ReturnId,
        quantity: u32,
        substituted_by: ActorId,
        occurred_at: DateTime<Utc>,
    ) -> Result<SubstitutionOutcome, DispatchError> {
        if quantity == 0 {
            return Err(DispatchError::InvalidQuantity(
                "substituted quantity must be positive".to_string(),
            ));
        }

        let mut last_conflict = String::new();
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            match self.try_substitute(
                order_id,
                item_id,
                return_id,
                quantity,
                substituted_by,
                occurred_at,
            ) {
                Err(err) if err.is_retryable() => {
                    tracing::warn!(
                        %order_id,
                        %return_id,
                        attempt,
                        "substitution conflicted, reloading and retrying"
                    );
                    if let DispatchError::Conflict(msg) = err {
                        last_conflict = msg;
                    }
                }
                other => return other,
            }
        }

        Err(DispatchError::Conflict(format!(
            "substitution gave up after {MAX_CONFLICT_RETRIES} conflicted attempts: {last_conflict}"
        )))
    }

    fn try_substitute(
        &self,
        order_id: OrderId,
        item_id: CatalogItemId,
        return_id: ReturnId,
        quantity: u32,
        substituted_by: ActorId,
        occurred_at: DateTime<Utc>,
    ) -> Result<SubstitutionOutcome, DispatchError> {
        // Load both aggregates and pin the versions we will append against.
        let order_history = self.store.load_stream(order_id.0)?;
        if order_history.is_empty() {
            return Err(DispatchError::NotFound(format!("order {order_id}")));
        }
        validate_loaded_stream(order_id.0, &order_history)?;
        let order_expected = ExpectedVersion::Exact(stream_version(&order_history));
        let mut order = Order::empty(order_id);
        apply_history::<Order>(&mut order, &order_history)?;

        if order.status() == OrderStatus::Cancelled {
            return Err(DispatchError::PreconditionFailed(
                "cancelled orders do not accept substitutions".to_string(),
            ));
        }
        if order.item(item_id).is_none() {
            return Err(DispatchError::NotFound(format!(
                "order {order_id} has no line for item {item_id}"
            )));
        }

        let return_history = self.store.load_stream(return_id.0)?;
        if return_history.is_empty() {
            return Err(DispatchError::NotFound(format!("return {return_id}")));
        }
        validate_loaded_stream(return_id.0, &return_history)?;
        let return_expected = ExpectedVersion::Exact(stream_version(&return_history));
        let mut ret = Return::empty(return_id);
        apply_history::<Return>(&mut ret, &return_history)?;

        if !ret.is_available() {
            return Err(DispatchError::PreconditionFailed(format!(
                "return {return_id} is not available for reuse (status: {:?})",
                ret.status()
            )));
        }
        if ret.item_id() != item_id {
            return Err(DispatchError::ItemMismatch(format!(
                "return {return_id} holds item {}, order line is item {item_id}",
                ret.item_id()
            )));
        }

        // Decide both sides before writing either: quantity bounds on the
        // return (remaining) and the order (open commitment) are enforced by
        // the aggregates themselves.
        let return_decided = ret
            .handle(&ReturnCommand::ConsumeForSubstitution(ConsumeForSubstitution {
                return_id,
                order_id: order_id.0,
                quantity,
                occurred_at,
            }))
            .map_err(DispatchError::from)?;
        let order_decided = order
            .handle(&OrderCommand::RecordSubstitution(RecordSubstitution {
                order_id,
                catalog_item_id: item_id,
                return_id,
                quantity,
                substituted_by,
                occurred_at,
            }))
            .map_err(DispatchError::from)?;

        // Tentative decrement on the return stream first.
        let return_committed = self.store.append(
            to_uncommitted(return_id.0, RETURN_AGGREGATE_TYPE, &return_decided)?,
            return_expected,
        )?;

        // Then the order-side record; compensate the decrement if it fails.
        let order_committed = match self.store.append(
            to_uncommitted(order_id.0, ORDER_AGGREGATE_TYPE, &order_decided)?,
            order_expected,
        ) {
            Ok(committed) => committed,
            Err(err) => {
                self.compensate(return_id, order_id, quantity, occurred_at);
                return Err(err.into());
            }
        };

        // Publish only after both appends are durable.
        self.publish_all(return_committed.iter().chain(order_committed.iter()))?;

        tracing::info!(
            %order_id,
            %item_id,
            %return_id,
            quantity,
            "substitution committed"
        );

        Ok(SubstitutionOutcome {
            return_events: return_committed,
            order_events: order_committed,
        })
    }

    /// Undo the tentative consumption after the order-side append failed.
    ///
    /// The return stream advanced by our own append, so the reversal is
    /// decided on top of the in-memory state that already includes it. A
    /// failure here leaves consumed-but-unrecorded stock; that is logged at
    /// error level and repaired by replaying the reversal, never by editing
    /// history.
    fn compensate(
        &self,
        return_id: ReturnId,
        order_id: OrderId,
        quantity: u32,
        occurred_at: DateTime<Utc>,
    ) {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let history = match self.store.load_stream(return_id.0) {
                Ok(h) => h,
                Err(err) => {
                    tracing::error!(%return_id, %order_id, error = %err, "compensation load failed");
                    return;
                }
            };
            let expected = ExpectedVersion::Exact(stream_version(&history));
            let mut ret = Return::empty(return_id);
            if apply_history::<Return>(&mut ret, &history).is_err() {
                tracing::error!(%return_id, %order_id, "compensation rehydration failed");
                return;
            }

            let decided = match ret.handle(&ReturnCommand::ReverseConsumption(ReverseConsumption {
                return_id,
                order_id: order_id.0,
                quantity,
                occurred_at,
            })) {
                Ok(events) => events,
                Err(err) => {
                    tracing::error!(%return_id, %order_id, error = %err, "compensation rejected");
                    return;
                }
            };

            let uncommitted = match to_uncommitted(return_id.0, RETURN_AGGREGATE_TYPE, &decided) {
                Ok(u) => u,
                Err(err) => {
                    tracing::error!(%return_id, %order_id, error = ?err, "compensation encode failed");
                    return;
                }
            };

            match self.store.append(uncommitted, expected) {
                Ok(committed) => {
                    if let Err(err) = self.publish_all(committed.iter()) {
                        tracing::error!(%return_id, %order_id, error = ?err, "compensation publish failed");
                    }
                    tracing::warn!(%return_id, %order_id, quantity, "substitution compensated");
                    return;
                }
                Err(crate::event_store::EventStoreError::Concurrency(_)) => continue,
                Err(err) => {
                    tracing::error!(%return_id, %order_id, error = %err, "compensation append failed");
                    return;
                }
            }
        }
        tracing::error!(%return_id, %order_id, "compensation exhausted its retries");
    }

    fn publish_all<'a>(
        &self,
        events: impl Iterator<Item = &'a StoredEvent>,
    ) -> Result<(), DispatchError> {
        for stored in events {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }
}

fn to_uncommitted<E>(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    events: &[E],
) -> Result<Vec<UncommittedEvent>, DispatchError>
where
    E: Event + serde::Serialize,
{
    events
        .iter()
        .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
        .collect::<Result<Vec<_>, _>>()
        .map_err(DispatchError::from)
}
