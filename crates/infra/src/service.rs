//! Application facade over the fulfillment core.
//!
//! One entry point per caller-facing operation. Each write runs through the
//! dispatcher (or the substitution coordinator) against the shared event
//! store, and every committed envelope passes through the indexing bus, so
//! the return ledger index reflects a write the moment its call returns.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use mediflow_catalog::{CatalogItemId, CatalogLookup};
use mediflow_core::{ActorId, AggregateId, ClientId};
use mediflow_events::{EventBus, EventEnvelope};
use mediflow_orders::{
    AssignDeliverer, CancelOrder, ConfirmDelivery, ConfirmPickup, Order, OrderCommand, OrderId,
    OrderLine, OrderNumber, OrderStatus, OrderType, PlaceOrder,
};
use mediflow_returns::{
    CollectReturn, DisposeReturn, Disposition, Return, ReturnCommand, ReturnId,
};
use mediflow_verification::{CollectionEvidence, DeliveryEvidence, PickupEvidence};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::order_numbers::OrderNumberSequence;
use crate::read_model::{AvailableReturn, IndexingEventBus, ReturnLedgerIndex};
use crate::reconciliation::{reconcile, ReconciliationLine};
use crate::substitution::{SubstitutionCoordinator, SubstitutionOutcome};
use crate::{ORDER_AGGREGATE_TYPE, RETURN_AGGREGATE_TYPE};

/// One physically returned line at collection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedItem {
    pub item_id: CatalogItemId,
    pub quantity: u32,
    pub reason: Option<String>,
}

/// Identity handed back from a successful placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
}

/// The fulfillment application service.
pub struct FulfillmentService<S, B, C> {
    dispatcher: CommandDispatcher<S, Arc<IndexingEventBus<B>>>,
    coordinator: SubstitutionCoordinator<S, Arc<IndexingEventBus<B>>>,
    index: Arc<ReturnLedgerIndex>,
    catalog: C,
    numbers: OrderNumberSequence,
}

impl<S, B, C> FulfillmentService<S, B, C>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>>,
    C: CatalogLookup,
{
    pub fn new(store: S, bus: B, catalog: C, numbers: OrderNumberSequence) -> Self {
        let index = Arc::new(ReturnLedgerIndex::new());
        let bus = Arc::new(IndexingEventBus::new(Arc::clone(&index), bus));
        Self {
            dispatcher: CommandDispatcher::new(store.clone(), Arc::clone(&bus)),
            coordinator: SubstitutionCoordinator::new(store, bus),
            index,
            catalog,
            numbers,
        }
    }

    /// Place a new order. Unit prices are resolved from the catalog here and
    /// frozen into the lines; later price changes never touch placed orders.
    pub fn place_order(
        &self,
        order_type: OrderType,
        client_id: Option<ClientId>,
        lines: Vec<(CatalogItemId, u32)>,
    ) -> Result<PlacedOrder, DispatchError> {
        let mut priced = Vec::with_capacity(lines.len());
        for (item_id, quantity) in lines {
            let item = self
                .catalog
                .lookup(item_id)
                .ok_or_else(|| DispatchError::NotFound(format!("catalog item {item_id}")))?;
            priced.push(OrderLine {
                catalog_item_id: item_id,
                quantity,
                unit_price: item.unit_price,
            });
        }

        let order_id = OrderId::new(AggregateId::new());
        // Allocated before the append; a failed placement burns the number,
        // which is fine: numbers are unique, not gapless.
        let order_number = self.numbers.next(order_type);

        let cmd = OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            order_number: order_number.clone(),
            order_type,
            client_id,
            lines: priced,
            occurred_at: Utc::now(),
        });
        self.dispatch_order(order_id, cmd)?;

        tracing::info!(%order_id, number = %order_number, "order placed");
        Ok(PlacedOrder {
            order_id,
            order_number,
        })
    }

    pub fn assign_deliverer(
        &self,
        order_id: OrderId,
        deliverer_id: ActorId,
    ) -> Result<(), DispatchError> {
        self.dispatch_order(
            order_id,
            OrderCommand::AssignDeliverer(AssignDeliverer {
                order_id,
                deliverer_id,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%order_id, %deliverer_id, "deliverer assigned");
        Ok(())
    }

    pub fn confirm_pickup(
        &self,
        order_id: OrderId,
        actor: ActorId,
        evidence: PickupEvidence,
    ) -> Result<(), DispatchError> {
        self.dispatch_order(
            order_id,
            OrderCommand::ConfirmPickup(ConfirmPickup {
                order_id,
                actor,
                evidence,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%order_id, "pickup confirmed");
        Ok(())
    }

    pub fn confirm_delivery(
        &self,
        order_id: OrderId,
        actor: ActorId,
        evidence: DeliveryEvidence,
    ) -> Result<(), DispatchError> {
        self.dispatch_order(
            order_id,
            OrderCommand::ConfirmDelivery(ConfirmDelivery {
                order_id,
                actor,
                evidence,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%order_id, "delivery confirmed");
        Ok(())
    }

    pub fn cancel_order(
        &self,
        order_id: OrderId,
        reason: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.dispatch_order(
            order_id,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                reason: reason.into(),
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%order_id, "order cancelled");
        Ok(())
    }

    /// Record stock physically handed back from a completed order. Each
    /// returned line opens its own return in the ledger.
    pub fn collect_returns(
        &self,
        source_order_id: OrderId,
        items: Vec<CollectedItem>,
        evidence: CollectionEvidence,
    ) -> Result<Vec<ReturnId>, DispatchError> {
        if items.is_empty() {
            return Err(DispatchError::Validation(
                "collection must name at least one returned item".to_string(),
            ));
        }

        let order = self.load_order(source_order_id)?;
        if order.status() != OrderStatus::Completed {
            return Err(DispatchError::PreconditionFailed(format!(
                "returns can only be collected from a completed order (status: {:?})",
                order.status()
            )));
        }

        // Validate every line before the first append, so a bad line in the
        // middle cannot leave a half-collected batch behind.
        for item in &items {
            let line = order.item(item.item_id).ok_or_else(|| {
                DispatchError::ItemMismatch(format!(
                    "order {source_order_id} has no line for item {}",
                    item.item_id
                ))
            })?;
            if item.quantity == 0 {
                return Err(DispatchError::InvalidQuantity(format!(
                    "returned quantity for item {} must be positive",
                    item.item_id
                )));
            }
            if item.quantity > line.quantity {
                return Err(DispatchError::InvalidQuantity(format!(
                    "cannot return {} units of item {}, only {} were delivered",
                    item.quantity, item.item_id, line.quantity
                )));
            }
        }

        let mut collected = Vec::with_capacity(items.len());
        for item in items {
            let return_id = ReturnId::new(AggregateId::new());
            let cmd = ReturnCommand::CollectReturn(CollectReturn {
                return_id,
                item_id: item.item_id,
                source_order_id: source_order_id.0,
                quantity: item.quantity,
                evidence: evidence.clone(),
                reason: item.reason,
                occurred_at: Utc::now(),
            });
            self.dispatch_return(return_id, cmd)?;
            collected.push(return_id);
        }

        tracing::info!(%source_order_id, count = collected.len(), "returns collected");
        Ok(collected)
    }

    /// Write a return off as damaged or disposed. Disposing stock that is
    /// still available requires the operator override flag.
    pub fn dispose_return(
        &self,
        return_id: ReturnId,
        disposition: Disposition,
        operator_override: bool,
    ) -> Result<(), DispatchError> {
        self.dispatch_return(
            return_id,
            ReturnCommand::DisposeReturn(DisposeReturn {
                return_id,
                disposition,
                operator_override,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(%return_id, ?disposition, "return disposed");
        Ok(())
    }

    /// Returns with stock still open against the given item, oldest first.
    pub fn list_available_returns(
        &self,
        item_id: CatalogItemId,
    ) -> Result<Vec<AvailableReturn>, DispatchError> {
        Ok(self.index.available_for_item(item_id)?)
    }

    /// Cover part of an order line with previously returned stock.
    pub fn substitute_item(
        &self,
        order_id: OrderId,
        item_id: CatalogItemId,
        return_id: ReturnId,
        quantity: u32,
        substituted_by: ActorId,
    ) -> Result<SubstitutionOutcome, DispatchError> {
        self.coordinator.substitute(
            order_id,
            item_id,
            return_id,
            quantity,
            substituted_by,
            Utc::now(),
        )
    }

    /// Billing report for a completed order: committed quantities net of the
    /// stock its client handed back.
    pub fn reconcile_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ReconciliationLine>, DispatchError> {
        let order = self.load_order(order_id)?;
        if order.status() != OrderStatus::Completed {
            return Err(DispatchError::PreconditionFailed(format!(
                "only completed orders are reconciled (status: {:?})",
                order.status()
            )));
        }
        let returns = self.index.returned_from_order(order_id.0)?;
        Ok(reconcile(&order, &returns))
    }

    /// Read-side snapshot of an order.
    pub fn load_order(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        let order = self
            .dispatcher
            .load(order_id.0, |id| Order::empty(OrderId::new(id)))?;
        if !order.is_created() {
            return Err(DispatchError::NotFound(format!("order {order_id}")));
        }
        Ok(order)
    }

    /// Read-side snapshot of a return.
    pub fn load_return(&self, return_id: ReturnId) -> Result<Return, DispatchError> {
        let ret = self
            .dispatcher
            .load(return_id.0, |id| Return::empty(ReturnId::new(id)))?;
        if !ret.is_created() {
            return Err(DispatchError::NotFound(format!("return {return_id}")));
        }
        Ok(ret)
    }

    fn dispatch_order(&self, order_id: OrderId, cmd: OrderCommand) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch::<Order>(order_id.0, ORDER_AGGREGATE_TYPE, cmd, |id| {
                Order::empty(OrderId::new(id))
            })
            .map(|_| ())
    }

    fn dispatch_return(&self, return_id: ReturnId, cmd: ReturnCommand) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch::<Return>(return_id.0, RETURN_AGGREGATE_TYPE, cmd, |id| {
                Return::empty(ReturnId::new(id))
            })
            .map(|_| ())
    }
}
