use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediflow_catalog::CatalogItemId;
use mediflow_core::{ActorId, Aggregate, AggregateId, AggregateRoot, ClientId, DomainError, Entity};
use mediflow_events::Event;
use mediflow_returns::ReturnId;
use mediflow_verification::{DeliveryEvidence, PickupEvidence};

use crate::number::{OrderNumber, OrderType};

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Fulfillment status lifecycle.
///
/// `pending → processing → picked_up → completed`, with `cancelled`
/// reachable until pickup. Orders are never deleted; `cancelled` is the
/// soft terminal mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    PickedUp,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// A line as committed at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub catalog_item_id: CatalogItemId,
    pub quantity: u32,
    /// Unit price in smallest currency unit, resolved from the catalog at
    /// placement. Frozen, never re-derived later.
    pub unit_price: u64,
}

/// An append-only record linking a line's shortfall to the return covering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRecord {
    pub return_id: ReturnId,
    pub quantity: u32,
    pub substituted_at: DateTime<Utc>,
    pub substituted_by: ActorId,
}

/// Order line with its frozen pricing and substitution history.
///
/// Owned exclusively by its order; addressed by catalog item identity, not by
/// positional line identity (positions are not stable across re-fetches).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub catalog_item_id: CatalogItemId,
    pub quantity: u32,
    pub unit_price: u64,
    /// `unit_price × quantity`, computed once at placement.
    pub line_total: u64,
    pub substitutions: Vec<SubstitutionRecord>,
}

impl OrderItem {
    fn from_line(line: &OrderLine) -> Self {
        Self {
            catalog_item_id: line.catalog_item_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.unit_price * u64::from(line.quantity),
            substitutions: Vec::new(),
        }
    }

    /// Units of this line already covered by substitutions.
    pub fn substituted_quantity(&self) -> u32 {
        self.substitutions.iter().map(|s| s.quantity).sum()
    }

    /// Units of this line still open for substitution.
    pub fn substitutable_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.substituted_quantity())
    }
}

impl Entity for OrderItem {
    type Id = CatalogItemId;

    fn id(&self) -> &Self::Id {
        &self.catalog_item_id
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    number: Option<OrderNumber>,
    order_type: OrderType,
    client_id: Option<ClientId>,
    deliverer_id: Option<ActorId>,
    status: OrderStatus,
    items: Vec<OrderItem>,
    pickup_verification: Option<PickupEvidence>,
    delivery_verification: Option<DeliveryEvidence>,
    /// Derived: true iff any item has at least one substitution. Recomputed
    /// on every item mutation; a read optimization, not a source of truth.
    has_substitutions: bool,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            number: None,
            order_type: OrderType::Client,
            client_id: None,
            deliverer_id: None,
            status: OrderStatus::Pending,
            items: Vec::new(),
            pickup_verification: None,
            delivery_verification: None,
            has_substitutions: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn number(&self) -> Option<&OrderNumber> {
        self.number.as_ref()
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn deliverer_id(&self) -> Option<ActorId> {
        self.deliverer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Line lookup by catalog item identity.
    pub fn item(&self, catalog_item_id: CatalogItemId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.catalog_item_id == catalog_item_id)
    }

    pub fn pickup_verification(&self) -> Option<&PickupEvidence> {
        self.pickup_verification.as_ref()
    }

    pub fn delivery_verification(&self) -> Option<&DeliveryEvidence> {
        self.delivery_verification.as_ref()
    }

    pub fn has_substitutions(&self) -> bool {
        self.has_substitutions
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_active(&self) -> bool {
        self.created && !self.status.is_terminal()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub order_type: OrderType,
    pub client_id: Option<ClientId>,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignDeliverer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignDeliverer {
    pub order_id: OrderId,
    pub deliverer_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPickup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPickup {
    pub order_id: OrderId,
    pub actor: ActorId,
    pub evidence: PickupEvidence,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmDelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDelivery {
    pub order_id: OrderId,
    pub actor: ActorId,
    pub evidence: DeliveryEvidence,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder (administrative).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordSubstitution.
///
/// Appended by the substitution coordinator after the return side has been
/// validated and tentatively decremented. The committed line quantity never
/// changes; only the substitution log grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSubstitution {
    pub order_id: OrderId,
    pub catalog_item_id: CatalogItemId,
    pub return_id: ReturnId,
    pub quantity: u32,
    pub substituted_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    AssignDeliverer(AssignDeliverer),
    ConfirmPickup(ConfirmPickup),
    ConfirmDelivery(ConfirmDelivery),
    CancelOrder(CancelOrder),
    RecordSubstitution(RecordSubstitution),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub order_type: OrderType,
    pub client_id: Option<ClientId>,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DelivererAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelivererAssigned {
    pub order_id: OrderId,
    pub deliverer_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PickupConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupConfirmed {
    pub order_id: OrderId,
    pub deliverer_id: ActorId,
    pub evidence: PickupEvidence,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfirmed {
    pub order_id: OrderId,
    pub deliverer_id: ActorId,
    pub evidence: DeliveryEvidence,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubstitutionRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRecorded {
    pub order_id: OrderId,
    pub catalog_item_id: CatalogItemId,
    pub return_id: ReturnId,
    pub quantity: u32,
    pub substituted_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    DelivererAssigned(DelivererAssigned),
    PickupConfirmed(PickupConfirmed),
    DeliveryConfirmed(DeliveryConfirmed),
    OrderCancelled(OrderCancelled),
    SubstitutionRecorded(SubstitutionRecorded),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "fulfillment.order.placed",
            OrderEvent::DelivererAssigned(_) => "fulfillment.order.deliverer_assigned",
            OrderEvent::PickupConfirmed(_) => "fulfillment.order.pickup_confirmed",
            OrderEvent::DeliveryConfirmed(_) => "fulfillment.order.delivery_confirmed",
            OrderEvent::OrderCancelled(_) => "fulfillment.order.cancelled",
            OrderEvent::SubstitutionRecorded(_) => "fulfillment.order.substitution_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::DelivererAssigned(e) => e.occurred_at,
            OrderEvent::PickupConfirmed(e) => e.occurred_at,
            OrderEvent::DeliveryConfirmed(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
            OrderEvent::SubstitutionRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.number = Some(e.order_number.clone());
                self.order_type = e.order_type;
                self.client_id = e.client_id;
                self.status = OrderStatus::Pending;
                self.items = e.lines.iter().map(OrderItem::from_line).collect();
                self.created = true;
            }
            OrderEvent::DelivererAssigned(e) => {
                self.deliverer_id = Some(e.deliverer_id);
                self.status = OrderStatus::Processing;
            }
            OrderEvent::PickupConfirmed(e) => {
                self.pickup_verification = Some(e.evidence.clone());
                self.status = OrderStatus::PickedUp;
            }
            OrderEvent::DeliveryConfirmed(e) => {
                self.delivery_verification = Some(e.evidence.clone());
                self.status = OrderStatus::Completed;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
            }
            OrderEvent::SubstitutionRecorded(e) => {
                if let Some(item) = self
                    .items
                    .iter_mut()
                    .find(|i| i.catalog_item_id == e.catalog_item_id)
                {
                    item.substitutions.push(SubstitutionRecord {
                        return_id: e.return_id,
                        quantity: e.quantity,
                        substituted_at: e.occurred_at,
                        substituted_by: e.substituted_by,
                    });
                }
            }
        }

        // Derived flag: recompute rather than trusting a stored value.
        self.has_substitutions = self.items.iter().any(|i| !i.substitutions.is_empty());

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::AssignDeliverer(cmd) => self.handle_assign(cmd),
            OrderCommand::ConfirmPickup(cmd) => self.handle_confirm_pickup(cmd),
            OrderCommand::ConfirmDelivery(cmd) => self.handle_confirm_delivery(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::RecordSubstitution(cmd) => self.handle_record_substitution(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::validation("order_id mismatch"));
        }
        Ok(())
    }

    /// The pickup/delivery gates share the deliverer checks: someone must be
    /// assigned, and the acting party must be that deliverer.
    fn ensure_acting_deliverer(&self, actor: ActorId) -> Result<ActorId, DomainError> {
        let assigned = self
            .deliverer_id
            .ok_or_else(|| DomainError::precondition("no deliverer assigned to this order"))?;
        if assigned != actor {
            return Err(DomainError::unauthorized(
                "acting party is not the assigned deliverer",
            ));
        }
        Ok(assigned)
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already placed"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
        }
        if cmd.order_type == OrderType::Client && cmd.client_id.is_none() {
            return Err(DomainError::validation(
                "client orders must name the placing client",
            ));
        }
        for line in &cmd.lines {
            if line.quantity == 0 {
                return Err(DomainError::invalid_quantity(format!(
                    "line for item {} has zero quantity",
                    line.catalog_item_id
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for line in &cmd.lines {
            if !seen.insert(line.catalog_item_id) {
                return Err(DomainError::validation(format!(
                    "duplicate line for item {}",
                    line.catalog_item_id
                )));
            }
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            order_type: cmd.order_type,
            client_id: cmd.client_id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign(&self, cmd: &AssignDeliverer) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("order"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if self.deliverer_id.is_some() {
            return Err(DomainError::precondition("order already has a deliverer"));
        }
        if self.status != OrderStatus::Pending {
            return Err(DomainError::precondition(format!(
                "deliverer can only be assigned to a pending order (status: {:?})",
                self.status
            )));
        }

        Ok(vec![OrderEvent::DelivererAssigned(DelivererAssigned {
            order_id: cmd.order_id,
            deliverer_id: cmd.deliverer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_pickup(&self, cmd: &ConfirmPickup) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("order"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Processing) {
            return Err(DomainError::precondition(format!(
                "pickup can only be confirmed while pending or processing (status: {:?})",
                self.status
            )));
        }
        let deliverer_id = self.ensure_acting_deliverer(cmd.actor)?;
        cmd.evidence.validate()?;

        Ok(vec![OrderEvent::PickupConfirmed(PickupConfirmed {
            order_id: cmd.order_id,
            deliverer_id,
            evidence: cmd.evidence.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_delivery(
        &self,
        cmd: &ConfirmDelivery,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("order"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::PickedUp {
            return Err(DomainError::precondition(format!(
                "delivery can only be confirmed after pickup (status: {:?})",
                self.status
            )));
        }
        let deliverer_id = self.ensure_acting_deliverer(cmd.actor)?;
        cmd.evidence.validate()?;

        Ok(vec![OrderEvent::DeliveryConfirmed(DeliveryConfirmed {
            order_id: cmd.order_id,
            deliverer_id,
            evidence: cmd.evidence.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("order"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Processing) {
            return Err(DomainError::precondition(format!(
                "orders can only be cancelled before pickup (status: {:?})",
                self.status
            )));
        }

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_substitution(
        &self,
        cmd: &RecordSubstitution,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("order"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if self.status == OrderStatus::Cancelled {
            return Err(DomainError::precondition(
                "cancelled orders do not accept substitutions",
            ));
        }
        let item = self.item(cmd.catalog_item_id).ok_or_else(|| {
            DomainError::not_found(format!(
                "order has no line for item {}",
                cmd.catalog_item_id
            ))
        })?;
        if cmd.quantity == 0 {
            return Err(DomainError::invalid_quantity(
                "substituted quantity must be positive",
            ));
        }
        let open = item.substitutable_quantity();
        if cmd.quantity > open {
            return Err(DomainError::invalid_quantity(format!(
                "cannot substitute {} units, only {} of the line's commitment remain open",
                cmd.quantity, open
            )));
        }

        Ok(vec![OrderEvent::SubstitutionRecorded(SubstitutionRecorded {
            order_id: cmd.order_id,
            catalog_item_id: cmd.catalog_item_id,
            return_id: cmd.return_id,
            quantity: cmd.quantity,
            substituted_by: cmd.substituted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
