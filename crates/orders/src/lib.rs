//! Order aggregate and fulfillment state machine.
//!
//! An order moves `pending → processing → picked_up → completed`, with
//! `cancelled` reachable until pickup. Pickup and delivery
//! transitions are gated on verification evidence and on the acting party
//! being the assigned deliverer. Substitution records are append-only and
//! never change the committed quantity of a line.

pub mod number;
pub mod order;

pub use number::{OrderNumber, OrderType};
pub use order::{
    AssignDeliverer, CancelOrder, ConfirmDelivery, ConfirmPickup, DelivererAssigned,
    DeliveryConfirmed, Order, OrderCancelled, OrderCommand, OrderEvent, OrderId, OrderItem,
    OrderLine, OrderPlaced, OrderStatus, PickupConfirmed, PlaceOrder, RecordSubstitution,
    SubstitutionRecord, SubstitutionRecorded,
};
