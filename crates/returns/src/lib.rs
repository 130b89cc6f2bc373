//! Return ledger domain module (event-sourced).
//!
//! Tracks units physically returned from a completed order, their disposition
//! status, and which later orders consumed them through substitution. The
//! ledger's load-bearing invariant is quantity conservation:
//!
//! `remaining_quantity + Σ used_in_orders.quantity_used = initial quantity`
//!
//! which holds after every applied event.

pub mod ledger;

pub use ledger::{
    CollectReturn, ConsumeForSubstitution, ConsumptionReversed, DisposeReturn, Disposition,
    Return, ReturnCollected, ReturnConsumed, ReturnDisposed, ReturnCommand, ReturnEvent,
    ReturnId, ReturnStatus, ReturnUsage, ReverseConsumption,
};
