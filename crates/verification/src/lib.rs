//! Fulfillment verification evidence.
//!
//! Not an upload pipeline: these are **gates**. Each record is checked for
//! structural well-formedness before it is accepted, and its presence is the
//! precondition consumed by the order state machine. Pickup is
//! deliverer-attested (photo only); delivery is customer-attested (photo,
//! signature and customer name). That asymmetry is deliberate.

pub mod evidence;

pub use evidence::{CollectionEvidence, DeliveryEvidence, EvidenceRef, PickupEvidence};
