use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediflow_core::{ActorId, DomainError, DomainResult, ValueObject};

/// Opaque reference to a stored evidence payload (photo, signature scan).
///
/// The storage service hands back a stable reference; this core never looks
/// inside the blob. A reference must be non-empty and printable; rejecting a
/// malformed one is a client error, not a server fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRef(String);

impl EvidenceRef {
    pub fn new(reference: impl Into<String>) -> DomainResult<Self> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(DomainError::validation("evidence reference must not be empty"));
        }
        if reference.chars().any(char::is_control) {
            return Err(DomainError::validation(
                "evidence reference contains control characters",
            ));
        }
        Ok(Self(reference))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for EvidenceRef {}

/// Evidence gating `processing|pending → picked_up`.
///
/// Deliverer-attested: a photo is sufficient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupEvidence {
    pub photo: Option<EvidenceRef>,
    pub captured_at: DateTime<Utc>,
}

impl PickupEvidence {
    /// Check the gate. Failures name the missing requirement.
    pub fn validate(&self) -> DomainResult<()> {
        if self.photo.is_none() {
            return Err(DomainError::precondition("pickup verification requires a photo"));
        }
        Ok(())
    }
}

impl ValueObject for PickupEvidence {}

/// Evidence gating `picked_up → completed`.
///
/// Customer-attested, strictly more demanding than pickup: photo, customer
/// signature and customer name must all be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvidence {
    pub photo: Option<EvidenceRef>,
    pub signature: Option<EvidenceRef>,
    pub customer_name: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl DeliveryEvidence {
    /// Check the gate. Failures name the missing requirement.
    pub fn validate(&self) -> DomainResult<()> {
        if self.photo.is_none() {
            return Err(DomainError::precondition("delivery verification requires a photo"));
        }
        if self.signature.is_none() {
            return Err(DomainError::precondition(
                "delivery verification requires a customer signature",
            ));
        }
        match &self.customer_name {
            None => Err(DomainError::precondition(
                "delivery verification requires the customer name",
            )),
            Some(name) if name.trim().is_empty() => Err(DomainError::precondition(
                "delivery verification requires a non-empty customer name",
            )),
            Some(_) => Ok(()),
        }
    }
}

impl ValueObject for DeliveryEvidence {}

/// Evidence attached when a deliverer collects unused units back from a
/// completed order. Immutable once set on the return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEvidence {
    pub photo: Option<EvidenceRef>,
    pub signature: Option<EvidenceRef>,
    pub collected_by: ActorId,
    pub collected_at: DateTime<Utc>,
}

impl CollectionEvidence {
    /// Check the gate: collection is deliverer-attested (photo + collector).
    pub fn validate(&self) -> DomainResult<()> {
        if self.photo.is_none() {
            return Err(DomainError::precondition("return collection requires a photo"));
        }
        Ok(())
    }
}

impl ValueObject for CollectionEvidence {}
