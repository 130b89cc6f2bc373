use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediflow_catalog::CatalogItemId;
use mediflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use mediflow_events::Event;
use mediflow_verification::CollectionEvidence;

/// Return ledger entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnId(pub AggregateId);

impl ReturnId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReturnId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Disposition status of returned stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    /// Default on collection: may be substituted into later orders.
    AvailableForReuse,
    /// Fully consumed by substitution (`remaining_quantity = 0`).
    Used,
    /// Terminal: explicitly written off as damaged.
    Damaged,
    /// Terminal: explicitly written off (administrative force-close).
    Disposed,
}

impl ReturnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReturnStatus::Used | ReturnStatus::Damaged | ReturnStatus::Disposed)
    }
}

/// Explicit write-off target. `Used` is deliberately absent: it is reachable
/// only by substitution driving the remaining quantity to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Damaged,
    Disposed,
}

impl From<Disposition> for ReturnStatus {
    fn from(value: Disposition) -> Self {
        match value {
            Disposition::Damaged => ReturnStatus::Damaged,
            Disposition::Disposed => ReturnStatus::Disposed,
        }
    }
}

/// One substitution event that drew from this return.
///
/// `order_id` is a weak reference to the consuming order (relation + lookup
/// only; the origin order is a different relation, held on the aggregate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnUsage {
    pub order_id: AggregateId,
    pub quantity_used: u32,
    pub used_at: DateTime<Utc>,
}

/// Aggregate root: Return.
///
/// Created when a deliverer collects unused units from a completed order.
/// Mutated only by substitution (decrement) or explicit disposition; never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Return {
    id: ReturnId,
    item_id: CatalogItemId,
    /// The order this stock came back from (origin), distinct from the
    /// orders that later consume it via substitution.
    source_order_id: AggregateId,
    initial_quantity: u32,
    remaining_quantity: u32,
    status: ReturnStatus,
    used_in_orders: Vec<ReturnUsage>,
    collection: Option<CollectionEvidence>,
    /// Free-text reason supplied at collection (unopened box, over-delivery, ...).
    reason: Option<String>,
    version: u64,
    created: bool,
}

impl Return {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ReturnId) -> Self {
        Self {
            id,
            item_id: CatalogItemId::new(AggregateId::from_uuid(uuid::Uuid::nil())),
            source_order_id: AggregateId::from_uuid(uuid::Uuid::nil()),
            initial_quantity: 0,
            remaining_quantity: 0,
            status: ReturnStatus::AvailableForReuse,
            used_in_orders: Vec::new(),
            collection: None,
            reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReturnId {
        self.id
    }

    pub fn item_id(&self) -> CatalogItemId {
        self.item_id
    }

    pub fn source_order_id(&self) -> AggregateId {
        self.source_order_id
    }

    pub fn initial_quantity(&self) -> u32 {
        self.initial_quantity
    }

    pub fn remaining_quantity(&self) -> u32 {
        self.remaining_quantity
    }

    pub fn status(&self) -> ReturnStatus {
        self.status
    }

    pub fn used_in_orders(&self) -> &[ReturnUsage] {
        &self.used_in_orders
    }

    pub fn collection(&self) -> Option<&CollectionEvidence> {
        self.collection.as_ref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, ReturnStatus::AvailableForReuse)
    }

    /// Sum of all consumption drawn from this return so far.
    pub fn consumed_quantity(&self) -> u32 {
        self.used_in_orders.iter().map(|u| u.quantity_used).sum()
    }
}

impl AggregateRoot for Return {
    type Id = ReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CollectReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectReturn {
    pub return_id: ReturnId,
    pub item_id: CatalogItemId,
    pub source_order_id: AggregateId,
    pub quantity: u32,
    pub evidence: CollectionEvidence,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConsumeForSubstitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeForSubstitution {
    pub return_id: ReturnId,
    pub order_id: AggregateId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseConsumption.
///
/// Compensation path only: issued by the substitution coordinator when the
/// order-side append fails after the return was already decremented. Never
/// exposed as a caller-facing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseConsumption {
    pub return_id: ReturnId,
    pub order_id: AggregateId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DisposeReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisposeReturn {
    pub return_id: ReturnId,
    pub disposition: Disposition,
    /// Required to dispose while `remaining_quantity > 0`.
    pub operator_override: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCommand {
    CollectReturn(CollectReturn),
    ConsumeForSubstitution(ConsumeForSubstitution),
    ReverseConsumption(ReverseConsumption),
    DisposeReturn(DisposeReturn),
}

/// Event: ReturnCollected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCollected {
    pub return_id: ReturnId,
    pub item_id: CatalogItemId,
    pub source_order_id: AggregateId,
    pub quantity: u32,
    pub evidence: CollectionEvidence,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnConsumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnConsumed {
    pub return_id: ReturnId,
    pub order_id: AggregateId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ConsumptionReversed (compensation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionReversed {
    pub return_id: ReturnId,
    pub order_id: AggregateId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnDisposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDisposed {
    pub return_id: ReturnId,
    pub disposition: Disposition,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnEvent {
    ReturnCollected(ReturnCollected),
    ReturnConsumed(ReturnConsumed),
    ConsumptionReversed(ConsumptionReversed),
    ReturnDisposed(ReturnDisposed),
}

impl Event for ReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReturnEvent::ReturnCollected(_) => "returns.return.collected",
            ReturnEvent::ReturnConsumed(_) => "returns.return.consumed",
            ReturnEvent::ConsumptionReversed(_) => "returns.return.consumption_reversed",
            ReturnEvent::ReturnDisposed(_) => "returns.return.disposed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReturnEvent::ReturnCollected(e) => e.occurred_at,
            ReturnEvent::ReturnConsumed(e) => e.occurred_at,
            ReturnEvent::ConsumptionReversed(e) => e.occurred_at,
            ReturnEvent::ReturnDisposed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Return {
    type Command = ReturnCommand;
    type Event = ReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReturnEvent::ReturnCollected(e) => {
                self.id = e.return_id;
                self.item_id = e.item_id;
                self.source_order_id = e.source_order_id;
                self.initial_quantity = e.quantity;
                self.remaining_quantity = e.quantity;
                self.status = ReturnStatus::AvailableForReuse;
                self.used_in_orders.clear();
                self.collection = Some(e.evidence.clone());
                self.reason = e.reason.clone();
                self.created = true;
            }
            ReturnEvent::ReturnConsumed(e) => {
                self.remaining_quantity = self.remaining_quantity.saturating_sub(e.quantity);
                self.used_in_orders.push(ReturnUsage {
                    order_id: e.order_id,
                    quantity_used: e.quantity,
                    used_at: e.occurred_at,
                });
                if self.remaining_quantity == 0 {
                    self.status = ReturnStatus::Used;
                }
            }
            ReturnEvent::ConsumptionReversed(e) => {
                // Undo the exact usage entry this reversal compensates so the
                // conservation invariant keeps holding.
                if let Some(pos) = self
                    .used_in_orders
                    .iter()
                    .rposition(|u| u.order_id == e.order_id && u.quantity_used == e.quantity)
                {
                    self.used_in_orders.remove(pos);
                }
                self.remaining_quantity += e.quantity;
                if self.status == ReturnStatus::Used {
                    self.status = ReturnStatus::AvailableForReuse;
                }
            }
            ReturnEvent::ReturnDisposed(e) => {
                self.status = e.disposition.into();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReturnCommand::CollectReturn(cmd) => self.handle_collect(cmd),
            ReturnCommand::ConsumeForSubstitution(cmd) => self.handle_consume(cmd),
            ReturnCommand::ReverseConsumption(cmd) => self.handle_reverse(cmd),
            ReturnCommand::DisposeReturn(cmd) => self.handle_dispose(cmd),
        }
    }
}

impl Return {
    fn ensure_return_id(&self, return_id: ReturnId) -> Result<(), DomainError> {
        if self.id != return_id {
            return Err(DomainError::validation("return_id mismatch"));
        }
        Ok(())
    }

    fn handle_collect(&self, cmd: &CollectReturn) -> Result<Vec<ReturnEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("return already collected"));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::invalid_quantity(
                "returned quantity must be positive",
            ));
        }
        cmd.evidence.validate()?;

        Ok(vec![ReturnEvent::ReturnCollected(ReturnCollected {
            return_id: cmd.return_id,
            item_id: cmd.item_id,
            source_order_id: cmd.source_order_id,
            quantity: cmd.quantity,
            evidence: cmd.evidence.clone(),
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_consume(
        &self,
        cmd: &ConsumeForSubstitution,
    ) -> Result<Vec<ReturnEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("return"));
        }
        self.ensure_return_id(cmd.return_id)?;

        if !self.is_available() {
            return Err(DomainError::precondition(format!(
                "return is not available for reuse (status: {:?})",
                self.status
            )));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::invalid_quantity(
                "substituted quantity must be positive",
            ));
        }
        if cmd.quantity > self.remaining_quantity {
            return Err(DomainError::invalid_quantity(format!(
                "cannot substitute {} units, only {} remaining on return",
                cmd.quantity, self.remaining_quantity
            )));
        }

        Ok(vec![ReturnEvent::ReturnConsumed(ReturnConsumed {
            return_id: cmd.return_id,
            order_id: cmd.order_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseConsumption) -> Result<Vec<ReturnEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("return"));
        }
        self.ensure_return_id(cmd.return_id)?;

        let matching = self
            .used_in_orders
            .iter()
            .any(|u| u.order_id == cmd.order_id && u.quantity_used == cmd.quantity);
        if !matching {
            return Err(DomainError::precondition(
                "no matching consumption to reverse",
            ));
        }
        // A disposed/damaged return keeps its terminal status; only the
        // quantity bookkeeping is compensated.
        Ok(vec![ReturnEvent::ConsumptionReversed(ConsumptionReversed {
            return_id: cmd.return_id,
            order_id: cmd.order_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispose(&self, cmd: &DisposeReturn) -> Result<Vec<ReturnEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("return"));
        }
        self.ensure_return_id(cmd.return_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::precondition(format!(
                "return is already terminal (status: {:?})",
                self.status
            )));
        }
        if self.remaining_quantity > 0 && !cmd.operator_override {
            return Err(DomainError::precondition(format!(
                "return still has {} unconsumed units; disposal requires operator override",
                self.remaining_quantity
            )));
        }

        Ok(vec![ReturnEvent::ReturnDisposed(ReturnDisposed {
            return_id: cmd.return_id,
            disposition: cmd.disposition,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediflow_core::ActorId;
    use mediflow_verification::EvidenceRef;

    fn test_return_id() -> ReturnId {
        ReturnId::new(AggregateId::new())
    }

    fn test_item_id() -> CatalogItemId {
        CatalogItemId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_evidence() -> CollectionEvidence {
        CollectionEvidence {
            photo: Some(EvidenceRef::new("evidence://photos/return1").unwrap()),
            signature: None,
            collected_by: ActorId::new(),
            collected_at: test_time(),
        }
    }

    fn collected_return(quantity: u32) -> Return {
        let mut ret = Return::empty(test_return_id());
        let cmd = CollectReturn {
            return_id: ret.id_typed(),
            item_id: test_item_id(),
            source_order_id: AggregateId::new(),
            quantity,
            evidence: test_evidence(),
            reason: Some("unopened box".to_string()),
            occurred_at: test_time(),
        };
        let events = ret.handle(&ReturnCommand::CollectReturn(cmd)).unwrap();
        for e in &events {
            ret.apply(e);
        }
        ret
    }

    fn consume(ret: &mut Return, order_id: AggregateId, quantity: u32) -> Result<(), DomainError> {
        let cmd = ConsumeForSubstitution {
            return_id: ret.id_typed(),
            order_id,
            quantity,
            occurred_at: test_time(),
        };
        let events = ret.handle(&ReturnCommand::ConsumeForSubstitution(cmd))?;
        for e in &events {
            ret.apply(e);
        }
        Ok(())
    }

    fn assert_conserved(ret: &Return) {
        assert_eq!(
            ret.remaining_quantity() + ret.consumed_quantity(),
            ret.initial_quantity()
        );
    }

    #[test]
    fn collection_creates_available_return() {
        let ret = collected_return(5);
        assert_eq!(ret.status(), ReturnStatus::AvailableForReuse);
        assert_eq!(ret.remaining_quantity(), 5);
        assert_eq!(ret.initial_quantity(), 5);
        assert!(ret.collection().is_some());
        assert_conserved(&ret);
    }

    #[test]
    fn zero_quantity_collection_is_rejected() {
        let ret = Return::empty(test_return_id());
        let cmd = CollectReturn {
            return_id: ret.id_typed(),
            item_id: test_item_id(),
            source_order_id: AggregateId::new(),
            quantity: 0,
            evidence: test_evidence(),
            reason: None,
            occurred_at: test_time(),
        };
        let err = ret.handle(&ReturnCommand::CollectReturn(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn consumption_decrements_and_logs_usage() {
        let mut ret = collected_return(5);
        let order_id = AggregateId::new();

        consume(&mut ret, order_id, 3).unwrap();

        assert_eq!(ret.remaining_quantity(), 2);
        assert_eq!(ret.used_in_orders().len(), 1);
        assert_eq!(ret.used_in_orders()[0].order_id, order_id);
        assert_eq!(ret.used_in_orders()[0].quantity_used, 3);
        assert_eq!(ret.status(), ReturnStatus::AvailableForReuse);
        assert_conserved(&ret);
    }

    #[test]
    fn exhausting_the_return_marks_it_used() {
        let mut ret = collected_return(5);
        consume(&mut ret, AggregateId::new(), 5).unwrap();

        assert_eq!(ret.remaining_quantity(), 0);
        assert_eq!(ret.status(), ReturnStatus::Used);
        assert_conserved(&ret);

        // A used return accepts no further consumption.
        let err = consume(&mut ret, AggregateId::new(), 1).unwrap_err();
        assert!(matches!(err, DomainError::PreconditionFailed(_)));
    }

    #[test]
    fn over_consumption_is_rejected_not_clamped() {
        let mut ret = collected_return(4);
        let err = consume(&mut ret, AggregateId::new(), 5).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
        // Zero side effects on failure.
        assert_eq!(ret.remaining_quantity(), 4);
        assert!(ret.used_in_orders().is_empty());
    }

    #[test]
    fn reversal_restores_quantity_and_availability() {
        let mut ret = collected_return(5);
        let order_id = AggregateId::new();
        consume(&mut ret, order_id, 5).unwrap();
        assert_eq!(ret.status(), ReturnStatus::Used);

        let cmd = ReverseConsumption {
            return_id: ret.id_typed(),
            order_id,
            quantity: 5,
            occurred_at: test_time(),
        };
        let events = ret.handle(&ReturnCommand::ReverseConsumption(cmd)).unwrap();
        for e in &events {
            ret.apply(e);
        }

        assert_eq!(ret.remaining_quantity(), 5);
        assert_eq!(ret.status(), ReturnStatus::AvailableForReuse);
        assert!(ret.used_in_orders().is_empty());
        assert_conserved(&ret);
    }

    #[test]
    fn reversal_without_matching_usage_is_rejected() {
        let ret = collected_return(5);
        let cmd = ReverseConsumption {
            return_id: ret.id_typed(),
            order_id: AggregateId::new(),
            quantity: 2,
            occurred_at: test_time(),
        };
        let err = ret
            .handle(&ReturnCommand::ReverseConsumption(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::PreconditionFailed(_)));
    }

    #[test]
    fn disposal_requires_override_while_stock_remains() {
        let ret = collected_return(3);
        let cmd = DisposeReturn {
            return_id: ret.id_typed(),
            disposition: Disposition::Damaged,
            operator_override: false,
            occurred_at: test_time(),
        };
        let err = ret.handle(&ReturnCommand::DisposeReturn(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::PreconditionFailed(_)));
    }

    #[test]
    fn disposal_with_override_is_terminal() {
        let mut ret = collected_return(3);
        let cmd = DisposeReturn {
            return_id: ret.id_typed(),
            disposition: Disposition::Disposed,
            operator_override: true,
            occurred_at: test_time(),
        };
        let events = ret.handle(&ReturnCommand::DisposeReturn(cmd)).unwrap();
        for e in &events {
            ret.apply(e);
        }
        assert_eq!(ret.status(), ReturnStatus::Disposed);
        assert!(!ret.is_available());

        // Terminal: no further disposal or consumption.
        let again = DisposeReturn {
            return_id: ret.id_typed(),
            disposition: Disposition::Damaged,
            operator_override: true,
            occurred_at: test_time(),
        };
        let err = ret.handle(&ReturnCommand::DisposeReturn(again)).unwrap_err();
        assert!(matches!(err, DomainError::PreconditionFailed(_)));

        let err = consume(&mut ret, AggregateId::new(), 1).unwrap_err();
        assert!(matches!(err, DomainError::PreconditionFailed(_)));
    }

    mod conservation {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Quantity conservation holds across any interleaving of valid
            /// consume/reverse operations.
            #[test]
            fn holds_across_random_operations(
                initial in 1u32..500,
                ops in proptest::collection::vec((0u32..100, proptest::bool::ANY), 0..40),
            ) {
                let mut ret = collected_return(initial);
                let order_id = AggregateId::new();

                for (qty, reverse) in ops {
                    if reverse {
                        let cmd = ReverseConsumption {
                            return_id: ret.id_typed(),
                            order_id,
                            quantity: qty,
                            occurred_at: test_time(),
                        };
                        if let Ok(events) = ret.handle(&ReturnCommand::ReverseConsumption(cmd)) {
                            for e in &events {
                                ret.apply(e);
                            }
                        }
                    } else {
                        let _ = consume(&mut ret, order_id, qty);
                    }

                    prop_assert_eq!(
                        ret.remaining_quantity() + ret.consumed_quantity(),
                        ret.initial_quantity()
                    );
                    // Status reflects exhaustion exactly.
                    prop_assert_eq!(
                        ret.status() == ReturnStatus::Used,
                        ret.remaining_quantity() == 0
                    );
                }
            }
        }
    }
}
