//! End-to-end scenarios through the service facade: full lifecycle,
//! collection, substitution (including its failure atomicity), and
//! reconciliation, all against the in-memory store and bus.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use mediflow_catalog::{CatalogItem, CatalogItemId, InMemoryCatalog};
use mediflow_core::{ActorId, AggregateId, ClientId};
use mediflow_events::{EventEnvelope, InMemoryEventBus};
use mediflow_orders::{OrderId, OrderStatus, OrderType};
use mediflow_returns::{Disposition, ReturnId, ReturnStatus};
use mediflow_verification::{
    CollectionEvidence, DeliveryEvidence, EvidenceRef, PickupEvidence,
};

use crate::command_dispatcher::DispatchError;
use crate::event_store::InMemoryEventStore;
use crate::order_numbers::OrderNumberSequence;
use crate::service::{CollectedItem, FulfillmentService};

type TestService = FulfillmentService<
    Arc<InMemoryEventStore>,
    InMemoryEventBus<EventEnvelope<JsonValue>>,
    Arc<InMemoryCatalog>,
>;

struct Fixture {
    service: TestService,
    gloves: CatalogItemId,
    masks: CatalogItemId,
}

fn fixture() -> Fixture {
    mediflow_observability::init_for_tests();

    let catalog = Arc::new(InMemoryCatalog::new());
    let gloves = CatalogItemId::new(AggregateId::new());
    let masks = CatalogItemId::new(AggregateId::new());
    catalog.insert(CatalogItem {
        id: gloves,
        display_name: "Nitrile gloves (M), box of 100".to_string(),
        unit_price: 1250,
        batch: Some("B-2207".to_string()),
        expiry: None,
    });
    catalog.insert(CatalogItem {
        id: masks,
        display_name: "Surgical masks, box of 50".to_string(),
        unit_price: 640,
        batch: None,
        expiry: None,
    });

    let service = FulfillmentService::new(
        Arc::new(InMemoryEventStore::new()),
        InMemoryEventBus::new(),
        catalog,
        OrderNumberSequence::new(),
    );
    Fixture {
        service,
        gloves,
        masks,
    }
}

fn pickup_evidence() -> PickupEvidence {
    PickupEvidence {
        photo: Some(EvidenceRef::new("evidence://photos/pickup-1").unwrap()),
        captured_at: Utc::now(),
    }
}

fn delivery_evidence() -> DeliveryEvidence {
    DeliveryEvidence {
        photo: Some(EvidenceRef::new("evidence://photos/delivery-1").unwrap()),
        signature: Some(EvidenceRef::new("evidence://signatures/delivery-1").unwrap()),
        customer_name: Some("K. Osei".to_string()),
        captured_at: Utc::now(),
    }
}

fn collection_evidence(collected_by: ActorId) -> CollectionEvidence {
    CollectionEvidence {
        photo: Some(EvidenceRef::new("evidence://photos/collect-1").unwrap()),
        signature: Some(EvidenceRef::new("evidence://signatures/collect-1").unwrap()),
        collected_by,
        collected_at: Utc::now(),
    }
}

/// Drive an order from placement to completed delivery.
fn completed_order(fx: &Fixture, lines: Vec<(CatalogItemId, u32)>) -> (OrderId, ActorId) {
    let deliverer = ActorId::new();
    let placed = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), lines)
        .unwrap();
    fx.service
        .assign_deliverer(placed.order_id, deliverer)
        .unwrap();
    fx.service
        .confirm_pickup(placed.order_id, deliverer, pickup_evidence())
        .unwrap();
    fx.service
        .confirm_delivery(placed.order_id, deliverer, delivery_evidence())
        .unwrap();
    (placed.order_id, deliverer)
}

fn collect_one(fx: &Fixture, order_id: OrderId, item_id: CatalogItemId, quantity: u32) -> ReturnId {
    let deliverer = ActorId::new();
    let ids = fx
        .service
        .collect_returns(
            order_id,
            vec![CollectedItem {
                item_id,
                quantity,
                reason: Some("unopened surplus".to_string()),
            }],
            collection_evidence(deliverer),
        )
        .unwrap();
    ids[0]
}

#[test]
fn full_cycle_place_deliver_return_substitute() {
    let fx = fixture();

    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 20)]);
    let order = fx.service.load_order(completed).unwrap();
    assert_eq!(order.status(), OrderStatus::Completed);
    assert!(order.pickup_verification().is_some());
    assert!(order.delivery_verification().is_some());
    assert_eq!(order.number().unwrap().as_str(), "ORD-00001");

    // 5 boxes come back unopened.
    let return_id = collect_one(&fx, completed, fx.gloves, 5);
    let available = fx.service.list_available_returns(fx.gloves).unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].remaining_quantity, 5);

    // A second order takes the returned stock instead of fresh inventory.
    let second = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 10)])
        .unwrap();
    let operator = ActorId::new();
    fx.service
        .substitute_item(second.order_id, fx.gloves, return_id, 5, operator)
        .unwrap();

    let ret = fx.service.load_return(return_id).unwrap();
    assert_eq!(ret.status(), ReturnStatus::Used);
    assert_eq!(ret.remaining_quantity(), 0);
    assert_eq!(ret.used_in_orders().len(), 1);
    assert_eq!(ret.used_in_orders()[0].order_id, second.order_id.0);
    assert_eq!(ret.used_in_orders()[0].quantity_used, 5);

    let order = fx.service.load_order(second.order_id).unwrap();
    let item = order.item(fx.gloves).unwrap();
    assert_eq!(item.quantity, 10, "committed quantity untouched");
    assert_eq!(item.substituted_quantity(), 5);
    assert!(order.has_substitutions());

    assert!(fx.service.list_available_returns(fx.gloves).unwrap().is_empty());
}

#[test]
fn substitution_across_items_is_rejected_without_side_effects() {
    let fx = fixture();

    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 10)]);
    let return_id = collect_one(&fx, completed, fx.gloves, 5);

    let target = fx
        .service
        .place_order(
            OrderType::Client,
            Some(ClientId::new()),
            vec![(fx.masks, 10)],
        )
        .unwrap();

    let err = fx
        .service
        .substitute_item(target.order_id, fx.masks, return_id, 2, ActorId::new())
        .unwrap_err();
    assert!(matches!(err, DispatchError::ItemMismatch(_)));

    // Neither side moved.
    let ret = fx.service.load_return(return_id).unwrap();
    assert_eq!(ret.remaining_quantity(), 5);
    assert_eq!(ret.status(), ReturnStatus::AvailableForReuse);
    assert!(ret.used_in_orders().is_empty());
    let order = fx.service.load_order(target.order_id).unwrap();
    assert!(!order.has_substitutions());
}

#[test]
fn substitution_respects_both_quantity_bounds() {
    let fx = fixture();

    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 10)]);
    let return_id = collect_one(&fx, completed, fx.gloves, 5);

    let target = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 3)])
        .unwrap();

    // More than the return holds.
    let err = fx
        .service
        .substitute_item(target.order_id, fx.gloves, return_id, 6, ActorId::new())
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidQuantity(_)));

    // More than the line's open commitment (3).
    let err = fx
        .service
        .substitute_item(target.order_id, fx.gloves, return_id, 4, ActorId::new())
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidQuantity(_)));

    // Zero.
    let err = fx
        .service
        .substitute_item(target.order_id, fx.gloves, return_id, 0, ActorId::new())
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidQuantity(_)));

    let ret = fx.service.load_return(return_id).unwrap();
    assert_eq!(ret.remaining_quantity(), 5, "rejections leave the ledger untouched");
}

#[test]
fn concurrent_substitutions_of_the_same_stock_elect_one_winner() {
    let fx = fixture();

    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 10)]);
    let return_id = collect_one(&fx, completed, fx.gloves, 5);

    let first = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 5)])
        .unwrap();
    let second = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 5)])
        .unwrap();

    let service = Arc::new(fx.service);
    let spawn = |order_id: OrderId| {
        let service = Arc::clone(&service);
        std::thread::spawn(move || {
            service.substitute_item(order_id, fx.gloves, return_id, 5, ActorId::new())
        })
    };
    let a = spawn(first.order_id);
    let b = spawn(second.order_id);
    let results = [a.join().unwrap(), b.join().unwrap()];

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one of the competing substitutions commits");

    // Conservation: all 5 units went to exactly one order, never negative.
    let ret = service.load_return(return_id).unwrap();
    assert_eq!(ret.remaining_quantity(), 0);
    assert_eq!(ret.consumed_quantity(), 5);
    assert_eq!(ret.used_in_orders().len(), 1);
}

#[test]
fn collection_requires_a_completed_source_order() {
    let fx = fixture();

    let placed = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 5)])
        .unwrap();
    let err = fx
        .service
        .collect_returns(
            placed.order_id,
            vec![CollectedItem {
                item_id: fx.gloves,
                quantity: 1,
                reason: None,
            }],
            collection_evidence(ActorId::new()),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));

    // Unknown order.
    let err = fx
        .service
        .collect_returns(
            OrderId::new(AggregateId::new()),
            vec![CollectedItem {
                item_id: fx.gloves,
                quantity: 1,
                reason: None,
            }],
            collection_evidence(ActorId::new()),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound(_)));
}

#[test]
fn collection_validates_lines_against_the_source_order() {
    let fx = fixture();
    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 5)]);

    // Item never on the order.
    let err = fx
        .service
        .collect_returns(
            completed,
            vec![CollectedItem {
                item_id: fx.masks,
                quantity: 1,
                reason: None,
            }],
            collection_evidence(ActorId::new()),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::ItemMismatch(_)));

    // More than was delivered.
    let err = fx
        .service
        .collect_returns(
            completed,
            vec![CollectedItem {
                item_id: fx.gloves,
                quantity: 6,
                reason: None,
            }],
            collection_evidence(ActorId::new()),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidQuantity(_)));

    assert!(fx.service.list_available_returns(fx.gloves).unwrap().is_empty());
}

#[test]
fn cancelled_orders_reject_substitution() {
    let fx = fixture();

    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 10)]);
    let return_id = collect_one(&fx, completed, fx.gloves, 5);

    let target = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 5)])
        .unwrap();
    fx.service
        .cancel_order(target.order_id, "client withdrew the request")
        .unwrap();

    let err = fx
        .service
        .substitute_item(target.order_id, fx.gloves, return_id, 2, ActorId::new())
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));
    assert_eq!(
        fx.service.load_return(return_id).unwrap().remaining_quantity(),
        5
    );
}

#[test]
fn disposing_live_stock_requires_the_override() {
    let fx = fixture();

    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 10)]);
    let return_id = collect_one(&fx, completed, fx.gloves, 4);

    let err = fx
        .service
        .dispose_return(return_id, Disposition::Damaged, false)
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));

    fx.service
        .dispose_return(return_id, Disposition::Damaged, true)
        .unwrap();
    let ret = fx.service.load_return(return_id).unwrap();
    assert_eq!(ret.status(), ReturnStatus::Damaged);

    // Written-off stock is gone from availability and from substitution.
    assert!(fx.service.list_available_returns(fx.gloves).unwrap().is_empty());
    let target = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 5)])
        .unwrap();
    let err = fx
        .service
        .substitute_item(target.order_id, fx.gloves, return_id, 1, ActorId::new())
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));
}

#[test]
fn reconciliation_bills_net_of_what_came_back() {
    let fx = fixture();

    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 10), (fx.masks, 4)]);
    collect_one(&fx, completed, fx.gloves, 3);

    let report = fx.service.reconcile_order(completed).unwrap();
    assert_eq!(report.len(), 2);
    let gloves = report
        .iter()
        .find(|l| l.catalog_item_id == fx.gloves)
        .unwrap();
    assert_eq!(gloves.original_quantity, 10);
    assert_eq!(gloves.returned_quantity, 3);
    assert_eq!(gloves.used_quantity, 7);
    assert_eq!(gloves.billable_total, 7 * 1250);
    let masks = report
        .iter()
        .find(|l| l.catalog_item_id == fx.masks)
        .unwrap();
    assert_eq!(masks.used_quantity, 4);
}

#[test]
fn fully_returned_lines_drop_out_of_the_report() {
    let fx = fixture();

    let (completed, _) = completed_order(&fx, vec![(fx.gloves, 5), (fx.masks, 2)]);
    collect_one(&fx, completed, fx.gloves, 5);

    let report = fx.service.reconcile_order(completed).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].catalog_item_id, fx.masks);
}

#[test]
fn reconciliation_counts_origin_not_consumption() {
    let fx = fixture();

    // Stock returned from the first order and consumed into the second must
    // still credit the first order in full.
    let (origin, _) = completed_order(&fx, vec![(fx.gloves, 10)]);
    let return_id = collect_one(&fx, origin, fx.gloves, 4);

    let (consumer, _) = completed_order(&fx, vec![(fx.gloves, 8)]);
    fx.service
        .substitute_item(consumer, fx.gloves, return_id, 4, ActorId::new())
        .unwrap();

    let origin_report = fx.service.reconcile_order(origin).unwrap();
    assert_eq!(origin_report[0].returned_quantity, 4);
    assert_eq!(origin_report[0].used_quantity, 6);

    // The consuming order is billed on its own committed lines; substitution
    // changes sourcing, not price.
    let consumer_report = fx.service.reconcile_order(consumer).unwrap();
    assert_eq!(consumer_report[0].returned_quantity, 0);
    assert_eq!(consumer_report[0].used_quantity, 8);
}

#[test]
fn reconciliation_requires_a_completed_order() {
    let fx = fixture();
    let placed = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 2)])
        .unwrap();
    let err = fx.service.reconcile_order(placed.order_id).unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));
}

#[test]
fn placement_rejects_unknown_catalog_items() {
    let fx = fixture();
    let unknown = CatalogItemId::new(AggregateId::new());
    let err = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(unknown, 1)])
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound(_)));
}

#[test]
fn evidence_gates_hold_through_the_service() {
    let fx = fixture();
    let deliverer = ActorId::new();
    let placed = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 1)])
        .unwrap();
    fx.service.assign_deliverer(placed.order_id, deliverer).unwrap();

    let err = fx
        .service
        .confirm_pickup(
            placed.order_id,
            deliverer,
            PickupEvidence {
                photo: None,
                captured_at: Utc::now(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));

    fx.service
        .confirm_pickup(placed.order_id, deliverer, pickup_evidence())
        .unwrap();

    let err = fx
        .service
        .confirm_delivery(
            placed.order_id,
            deliverer,
            DeliveryEvidence {
                photo: Some(EvidenceRef::new("evidence://photos/delivery-2").unwrap()),
                signature: None,
                customer_name: None,
                captured_at: Utc::now(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));
    assert_eq!(
        fx.service.load_order(placed.order_id).unwrap().status(),
        OrderStatus::PickedUp
    );
}

#[test]
fn substitution_target_may_differ_in_status_but_not_be_cancelled() {
    let fx = fixture();

    // Substitution into a picked-up (in-flight) order is allowed; the line's
    // open commitment is the only order-side quantity bound.
    let (origin, _) = completed_order(&fx, vec![(fx.gloves, 10)]);
    let return_id = collect_one(&fx, origin, fx.gloves, 2);

    let deliverer = ActorId::new();
    let target = fx
        .service
        .place_order(OrderType::Client, Some(ClientId::new()), vec![(fx.gloves, 4)])
        .unwrap();
    fx.service.assign_deliverer(target.order_id, deliverer).unwrap();
    fx.service
        .confirm_pickup(target.order_id, deliverer, pickup_evidence())
        .unwrap();

    fx.service
        .substitute_item(target.order_id, fx.gloves, return_id, 2, ActorId::new())
        .unwrap();
    let order = fx.service.load_order(target.order_id).unwrap();
    assert_eq!(order.status(), OrderStatus::PickedUp);
    assert!(order.has_substitutions());
}
