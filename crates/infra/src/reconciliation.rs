//! Billing reconciliation for completed orders.
//!
//! Pure calculation: given an order's committed lines and the stock that
//! came back from that order, produce the per-item quantities the client is
//! actually billed for. Nothing here touches storage.

use mediflow_catalog::CatalogItemId;
use mediflow_orders::Order;

use crate::read_model::ReturnedStock;

/// One billable line of a reconciliation report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationLine {
    pub catalog_item_id: CatalogItemId,
    /// Quantity committed at placement.
    pub original_quantity: u32,
    /// Quantity collected back from this order.
    pub returned_quantity: u32,
    /// `original - returned`, floored at zero. What the client pays for.
    pub used_quantity: u32,
    /// Unit price frozen at placement.
    pub unit_price: u64,
    /// `used_quantity × unit_price`.
    pub billable_total: u64,
}

/// Compute the reconciliation report for an order.
///
/// `returns` must be the stock collected FROM this order (the origin
/// relation). Substitutions that consumed INTO this order are a separate
/// relation and play no part here.
///
/// Lines where every unit came back are omitted: there is nothing to bill.
/// Returned quantities in excess of the committed quantity floor at zero
/// rather than producing a credit.
pub fn reconcile(order: &Order, returns: &[ReturnedStock]) -> Vec<ReconciliationLine> {
    order
        .items()
        .iter()
        .filter_map(|item| {
            let returned: u32 = returns
                .iter()
                .filter(|r| r.item_id == item.catalog_item_id)
                .map(|r| r.returned_quantity)
                .sum();
            let used = item.quantity.saturating_sub(returned);
            if used == 0 {
                return None;
            }
            Some(ReconciliationLine {
                catalog_item_id: item.catalog_item_id,
                original_quantity: item.quantity,
                returned_quantity: returned,
                used_quantity: used,
                unit_price: item.unit_price,
                billable_total: u64::from(used) * item.unit_price,
            })
        })
        .collect()
}
