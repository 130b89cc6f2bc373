//! Order number allocation.
//!
//! One monotonically increasing counter per order type. The in-memory
//! counters start from whatever the constructor seeds them with; a
//! persistent deployment seeds them from the highest number already issued.

use std::sync::atomic::{AtomicU64, Ordering};

use mediflow_orders::{OrderNumber, OrderType};

/// Thread-safe allocator of human-facing order numbers.
#[derive(Debug, Default)]
pub struct OrderNumberSequence {
    internal: AtomicU64,
    client: AtomicU64,
}

impl OrderNumberSequence {
    /// Counters start at zero; the first allocation per type is `…-00001`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from previously issued numbers.
    pub fn starting_after(internal: u64, client: u64) -> Self {
        Self {
            internal: AtomicU64::new(internal),
            client: AtomicU64::new(client),
        }
    }

    pub fn next(&self, order_type: OrderType) -> OrderNumber {
        let counter = match order_type {
            OrderType::Internal => &self.internal,
            OrderType::Client => &self.client,
        };
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        OrderNumber::compose(order_type, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_independent_per_type() {
        let seq = OrderNumberSequence::new();
        assert_eq!(seq.next(OrderType::Client).as_str(), "ORD-00001");
        assert_eq!(seq.next(OrderType::Client).as_str(), "ORD-00002");
        assert_eq!(seq.next(OrderType::Internal).as_str(), "INT-00001");
        assert_eq!(seq.next(OrderType::Client).as_str(), "ORD-00003");
    }

    #[test]
    fn seeded_sequence_continues_after_the_seed() {
        let seq = OrderNumberSequence::starting_after(41, 99);
        assert_eq!(seq.next(OrderType::Internal).as_str(), "INT-00042");
        assert_eq!(seq.next(OrderType::Client).as_str(), "ORD-00100");
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let seq = Arc::new(OrderNumberSequence::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let seq = Arc::clone(&seq);
            handles.push(std::thread::spawn(move || {
                (0..50).map(|_| seq.next(OrderType::Client)).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            for number in h.join().unwrap() {
                assert!(seen.insert(number.as_str().to_string()));
            }
        }
        assert_eq!(seen.len(), 200);
    }
}
