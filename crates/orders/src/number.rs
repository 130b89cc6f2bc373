//! Human-readable order numbers.

use serde::{Deserialize, Serialize};

use mediflow_core::{DomainError, DomainResult, ValueObject};

/// Distinguishes internally-placed restock orders from client-placed orders.
///
/// Affects required fields at placement (client orders must name a client),
/// not the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Internal,
    Client,
}

impl OrderType {
    /// Number prefix for this order type.
    pub fn prefix(self) -> &'static str {
        match self {
            OrderType::Internal => "INT",
            OrderType::Client => "ORD",
        }
    }
}

/// Globally unique, human-readable order number, e.g. `ORD-00042`.
///
/// Assigned once at placement from a per-prefix sequence and immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Compose a number from its type prefix and sequence value.
    pub fn compose(order_type: OrderType, sequence: u64) -> Self {
        Self(format!("{}-{:05}", order_type.prefix(), sequence))
    }

    /// Accept an externally supplied number (e.g. replayed from storage).
    pub fn parse(raw: impl Into<String>) -> DomainResult<Self> {
        let raw = raw.into();
        let valid = raw
            .split_once('-')
            .is_some_and(|(prefix, seq)| {
                !prefix.is_empty()
                    && prefix.chars().all(|c| c.is_ascii_uppercase())
                    && !seq.is_empty()
                    && seq.chars().all(|c| c.is_ascii_digit())
            });
        if !valid {
            return Err(DomainError::invalid_id(format!(
                "malformed order number: {raw}"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ValueObject for OrderNumber {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_pads_sequence() {
        assert_eq!(OrderNumber::compose(OrderType::Client, 42).as_str(), "ORD-00042");
        assert_eq!(OrderNumber::compose(OrderType::Internal, 7).as_str(), "INT-00007");
    }

    #[test]
    fn parse_accepts_composed_numbers() {
        let n = OrderNumber::compose(OrderType::Client, 123456);
        assert_eq!(OrderNumber::parse(n.as_str()).unwrap(), n);
    }

    #[test]
    fn parse_rejects_malformed_numbers() {
        for raw in ["", "ORD", "-00042", "ord-00042", "ORD-42a"] {
            assert!(matches!(
                OrderNumber::parse(raw),
                Err(DomainError::InvalidId(_))
            ));
        }
    }
}
