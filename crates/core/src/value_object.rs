//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" a
/// value object, create a new one. Evidence records and order numbers are the
/// canonical examples in this domain: once attached, they never change.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
