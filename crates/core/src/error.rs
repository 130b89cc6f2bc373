//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Each variant
/// maps to a distinct caller-visible outcome: `NotFound`, `ItemMismatch` and
/// `InvalidQuantity` are not retryable; `Conflict` may succeed on retry.
/// Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced order, return or order item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state-machine or verification-evidence gate was not satisfied.
    /// The message names the missing requirement, never a generic failure.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A quantity was non-positive or exceeded its limit. Over-large
    /// quantities are rejected outright, never clamped.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A return's catalog item does not match the order item it was offered
    /// against. Cross-item substitution is forbidden.
    #[error("item mismatch: {0}")]
    ItemMismatch(String),

    /// Concurrent modification detected (stale version / CAS failure).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The acting party is not the assigned deliverer/operator.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A value failed structural validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn item_mismatch(msg: impl Into<String>) -> Self {
        Self::ItemMismatch(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
