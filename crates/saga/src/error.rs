//! Saga error types.

use std::time::Duration;

use common::{AggregateId, ProductId};
use domain::{DomainError, OrderStatus, ReasonCode};
use event_store::EventStoreError;
use idempotency::IdempotencyError;
use ledger::LedgerError;
use thiserror::Error;

/// A failure reported by a collaborator (inventory, payment, event sink).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// A conditional write lost a race; re-read and try again.
    #[error("Version conflict on {0}")]
    VersionConflict(String),

    /// The collaborator did not answer in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The collaborator is down or its circuit breaker is open.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Insufficient stock of {product_id}: {available} available, {requested} requested")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// The reservation already left the shelf for good and cannot be undone.
    #[error("Reservation of {product_id} for order {order_id} was already consumed")]
    ReservationConsumed {
        product_id: ProductId,
        order_id: AggregateId,
    },

    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    #[error("Internal service error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Transient failures are retried; everything else ends the step at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::VersionConflict(_)
                | ServiceError::Timeout { .. }
                | ServiceError::Unavailable(_)
        )
    }

    /// Reason code recorded when this error cancels an order.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            ServiceError::InsufficientStock { .. } => ReasonCode::InsufficientStock,
            ServiceError::PaymentDeclined(_) => ReasonCode::PaymentDeclined,
            e if e.is_transient() => ReasonCode::RetriesExhausted,
            _ => ReasonCode::StepRejected,
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownProduct(product_id) => ServiceError::UnknownProduct(product_id),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// Errors that can occur while placing or orchestrating an order.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The command was malformed and nothing was executed.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Idempotency error: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A collaborator call failed outside of a compensable step.
    #[error("Collaborator error: {0}")]
    Service(#[from] ServiceError),

    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// The step list cannot be executed as given.
    #[error("Invalid saga plan: {0}")]
    InvalidPlan(String),

    /// Caller cancellation arrived after the saga committed work.
    #[error("Cannot cancel order {order_id} in {status}: {reason}")]
    CancellationRejected {
        order_id: AggregateId,
        status: OrderStatus,
        reason: String,
    },
}

impl SagaError {
    /// Returns true if an order write lost an optimistic-concurrency race.
    pub fn is_concurrency_conflict(&self) -> bool {
        match self {
            SagaError::Domain(e) => e.is_concurrency_conflict(),
            SagaError::EventStore(e) => e.is_conflict(),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ServiceError::VersionConflict("P".into()).is_transient());
        assert!(ServiceError::Unavailable("breaker open".into()).is_transient());
        assert!(
            ServiceError::Timeout {
                operation: "charge_payment".into(),
                after: Duration::from_millis(10),
            }
            .is_transient()
        );
        assert!(!ServiceError::PaymentDeclined("card".into()).is_transient());
        assert!(!ServiceError::UnknownProduct(ProductId::new("X")).is_transient());
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            ServiceError::InsufficientStock {
                product_id: ProductId::new("P"),
                available: 2,
                requested: 3,
            }
            .reason_code(),
            ReasonCode::InsufficientStock
        );
        assert_eq!(
            ServiceError::Unavailable("down".into()).reason_code(),
            ReasonCode::RetriesExhausted
        );
        assert_eq!(
            ServiceError::Internal("boom".into()).reason_code(),
            ReasonCode::StepRejected
        );
    }

    #[test]
    fn test_ledger_errors_map_to_service_errors() {
        let unknown: ServiceError = LedgerError::UnknownProduct(ProductId::new("Z")).into();
        assert_eq!(unknown, ServiceError::UnknownProduct(ProductId::new("Z")));

        let overflow: ServiceError = LedgerError::Overflow(ProductId::new("Z")).into();
        assert!(matches!(overflow, ServiceError::Internal(_)));
    }
}
