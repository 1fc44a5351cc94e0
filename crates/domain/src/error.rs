//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The order rejected the command.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// The targeted order has no history.
    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if the write lost a race against another writer.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }

    /// Returns true if the command asked for a transition the state machine forbids.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            DomainError::Order(OrderError::InvalidTransition { .. })
        )
    }
}
