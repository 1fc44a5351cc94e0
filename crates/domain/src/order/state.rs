//! Order state machine.

use chrono::{DateTime, Utc};
use event_store::Version;
use serde::{Deserialize, Serialize};

use super::OrderError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PENDING ──► STOCK_RESERVED ──► CONFIRMED
///    │              │
///    └──────────────┴──► CANCELLING ──► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order recorded, no step committed yet.
    #[default]
    Pending,

    /// At least one stock reservation has been committed.
    StockReserved,

    /// Every step committed (terminal state).
    Confirmed,

    /// A step failed; compensations are running.
    Cancelling,

    /// Compensation finished (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, StockReserved)
                | (StockReserved, Confirmed)
                | (Pending, Cancelling)
                | (StockReserved, Cancelling)
                | (Cancelling, Cancelled)
        )
    }

    /// The single transition-validation function of the state machine.
    pub fn validate_transition(self, next: OrderStatus) -> Result<(), OrderError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Returns true if forward steps may still commit in this status.
    pub fn accepts_forward_steps(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::StockReserved)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::StockReserved => "STOCK_RESERVED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Cancelling => "CANCELLING",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the order's append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// Previous status; None for the placement that created the order.
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    /// Order version produced by the event that caused the transition.
    pub version: Version,
    pub at: DateTime<Utc>,
}
