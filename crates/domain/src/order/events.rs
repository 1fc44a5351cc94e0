//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId, RequestKey, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{CancellationReason, LineItem, Money, OrderStatus};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was accepted and is waiting for its saga.
    OrderPlaced(OrderPlacedData),

    /// Stock for one line item was reserved.
    StockReserved(StockReservedData),

    /// The order total was charged.
    PaymentCharged(PaymentChargedData),

    /// Every step committed.
    OrderConfirmed(OrderConfirmedData),

    /// A step failed, or the caller cancelled; compensations follow.
    CancellationStarted(CancellationStartedData),

    /// A committed step was undone.
    StepCompensated(StepCompensatedData),

    /// A compensation gave up and needs manual reconciliation.
    CompensationFailed(CompensationFailedData),

    /// Compensation finished.
    OrderCancelled(OrderCancelledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::StockReserved(_) => "StockReserved",
            OrderEvent::PaymentCharged(_) => "PaymentCharged",
            OrderEvent::OrderConfirmed(_) => "OrderConfirmed",
            OrderEvent::CancellationStarted(_) => "CancellationStarted",
            OrderEvent::StepCompensated(_) => "StepCompensated",
            OrderEvent::CompensationFailed(_) => "CompensationFailed",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}

impl OrderEvent {
    /// Returns the status this event moves the order into, if it changes status.
    ///
    /// `StockReserved` only moves the order when it is still `PENDING`; the
    /// aggregate decides that, so it reports `StockReserved` here unconditionally.
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self {
            OrderEvent::OrderPlaced(_) => Some(OrderStatus::Pending),
            OrderEvent::StockReserved(_) => Some(OrderStatus::StockReserved),
            OrderEvent::OrderConfirmed(_) => Some(OrderStatus::Confirmed),
            OrderEvent::CancellationStarted(_) => Some(OrderStatus::Cancelling),
            OrderEvent::OrderCancelled(_) => Some(OrderStatus::Cancelled),
            OrderEvent::PaymentCharged(_)
            | OrderEvent::StepCompensated(_)
            | OrderEvent::CompensationFailed(_) => None,
        }
    }

    /// Returns the time the event was recorded.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(d) => d.placed_at,
            OrderEvent::StockReserved(d) => d.reserved_at,
            OrderEvent::PaymentCharged(d) => d.charged_at,
            OrderEvent::OrderConfirmed(d) => d.confirmed_at,
            OrderEvent::CancellationStarted(d) => d.started_at,
            OrderEvent::StepCompensated(d) => d.compensated_at,
            OrderEvent::CompensationFailed(d) => d.failed_at,
            OrderEvent::OrderCancelled(d) => d.cancelled_at,
        }
    }
}

/// Data for OrderPlaced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacedData {
    /// The unique order ID.
    pub order_id: AggregateId,

    /// The user who placed (and pays for) the order.
    pub user_id: UserId,

    /// Idempotency key of the command that created the order.
    pub request_key: RequestKey,

    /// Line items, in the order they were submitted.
    pub items: Vec<LineItem>,

    /// Total amount, fixed at placement.
    pub total_amount: Money,

    pub placed_at: DateTime<Utc>,
}

/// Data for StockReserved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReservedData {
    pub product_id: ProductId,
    pub quantity: u32,

    /// Reservation reference from the inventory collaborator.
    pub reservation_id: String,

    pub reserved_at: DateTime<Utc>,
}

/// Data for PaymentCharged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentChargedData {
    /// Payment reference from the payment collaborator.
    pub payment_id: String,
    pub amount: Money,
    pub charged_at: DateTime<Utc>,
}

/// Data for OrderConfirmed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmedData {
    pub confirmed_at: DateTime<Utc>,
}

/// Data for CancellationStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationStartedData {
    pub reason: CancellationReason,
    pub started_at: DateTime<Utc>,
}

/// Data for StepCompensated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompensatedData {
    /// Name of the committed step that was undone.
    pub step: String,
    pub compensated_at: DateTime<Utc>,
}

/// Data for CompensationFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationFailedData {
    pub step: String,

    /// Last error reported by the collaborator.
    pub error: String,

    /// Attempts made before giving up.
    pub attempts: u32,

    pub failed_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: CancellationReason,

    /// True if at least one compensation failed and must be reconciled by hand.
    pub requires_reconciliation: bool,

    pub cancelled_at: DateTime<Utc>,
}

// Convenience constructors for events
impl OrderEvent {
    /// Creates an OrderPlaced event.
    pub fn order_placed(
        order_id: AggregateId,
        user_id: UserId,
        request_key: RequestKey,
        items: Vec<LineItem>,
    ) -> Self {
        let total_amount = items.iter().map(LineItem::line_total).sum();
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            user_id,
            request_key,
            items,
            total_amount,
            placed_at: Utc::now(),
        })
    }

    /// Creates a StockReserved event.
    pub fn stock_reserved(
        product_id: ProductId,
        quantity: u32,
        reservation_id: impl Into<String>,
    ) -> Self {
        OrderEvent::StockReserved(StockReservedData {
            product_id,
            quantity,
            reservation_id: reservation_id.into(),
            reserved_at: Utc::now(),
        })
    }

    /// Creates a PaymentCharged event.
    pub fn payment_charged(payment_id: impl Into<String>, amount: Money) -> Self {
        OrderEvent::PaymentCharged(PaymentChargedData {
            payment_id: payment_id.into(),
            amount,
            charged_at: Utc::now(),
        })
    }

    /// Creates an OrderConfirmed event.
    pub fn order_confirmed() -> Self {
        OrderEvent::OrderConfirmed(OrderConfirmedData {
            confirmed_at: Utc::now(),
        })
    }

    /// Creates a CancellationStarted event.
    pub fn cancellation_started(reason: CancellationReason) -> Self {
        OrderEvent::CancellationStarted(CancellationStartedData {
            reason,
            started_at: Utc::now(),
        })
    }

    /// Creates a StepCompensated event.
    pub fn step_compensated(step: impl Into<String>) -> Self {
        OrderEvent::StepCompensated(StepCompensatedData {
            step: step.into(),
            compensated_at: Utc::now(),
        })
    }

    /// Creates a CompensationFailed event.
    pub fn compensation_failed(
        step: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        OrderEvent::CompensationFailed(CompensationFailedData {
            step: step.into(),
            error: error.into(),
            attempts,
            failed_at: Utc::now(),
        })
    }

    /// Creates an OrderCancelled event.
    pub fn order_cancelled(reason: CancellationReason, requires_reconciliation: bool) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            reason,
            requires_reconciliation,
            cancelled_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::ReasonCode;

    #[test]
    fn serializes_with_type_tag() {
        let event = OrderEvent::stock_reserved(ProductId::new("SKU-001"), 3, "RES-1");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "StockReserved");
        assert_eq!(json["data"]["product_id"], "SKU-001");
        assert_eq!(json["data"]["quantity"], 3);

        let back: OrderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn placement_fixes_the_total() {
        let event = OrderEvent::order_placed(
            AggregateId::new(),
            UserId::new(),
            RequestKey::new("req-1"),
            vec![
                LineItem::new("A", 2, Money::from_cents(250)),
                LineItem::new("B", 1, Money::from_cents(100)),
            ],
        );

        match event {
            OrderEvent::OrderPlaced(data) => assert_eq!(data.total_amount.cents(), 600),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn only_lifecycle_events_carry_a_target_status() {
        let reason = CancellationReason::caller_requested("test");
        assert_eq!(
            OrderEvent::order_confirmed().target_status(),
            Some(OrderStatus::Confirmed)
        );
        assert_eq!(
            OrderEvent::order_cancelled(reason, false).target_status(),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(
            OrderEvent::payment_charged("PAY-1", Money::from_cents(1)).target_status(),
            None
        );
        assert_eq!(OrderEvent::step_compensated("x").target_status(), None);
    }

    #[test]
    fn event_type_names() {
        let reason = CancellationReason::new(ReasonCode::InsufficientStock, None, "none left");
        assert_eq!(
            OrderEvent::cancellation_started(reason).event_type(),
            "CancellationStarted"
        );
        assert_eq!(
            OrderEvent::compensation_failed("charge_payment", "gateway down", 5).event_type(),
            "CompensationFailed"
        );
    }
}
