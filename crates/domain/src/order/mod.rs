//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::*;
pub use events::{
    CancellationStartedData, CompensationFailedData, OrderCancelledData, OrderConfirmedData,
    OrderEvent, OrderPlacedData, PaymentChargedData, StepCompensatedData, StockReservedData,
};
pub use service::OrderService;
pub use state::{OrderStatus, StatusTransition};
pub use value_objects::{
    CancellationReason, CommittedStep, CompensationFailureRecord, LineItem, Money, PaymentRecord,
    ReasonCode, ReservationRecord, step_names,
};

use common::ProductId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The state machine forbids moving between these two statuses.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The action is not allowed while the order is in this status.
    #[error("Cannot {action} while order is {status}")]
    InvalidStateForAction {
        status: OrderStatus,
        action: &'static str,
    },

    /// Order was already placed.
    #[error("Order already placed")]
    AlreadyPlaced,

    /// The command targets an order that was never placed.
    #[error("Order has not been placed")]
    NotPlaced,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: ProductId, price: i64 },

    /// The same product appears on more than one line.
    #[error("Duplicate line item for product {0}")]
    DuplicateProduct(ProductId),

    /// A reservation does not match any line item of the order.
    #[error("Reservation for {product_id} x{quantity} does not match the order lines")]
    ReservationMismatch { product_id: ProductId, quantity: u32 },

    /// The step outcome has already been recorded.
    #[error("Step already committed: {0}")]
    StepAlreadyCommitted(String),

    /// The step was never committed, so it cannot be compensated.
    #[error("Step not committed: {0}")]
    StepNotCommitted(String),

    /// The step has already been compensated or escalated.
    #[error("Step already compensated: {0}")]
    StepAlreadyCompensated(String),

    /// Charged amount differs from the order total.
    #[error("Payment amount {charged} does not match order total {total}")]
    PaymentAmountMismatch { charged: Money, total: Money },

    /// Confirmation attempted before every required step committed.
    #[error("Order is missing committed steps: {0:?}")]
    StepsOutstanding(Vec<String>),

    /// Cancellation finished while compensations were still pending.
    #[error("Compensations still pending: {0:?}")]
    CompensationsPending(Vec<String>),
}
