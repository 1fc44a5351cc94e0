//! Order commands.

use common::{AggregateId, ProductId, RequestKey, UserId};

use crate::command::Command;

use super::{CancellationReason, LineItem, Money, Order};

/// Command to place a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// The order ID to create.
    pub order_id: AggregateId,

    pub user_id: UserId,

    /// Idempotency key of the originating request.
    pub request_key: RequestKey,

    pub items: Vec<LineItem>,
}

impl PlaceOrder {
    /// Creates a new PlaceOrder command with a generated order ID.
    pub fn new(user_id: UserId, request_key: RequestKey, items: Vec<LineItem>) -> Self {
        Self {
            order_id: AggregateId::new(),
            user_id,
            request_key,
            items,
        }
    }
}

impl Command for PlaceOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record a committed stock reservation.
#[derive(Debug, Clone)]
pub struct RecordReservation {
    pub order_id: AggregateId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub reservation_id: String,
}

impl RecordReservation {
    pub fn new(
        order_id: AggregateId,
        product_id: impl Into<ProductId>,
        quantity: u32,
        reservation_id: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            product_id: product_id.into(),
            quantity,
            reservation_id: reservation_id.into(),
        }
    }
}

impl Command for RecordReservation {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record a committed payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub order_id: AggregateId,
    pub payment_id: String,
    pub amount: Money,
}

impl RecordPayment {
    pub fn new(order_id: AggregateId, payment_id: impl Into<String>, amount: Money) -> Self {
        Self {
            order_id,
            payment_id: payment_id.into(),
            amount,
        }
    }
}

impl Command for RecordPayment {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to confirm an order.
#[derive(Debug, Clone)]
pub struct ConfirmOrder {
    pub order_id: AggregateId,
}

impl ConfirmOrder {
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

impl Command for ConfirmOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to begin cancelling an order.
#[derive(Debug, Clone)]
pub struct StartCancellation {
    pub order_id: AggregateId,
    pub reason: CancellationReason,
}

impl StartCancellation {
    pub fn new(order_id: AggregateId, reason: CancellationReason) -> Self {
        Self { order_id, reason }
    }
}

impl Command for StartCancellation {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to record that a committed step was compensated.
#[derive(Debug, Clone)]
pub struct RecordCompensation {
    pub order_id: AggregateId,
    pub step: String,
}

impl RecordCompensation {
    pub fn new(order_id: AggregateId, step: impl Into<String>) -> Self {
        Self {
            order_id,
            step: step.into(),
        }
    }
}

impl Command for RecordCompensation {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to escalate a compensation that could not complete.
#[derive(Debug, Clone)]
pub struct RecordCompensationFailure {
    pub order_id: AggregateId,
    pub step: String,
    pub error: String,
    pub attempts: u32,
}

impl RecordCompensationFailure {
    pub fn new(
        order_id: AggregateId,
        step: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            order_id,
            step: step.into(),
            error: error.into(),
            attempts,
        }
    }
}

impl Command for RecordCompensationFailure {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// Command to finish cancelling an order.
#[derive(Debug, Clone)]
pub struct FinishCancellation {
    pub order_id: AggregateId,
}

impl FinishCancellation {
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

impl Command for FinishCancellation {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}
