//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId};
use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Money {
    /// Amount in cents (e.g., 1000 = $10.00)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * i64::from(quantity),
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// One line of an order. The unit price is a snapshot taken at placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl LineItem {
    /// Creates a new line item.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns quantity * unit_price.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Names under which saga steps are recorded in the order history.
pub mod step_names {
    use common::ProductId;

    /// Step name of the payment charge.
    pub const CHARGE_PAYMENT: &str = "charge_payment";

    /// Step name of the reservation for one product.
    pub fn reserve_stock(product_id: &ProductId) -> String {
        format!("reserve_stock:{product_id}")
    }
}

/// A committed stock reservation for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Reference handed back by the inventory collaborator.
    pub reservation_id: String,
}

/// A committed payment charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub amount: Money,
}

/// A saga step whose effect has been committed and recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommittedStep {
    Reservation(ReservationRecord),
    Payment(PaymentRecord),
}

impl CommittedStep {
    /// Returns the step name this commit was recorded under.
    pub fn name(&self) -> String {
        match self {
            CommittedStep::Reservation(r) => step_names::reserve_stock(&r.product_id),
            CommittedStep::Payment(_) => step_names::CHARGE_PAYMENT.to_string(),
        }
    }
}

/// A compensation that could not complete and needs manual reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailureRecord {
    pub step: String,
    pub error: String,
    pub attempts: u32,
    pub order_id: AggregateId,
    pub failed_at: DateTime<Utc>,
}

/// Machine-readable cause of a cancellation, carried on the cancellation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InsufficientStock,
    PaymentDeclined,
    /// Transient failures persisted past the retry bound (timeouts, breaker open, conflicts).
    RetriesExhausted,
    /// A collaborator rejected the step for another non-retryable reason.
    StepRejected,
    /// Cancelled by the caller before any step ran.
    CallerRequested,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InsufficientStock => "insufficient_stock",
            ReasonCode::PaymentDeclined => "payment_declined",
            ReasonCode::RetriesExhausted => "retries_exhausted",
            ReasonCode::StepRejected => "step_rejected",
            ReasonCode::CallerRequested => "caller_requested",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an order is being cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReason {
    pub code: ReasonCode,
    /// The step that failed, if a step failure triggered the cancellation.
    pub step: Option<String>,
    pub detail: String,
}

impl CancellationReason {
    pub fn new(code: ReasonCode, step: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            code,
            step,
            detail: detail.into(),
        }
    }

    pub fn caller_requested(detail: impl Into<String>) -> Self {
        Self::new(ReasonCode::CallerRequested, None, detail)
    }
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step {
            Some(step) => write!(f, "{} at {}: {}", self.code, step, self.detail),
            None => write!(f, "{}: {}", self.code, self.detail),
        }
    }
}
