//! Order aggregate implementation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId, RequestKey, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{
    CancellationReason, CommittedStep, CompensationFailureRecord, LineItem, Money, OrderError,
    OrderEvent, OrderStatus, PaymentRecord, ReasonCode, ReservationRecord, StatusTransition,
    events::{CompensationFailedData, OrderPlacedData},
    step_names,
};

/// Order aggregate root.
///
/// The order is the durable trace of a placement saga: its history records
/// every committed step and every compensation, so the orchestrator can pick
/// up where it left off after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    id: Option<AggregateId>,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    user_id: Option<UserId>,

    /// Key of the command that created this order.
    request_key: Option<RequestKey>,

    /// Line items in submission order.
    items: Vec<LineItem>,

    /// Total amount, immutable after placement.
    total_amount: Money,

    status: OrderStatus,

    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,

    /// Steps whose effects were committed, in commit order.
    committed: Vec<CommittedStep>,

    /// Names of committed steps that were undone.
    compensated: Vec<String>,

    compensation_failures: Vec<CompensationFailureRecord>,

    cancellation: Option<CancellationReason>,
    requires_reconciliation: bool,

    /// Append-only status history.
    history: Vec<StatusTransition>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        let at = event.occurred_at();
        if let Some(to) = event.target_status() {
            self.record_transition(to, at);
        }
        self.updated_at = Some(at);

        match event {
            OrderEvent::OrderPlaced(data) => self.apply_order_placed(data),
            OrderEvent::StockReserved(data) => {
                self.committed
                    .push(CommittedStep::Reservation(ReservationRecord {
                        product_id: data.product_id,
                        quantity: data.quantity,
                        reservation_id: data.reservation_id,
                    }));
            }
            OrderEvent::PaymentCharged(data) => {
                self.committed.push(CommittedStep::Payment(PaymentRecord {
                    payment_id: data.payment_id,
                    amount: data.amount,
                }));
            }
            OrderEvent::OrderConfirmed(_) => {}
            OrderEvent::CancellationStarted(data) => {
                self.cancellation = Some(data.reason);
            }
            OrderEvent::StepCompensated(data) => {
                self.compensated.push(data.step);
            }
            OrderEvent::CompensationFailed(data) => self.apply_compensation_failed(data),
            OrderEvent::OrderCancelled(data) => {
                self.cancellation = Some(data.reason);
                self.requires_reconciliation = data.requires_reconciliation;
            }
        }
    }
}

// Query methods
impl Order {
    /// Returns the owner of the order.
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn request_key(&self) -> Option<&RequestKey> {
        self.request_key.as_ref()
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the line items in submission order.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Returns the total amount.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Returns the committed steps in commit order.
    pub fn committed_steps(&self) -> &[CommittedStep] {
        &self.committed
    }

    /// Returns the names of the steps that were compensated.
    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated
    }

    pub fn compensation_failures(&self) -> &[CompensationFailureRecord] {
        &self.compensation_failures
    }

    /// Returns the reason the order is being (or was) cancelled.
    pub fn cancellation_reason(&self) -> Option<&CancellationReason> {
        self.cancellation.as_ref()
    }

    /// Returns true if a compensation failed and the order needs manual reconciliation.
    pub fn requires_reconciliation(&self) -> bool {
        self.requires_reconciliation
    }

    /// Returns the status history, oldest first.
    pub fn history(&self) -> &[StatusTransition] {
        &self.history
    }

    /// Returns the committed reservation for a product, if any.
    pub fn reservation_for(&self, product_id: &ProductId) -> Option<&ReservationRecord> {
        self.committed.iter().find_map(|step| match step {
            CommittedStep::Reservation(r) if &r.product_id == product_id => Some(r),
            _ => None,
        })
    }

    /// Returns the committed payment, if any.
    pub fn payment(&self) -> Option<&PaymentRecord> {
        self.committed.iter().find_map(|step| match step {
            CommittedStep::Payment(p) => Some(p),
            _ => None,
        })
    }

    /// Returns true if the total requires a payment step.
    pub fn requires_payment(&self) -> bool {
        self.total_amount.is_positive()
    }

    /// Returns the names of required steps that have not committed yet.
    pub fn outstanding_steps(&self) -> Vec<String> {
        let mut outstanding: Vec<String> = self
            .items
            .iter()
            .filter(|item| self.reservation_for(&item.product_id).is_none())
            .map(|item| step_names::reserve_stock(&item.product_id))
            .collect();
        if self.requires_payment() && self.payment().is_none() {
            outstanding.push(step_names::CHARGE_PAYMENT.to_string());
        }
        outstanding
    }

    /// Returns the committed steps still awaiting compensation, last-committed first.
    pub fn pending_compensations(&self) -> Vec<CommittedStep> {
        self.committed
            .iter()
            .rev()
            .filter(|step| !self.is_settled(&step.name()))
            .cloned()
            .collect()
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn is_committed(&self, step: &str) -> bool {
        self.committed.iter().any(|s| s.name() == step)
    }

    /// A committed step is settled once compensated or escalated.
    fn is_settled(&self, step: &str) -> bool {
        self.compensated.iter().any(|s| s == step)
            || self.compensation_failures.iter().any(|f| f.step == step)
    }
}

// Command methods (return events)
impl Order {
    /// Checks a line-item list without touching any state.
    pub fn validate_items(items: &[LineItem]) -> Result<(), OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut seen = HashSet::new();
        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.clone(),
                    price: item.unit_price.cents(),
                });
            }
            if !seen.insert(&item.product_id) {
                return Err(OrderError::DuplicateProduct(item.product_id.clone()));
            }
        }
        Ok(())
    }

    /// Places a new order in `PENDING`.
    pub fn place(
        &self,
        order_id: AggregateId,
        user_id: UserId,
        request_key: RequestKey,
        items: Vec<LineItem>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        Self::validate_items(&items)?;

        Ok(vec![OrderEvent::order_placed(
            order_id,
            user_id,
            request_key,
            items,
        )])
    }

    /// Records a committed stock reservation for one line.
    ///
    /// The first reservation moves the order to `STOCK_RESERVED`.
    pub fn record_reservation(
        &self,
        product_id: ProductId,
        quantity: u32,
        reservation_id: String,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if !self.status.accepts_forward_steps() {
            return Err(OrderError::InvalidStateForAction {
                status: self.status,
                action: "reserve stock",
            });
        }
        if self.status == OrderStatus::Pending {
            self.status.validate_transition(OrderStatus::StockReserved)?;
        }

        let matches_line = self
            .items
            .iter()
            .any(|item| item.product_id == product_id && item.quantity == quantity);
        if !matches_line {
            return Err(OrderError::ReservationMismatch {
                product_id,
                quantity,
            });
        }
        if self.reservation_for(&product_id).is_some() {
            return Err(OrderError::StepAlreadyCommitted(step_names::reserve_stock(
                &product_id,
            )));
        }

        Ok(vec![OrderEvent::stock_reserved(
            product_id,
            quantity,
            reservation_id,
        )])
    }

    /// Records the committed payment of the order total.
    pub fn record_payment(
        &self,
        payment_id: String,
        amount: Money,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if self.status != OrderStatus::StockReserved {
            return Err(OrderError::InvalidStateForAction {
                status: self.status,
                action: "charge payment",
            });
        }
        if self.payment().is_some() {
            return Err(OrderError::StepAlreadyCommitted(
                step_names::CHARGE_PAYMENT.to_string(),
            ));
        }
        if amount != self.total_amount {
            return Err(OrderError::PaymentAmountMismatch {
                charged: amount,
                total: self.total_amount,
            });
        }

        Ok(vec![OrderEvent::payment_charged(payment_id, amount)])
    }

    /// Confirms the order once every required step has committed.
    pub fn confirm(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.status.validate_transition(OrderStatus::Confirmed)?;

        let outstanding = self.outstanding_steps();
        if !outstanding.is_empty() {
            return Err(OrderError::StepsOutstanding(outstanding));
        }

        Ok(vec![OrderEvent::order_confirmed()])
    }

    /// Moves the order to `CANCELLING`.
    ///
    /// A caller-requested cancellation is only accepted while the order is
    /// `PENDING` with no committed step.
    pub fn start_cancellation(
        &self,
        reason: CancellationReason,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.status.validate_transition(OrderStatus::Cancelling)?;
        if reason.code == ReasonCode::CallerRequested
            && (self.status != OrderStatus::Pending || !self.committed.is_empty())
        {
            return Err(OrderError::InvalidStateForAction {
                status: self.status,
                action: "cancel on the caller's behalf",
            });
        }

        Ok(vec![OrderEvent::cancellation_started(reason)])
    }

    /// Records that a committed step was undone.
    pub fn record_compensation(&self, step: &str) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_compensable(step, "record compensation")?;
        Ok(vec![OrderEvent::step_compensated(step)])
    }

    /// Records that a compensation gave up after `attempts` tries.
    pub fn record_compensation_failure(
        &self,
        step: &str,
        error: String,
        attempts: u32,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_compensable(step, "record compensation failure")?;
        Ok(vec![OrderEvent::compensation_failed(step, error, attempts)])
    }

    /// Moves the order to `CANCELLED` once every committed step is settled.
    pub fn finish_cancellation(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.status.validate_transition(OrderStatus::Cancelled)?;

        let pending: Vec<String> = self
            .pending_compensations()
            .iter()
            .map(CommittedStep::name)
            .collect();
        if !pending.is_empty() {
            return Err(OrderError::CompensationsPending(pending));
        }

        let reason = self.cancellation.clone().unwrap_or_else(|| {
            CancellationReason::new(ReasonCode::StepRejected, None, "no reason recorded")
        });
        Ok(vec![OrderEvent::order_cancelled(
            reason,
            !self.compensation_failures.is_empty(),
        )])
    }

    fn ensure_placed(&self) -> Result<(), OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotPlaced);
        }
        Ok(())
    }

    fn ensure_compensable(&self, step: &str, action: &'static str) -> Result<(), OrderError> {
        self.ensure_placed()?;
        if self.status != OrderStatus::Cancelling {
            return Err(OrderError::InvalidStateForAction {
                status: self.status,
                action,
            });
        }
        if !self.is_committed(step) {
            return Err(OrderError::StepNotCommitted(step.to_string()));
        }
        if self.is_settled(step) {
            return Err(OrderError::StepAlreadyCompensated(step.to_string()));
        }
        Ok(())
    }
}

// Event application helpers
impl Order {
    fn apply_order_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.user_id = Some(data.user_id);
        self.request_key = Some(data.request_key);
        self.items = data.items;
        self.total_amount = data.total_amount;
        self.created_at = Some(data.placed_at);
    }

    fn apply_compensation_failed(&mut self, data: CompensationFailedData) {
        let Some(order_id) = self.id else {
            return;
        };
        self.compensation_failures.push(CompensationFailureRecord {
            step: data.step,
            error: data.error,
            attempts: data.attempts,
            order_id,
            failed_at: data.failed_at,
        });
    }

    /// Appends a history entry when the status actually changes.
    fn record_transition(&mut self, to: OrderStatus, at: DateTime<Utc>) {
        let from = if self.id.is_some() {
            Some(self.status)
        } else {
            None
        };
        if from == Some(to) {
            return;
        }
        self.status = to;
        self.history.push(StatusTransition {
            from,
            to,
            version: self.version.next(),
            at,
        });
    }
}
