//! Saga orchestrator for order placement.
//!
//! The orchestrator keeps no saga state of its own. Everything it needs to
//! continue an interrupted saga (status, committed steps, settled
//! compensations) is read back from the order's event history, so a restart
//! at any point resumes forward execution or compensation where it stopped.

use std::time::Instant;

use common::AggregateId;
use domain::{
    CancellationReason, CommittedStep, ConfirmOrder, FinishCancellation, Order, OrderService,
    OrderStatus, PaymentRecord, PlaceOrder, ReasonCode, RecordCompensation,
    RecordCompensationFailure, RecordPayment, RecordReservation, ReservationRecord,
    StartCancellation,
};
use event_store::EventStore;

use crate::config::SagaConfig;
use crate::emitter::{EventEmitter, EventSink};
use crate::error::{Result, SagaError, ServiceError};
use crate::executor::{StepExecutor, StepOutcome};
use crate::plan::{SagaPlan, SagaStep};
use crate::services::{InventoryService, PaymentResult, PaymentService, ReservationResult};

/// Terminal result of a saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    Confirmed,
    Cancelled {
        reason: CancellationReason,
        /// At least one compensation failed and needs manual reconciliation.
        requires_reconciliation: bool,
    },
}

impl SagaOutcome {
    /// Reads the outcome of a terminal order. Returns None while it is in flight.
    pub fn from_order(order: &Order) -> Option<Self> {
        match order.status() {
            OrderStatus::Confirmed => Some(SagaOutcome::Confirmed),
            OrderStatus::Cancelled => Some(SagaOutcome::Cancelled {
                reason: order.cancellation_reason().cloned().unwrap_or_else(|| {
                    CancellationReason::new(ReasonCode::StepRejected, None, "no reason recorded")
                }),
                requires_reconciliation: order.requires_reconciliation(),
            }),
            _ => None,
        }
    }

    pub fn status(&self) -> OrderStatus {
        match self {
            SagaOutcome::Confirmed => OrderStatus::Confirmed,
            SagaOutcome::Cancelled { .. } => OrderStatus::Cancelled,
        }
    }
}

/// Effect of a forward step that succeeded but is not recorded yet.
#[derive(Debug)]
enum StepEffect {
    Reserved(ReservationResult),
    Charged(PaymentResult),
}

impl StepEffect {
    fn into_committed(self) -> CommittedStep {
        match self {
            StepEffect::Reserved(r) => CommittedStep::Reservation(ReservationRecord {
                product_id: r.product_id,
                quantity: r.quantity,
                reservation_id: r.reservation_id,
            }),
            StepEffect::Charged(p) => CommittedStep::Payment(PaymentRecord {
                payment_id: p.payment_id,
                amount: p.amount,
            }),
        }
    }
}

/// Drives orders through their saga steps.
///
/// Steps of one order run strictly in sequence. On the first failed step the
/// order moves to `CANCELLING` and every committed step is compensated in
/// reverse order. Different orders run independently; the only shared state
/// is stock, which is guarded by the ledger's version checks.
pub struct SagaOrchestrator<S, I, P, K>
where
    S: EventStore,
    I: InventoryService,
    P: PaymentService,
    K: EventSink,
{
    orders: OrderService<S>,
    inventory: I,
    payment: P,
    emitter: EventEmitter<K>,
    forward: StepExecutor,
    compensation: StepExecutor,
}

impl<S, I, P, K> SagaOrchestrator<S, I, P, K>
where
    S: EventStore,
    I: InventoryService,
    P: PaymentService,
    K: EventSink,
{
    /// Creates a new orchestrator.
    pub fn new(store: S, inventory: I, payment: P, sink: K, config: &SagaConfig) -> Self {
        let forward = StepExecutor::new(config.retry_policy(), config.step_timeout);
        let compensation = StepExecutor::new(config.compensation_policy(), config.step_timeout);
        Self {
            orders: OrderService::new(store),
            inventory,
            payment,
            emitter: EventEmitter::new(sink, forward.clone()),
            forward,
            compensation,
        }
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn payment(&self) -> &P {
        &self.payment
    }

    pub fn emitter(&self) -> &EventEmitter<K> {
        &self.emitter
    }

    /// Places an order in `PENDING` and publishes the placement.
    pub async fn place(&self, cmd: PlaceOrder) -> Result<Order> {
        let result = self.orders.place_order(cmd).await?;
        self.emitter.emit(&result.envelopes).await;
        Ok(result.aggregate)
    }

    /// Runs `plan` for an order until it is confirmed or fully compensated.
    ///
    /// The plan must cover exactly the steps the order requires. Calling this
    /// on a terminal order returns its recorded outcome without side effects.
    #[tracing::instrument(skip(self, plan), fields(saga_type = "OrderPlacement", steps = plan.len()))]
    pub async fn execute(&self, order_id: AggregateId, plan: &SagaPlan) -> Result<SagaOutcome> {
        let order = self.load(order_id).await?;
        if let Some(outcome) = SagaOutcome::from_order(&order) {
            return Ok(outcome);
        }
        ensure_plan_matches(&order, plan)?;
        self.drive(order_id, order, plan).await
    }

    /// Continues an interrupted saga from the order's event history.
    ///
    /// On a confirmed order this only retries consuming its reservations.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, order_id: AggregateId) -> Result<SagaOutcome> {
        let order = self.load(order_id).await?;
        if let Some(outcome) = SagaOutcome::from_order(&order) {
            if order.status() == OrderStatus::Confirmed {
                self.consume_reservations(order_id, &order).await;
            }
            return Ok(outcome);
        }

        tracing::info!(
            status = %order.status(),
            committed = order.committed_steps().len(),
            "resuming saga"
        );
        let plan = SagaPlan::for_order(&order)?;
        self.drive(order_id, order, &plan).await
    }

    /// Resumes every order that is not in a terminal state and settles the
    /// reservations of confirmed ones.
    ///
    /// An order that fails to resume is logged and skipped so the others
    /// still recover.
    #[tracing::instrument(skip(self))]
    pub async fn recover_incomplete(&self) -> Result<Vec<(AggregateId, SagaOutcome)>> {
        let mut recovered = Vec::new();
        for order_id in self.orders.order_ids().await? {
            let Some(order) = self.orders.get_order(order_id).await? else {
                continue;
            };
            if order.status() == OrderStatus::Confirmed {
                self.consume_reservations(order_id, &order).await;
                continue;
            }
            if order.is_terminal() {
                continue;
            }

            match self.resume(order_id).await {
                Ok(outcome) => recovered.push((order_id, outcome)),
                Err(error) => {
                    metrics::counter!("saga_recovery_failures_total").increment(1);
                    tracing::error!(%order_id, %error, "saga recovery failed");
                }
            }
        }
        tracing::info!(recovered = recovered.len(), "saga recovery finished");
        Ok(recovered)
    }

    /// Cancels an order on the caller's behalf.
    ///
    /// Only allowed while the order is `PENDING` and no step has committed;
    /// after that the saga must run to confirmation or full compensation.
    #[tracing::instrument(skip(self, detail))]
    pub async fn cancel(
        &self,
        order_id: AggregateId,
        detail: impl Into<String> + Send,
    ) -> Result<SagaOutcome> {
        let reason = CancellationReason::caller_requested(detail);
        let order = self.load(order_id).await?;
        reject_late_cancellation(&order, order_id)?;

        // The order rejects a caller cancellation once a step has committed,
        // so a step landing between the check above and this append wins.
        let started = match self
            .orders
            .start_cancellation(StartCancellation::new(order_id, reason))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let current = self.load(order_id).await?;
                reject_late_cancellation(&current, order_id)?;
                return Err(e.into());
            }
        };
        self.emitter.emit(&started.envelopes).await;

        let order = self.finish_cancellation(order_id).await?;
        outcome_of(order_id, &order)
    }

    async fn load(&self, order_id: AggregateId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    async fn drive(
        &self,
        order_id: AggregateId,
        mut order: Order,
        plan: &SagaPlan,
    ) -> Result<SagaOutcome> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        for step in plan.steps() {
            if !order.status().accepts_forward_steps() {
                break;
            }
            let name = step.name();
            if order.committed_steps().iter().any(|c| c.name() == name) {
                tracing::debug!(step = %name, "step already committed");
                continue;
            }

            tracing::info!(step = %name, "saga step started");
            match self.run_step(order_id, step).await {
                StepOutcome::Ok(effect) => {
                    order = self.commit_step(order_id, effect).await?;
                    tracing::info!(step = %name, status = %order.status(), "saga step committed");
                }
                StepOutcome::Failed { error, attempts } => {
                    tracing::warn!(step = %name, attempts, %error, "saga step failed");
                    let reason =
                        CancellationReason::new(error.reason_code(), Some(name), error.to_string());
                    order = match self.start_cancellation(order_id, reason).await {
                        Ok(order) => order,
                        Err(e) if e.is_concurrency_conflict() => {
                            let current = self.load(order_id).await?;
                            if current.status().accepts_forward_steps() {
                                return Err(e);
                            }
                            current
                        }
                        Err(e) => return Err(e),
                    };
                }
            }
        }

        if order.status() == OrderStatus::StockReserved {
            order = self.confirm(order_id).await?;
        }
        if order.status() == OrderStatus::Cancelling {
            order = self.compensate(order_id, order).await?;
        }

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        outcome_of(order_id, &order)
    }

    async fn run_step(&self, order_id: AggregateId, step: &SagaStep) -> StepOutcome<StepEffect> {
        let name = step.name();
        match step {
            SagaStep::ReserveStock {
                product_id,
                quantity,
            } => self
                .forward
                .run(&name, || {
                    self.inventory
                        .reserve_stock(product_id, *quantity, order_id)
                })
                .await
                .map(StepEffect::Reserved),
            SagaStep::ChargePayment { amount, payer_id } => self
                .forward
                .run(&name, || {
                    self.payment.process_payment(order_id, *amount, *payer_id)
                })
                .await
                .map(StepEffect::Charged),
        }
    }

    /// Records a successful step. If the order stopped accepting steps while
    /// the step ran, the effect is undone instead.
    async fn commit_step(&self, order_id: AggregateId, effect: StepEffect) -> Result<Order> {
        let recorded = match &effect {
            StepEffect::Reserved(r) => {
                self.orders
                    .record_reservation(RecordReservation::new(
                        order_id,
                        r.product_id.clone(),
                        r.quantity,
                        r.reservation_id.clone(),
                    ))
                    .await
            }
            StepEffect::Charged(p) => {
                self.orders
                    .record_payment(RecordPayment::new(order_id, p.payment_id.clone(), p.amount))
                    .await
            }
        };

        match recorded {
            Ok(result) => {
                self.emitter.emit(&result.envelopes).await;
                Ok(result.aggregate)
            }
            Err(err) => {
                let current = self.load(order_id).await?;
                if current.status().accepts_forward_steps() {
                    return Err(err.into());
                }

                let step = effect.into_committed();
                tracing::warn!(
                    step = %step.name(),
                    status = %current.status(),
                    "order left forward execution while the step ran, undoing it"
                );
                if let StepOutcome::Failed { error, attempts } = self
                    .compensation
                    .run(&step.name(), || self.undo_step(order_id, &step))
                    .await
                {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::error!(
                        step = %step.name(),
                        attempts,
                        %error,
                        "unrecorded step could not be undone, manual reconciliation required"
                    );
                }
                Ok(current)
            }
        }
    }

    /// Confirms the order, then consumes its reservations.
    ///
    /// Consumption runs only once `OrderConfirmed` is recorded, so a
    /// reservation of an order that may still be cancelled stays releasable.
    /// A consumption failure is logged; `resume` and `recover_incomplete`
    /// consume again.
    async fn confirm(&self, order_id: AggregateId) -> Result<Order> {
        let result = self.orders.confirm(ConfirmOrder::new(order_id)).await?;
        self.emitter.emit(&result.envelopes).await;

        metrics::counter!("saga_confirmed_total").increment(1);
        tracing::info!(total = %result.aggregate.total_amount(), "saga confirmed");

        self.consume_reservations(order_id, &result.aggregate).await;
        Ok(result.aggregate)
    }

    /// Marks every reservation of a confirmed order as consumed.
    async fn consume_reservations(&self, order_id: AggregateId, order: &Order) {
        for item in order.items() {
            let name = format!("consume_stock:{}", item.product_id);
            if let StepOutcome::Failed { error, attempts } = self
                .forward
                .run(&name, || {
                    self.inventory.consume_stock(&item.product_id, order_id)
                })
                .await
            {
                metrics::counter!("saga_consume_failures_total").increment(1);
                tracing::error!(step = %name, attempts, %error, "reservation could not be consumed");
            }
        }
    }

    async fn start_cancellation(
        &self,
        order_id: AggregateId,
        reason: CancellationReason,
    ) -> Result<Order> {
        let result = self
            .orders
            .start_cancellation(StartCancellation::new(order_id, reason))
            .await?;
        self.emitter.emit(&result.envelopes).await;
        Ok(result.aggregate)
    }

    /// Compensates every committed step not yet settled, last-committed first.
    ///
    /// A compensation that still fails after its retry bound is recorded as a
    /// `CompensationFailed` event and the remaining compensations still run.
    async fn compensate(&self, order_id: AggregateId, order: Order) -> Result<Order> {
        let pending = order.pending_compensations();
        tracing::info!(steps = pending.len(), "compensation started");

        for step in pending {
            let name = step.name();
            let result = match self
                .compensation
                .run(&name, || self.undo_step(order_id, &step))
                .await
            {
                StepOutcome::Ok(()) => {
                    tracing::info!(step = %name, "step compensated");
                    self.orders
                        .record_compensation(RecordCompensation::new(order_id, name))
                        .await?
                }
                StepOutcome::Failed { error, attempts } => {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::error!(
                        step = %name,
                        attempts,
                        %error,
                        "compensation failed, manual reconciliation required"
                    );
                    self.orders
                        .record_compensation_failure(RecordCompensationFailure::new(
                            order_id,
                            name,
                            error.to_string(),
                            attempts,
                        ))
                        .await?
                }
            };
            self.emitter.emit(&result.envelopes).await;
        }

        self.finish_cancellation(order_id).await
    }

    async fn finish_cancellation(&self, order_id: AggregateId) -> Result<Order> {
        let result = self
            .orders
            .finish_cancellation(FinishCancellation::new(order_id))
            .await?;
        self.emitter.emit(&result.envelopes).await;

        let order = result.aggregate;
        let code = order
            .cancellation_reason()
            .map(|r| r.code.as_str())
            .unwrap_or("unknown");
        metrics::counter!("saga_cancelled_total", "reason" => code).increment(1);
        tracing::warn!(
            reason = code,
            requires_reconciliation = order.requires_reconciliation(),
            "saga cancelled"
        );
        Ok(order)
    }

    async fn undo_step(
        &self,
        order_id: AggregateId,
        step: &CommittedStep,
    ) -> std::result::Result<(), ServiceError> {
        match step {
            CommittedStep::Reservation(r) => self
                .inventory
                .release_stock(&r.product_id, r.quantity, order_id)
                .await
                .map(|_| ()),
            CommittedStep::Payment(p) => self
                .payment
                .refund_payment(&p.payment_id)
                .await
                .map(|_| ()),
        }
    }
}

fn outcome_of(order_id: AggregateId, order: &Order) -> Result<SagaOutcome> {
    SagaOutcome::from_order(order).ok_or_else(|| {
        SagaError::InvalidPlan(format!(
            "saga for order {order_id} stopped in {}",
            order.status()
        ))
    })
}

fn reject_late_cancellation(order: &Order, order_id: AggregateId) -> Result<()> {
    let reason = if order.is_terminal() {
        "order already finished"
    } else if order.status() != OrderStatus::Pending || !order.committed_steps().is_empty() {
        "steps have already committed"
    } else {
        return Ok(());
    };
    Err(SagaError::CancellationRejected {
        order_id,
        status: order.status(),
        reason: reason.to_string(),
    })
}

/// Checks that a caller-supplied plan covers exactly the order's steps.
fn ensure_plan_matches(order: &Order, plan: &SagaPlan) -> Result<()> {
    let required = SagaPlan::for_order(order)?;
    let mut expected: Vec<&SagaStep> = required.steps().iter().collect();
    let mut given: Vec<&SagaStep> = plan.steps().iter().collect();
    expected.sort_by_key(|s| s.name());
    given.sort_by_key(|s| s.name());

    if expected != given {
        return Err(SagaError::InvalidPlan(
            "plan does not match the order lines".to_string(),
        ));
    }
    Ok(())
}
