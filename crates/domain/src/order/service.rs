//! Order service providing a simplified API for order operations.

use common::AggregateId;
use event_store::{EventEnvelope, EventStore};

use crate::aggregate::Aggregate;
use crate::command::{Command, CommandHandler, CommandResult, replay};
use crate::error::DomainError;

use super::{
    ConfirmOrder, FinishCancellation, Order, OrderError, OrderEvent, PlaceOrder,
    RecordCompensation, RecordCompensationFailure, RecordPayment, RecordReservation,
    StartCancellation,
};

/// Service for managing orders.
///
/// Every write loads the order from its history and appends conditioned on
/// the version it read. The service holds no order state of its own.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    /// Creates a new order service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        self.handler.store()
    }

    /// Places a new order in `PENDING`.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, request_key = %cmd.request_key))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<CommandResult<Order>, DomainError> {
        let order_id = cmd.aggregate_id();
        let PlaceOrder {
            user_id,
            request_key,
            items,
            ..
        } = cmd;

        let result = self
            .handler
            .execute(order_id, |order| {
                order.place(order_id, user_id, request_key, items)
            })
            .await?;
        tracing::info!(total = %result.aggregate.total_amount(), "order placed");
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_reservation(
        &self,
        cmd: RecordReservation,
    ) -> Result<CommandResult<Order>, DomainError> {
        let order_id = cmd.aggregate_id();
        let RecordReservation {
            product_id,
            quantity,
            reservation_id,
            ..
        } = cmd;

        self.run(order_id, |order| {
            order.record_reservation(product_id, quantity, reservation_id)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_payment(
        &self,
        cmd: RecordPayment,
    ) -> Result<CommandResult<Order>, DomainError> {
        let order_id = cmd.aggregate_id();
        let RecordPayment {
            payment_id, amount, ..
        } = cmd;

        self.run(order_id, |order| order.record_payment(payment_id, amount))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, cmd: ConfirmOrder) -> Result<CommandResult<Order>, DomainError> {
        self.run(cmd.aggregate_id(), |order| order.confirm()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_cancellation(
        &self,
        cmd: StartCancellation,
    ) -> Result<CommandResult<Order>, DomainError> {
        let order_id = cmd.aggregate_id();
        let reason = cmd.reason;

        self.run(order_id, |order| order.start_cancellation(reason))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_compensation(
        &self,
        cmd: RecordCompensation,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.run(cmd.aggregate_id(), |order| {
            order.record_compensation(&cmd.step)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_compensation_failure(
        &self,
        cmd: RecordCompensationFailure,
    ) -> Result<CommandResult<Order>, DomainError> {
        let order_id = cmd.aggregate_id();
        let RecordCompensationFailure {
            step,
            error,
            attempts,
            ..
        } = cmd;

        self.run(order_id, |order| {
            order.record_compensation_failure(&step, error, attempts)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn finish_cancellation(
        &self,
        cmd: FinishCancellation,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.run(cmd.aggregate_id(), |order| order.finish_cancellation())
            .await
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Returns the stored history of an order, oldest first.
    pub async fn history(&self, order_id: AggregateId) -> Result<Vec<EventEnvelope>, DomainError> {
        Ok(self.store().get_events_for_aggregate(order_id).await?)
    }

    /// Rebuilds an order from an empty state using its full history.
    ///
    /// Fails with `OrderNotFound` when there is no history.
    #[tracing::instrument(skip(self))]
    pub async fn replay(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        let history = self.history(order_id).await?;
        if history.is_empty() {
            return Err(DomainError::OrderNotFound(order_id));
        }
        let order: Order = replay(&history)?;
        tracing::debug!(events = history.len(), version = %order.version(), "order replayed");
        Ok(order)
    }

    /// Lists every order ID, oldest first.
    pub async fn order_ids(&self) -> Result<Vec<AggregateId>, DomainError> {
        Ok(self.store().aggregate_ids(Order::aggregate_type()).await?)
    }

    /// Runs a command against an existing order.
    async fn run<F>(
        &self,
        order_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<Order>, DomainError>
    where
        F: FnOnce(&Order) -> Result<Vec<OrderEvent>, OrderError>,
    {
        self.handler
            .execute(order_id, command_fn)
            .await
            .map_err(|e| match e {
                DomainError::Order(OrderError::NotPlaced) => DomainError::OrderNotFound(order_id),
                other => other,
            })
    }
}
