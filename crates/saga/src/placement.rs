//! `CreateOrder` entry point.
//!
//! ```text
//! validate ─► begin(key) ─┬─ Completed ─► stored receipt (replayed)
//!                         ├─ InProgress ─► "still in progress"
//!                         └─ Fresh ─► place ─► saga ─► complete(receipt)
//! ```

use chrono::{DateTime, Utc};
use common::{AggregateId, RequestKey, UserId};
use domain::{CancellationReason, LineItem, Order, OrderStatus, PlaceOrder};
use event_store::EventStore;
use idempotency::{BeginOutcome, IdempotencyStore, RecordStatus};
use serde::{Deserialize, Serialize};

use crate::emitter::EventSink;
use crate::error::{Result, SagaError};
use crate::orchestrator::{SagaOrchestrator, SagaOutcome};
use crate::plan::SagaPlan;
use crate::services::{InventoryService, PaymentService};

/// Operation name under which order creation is deduplicated.
pub const CREATE_ORDER: &str = "create_order";

/// Command to create and fulfil an order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub request_key: RequestKey,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
}

impl CreateOrder {
    pub fn new(request_key: impl Into<RequestKey>, user_id: UserId, items: Vec<LineItem>) -> Self {
        Self {
            request_key: request_key.into(),
            user_id,
            items,
        }
    }

    /// Rejects malformed commands before anything is recorded.
    pub fn validate(&self) -> Result<()> {
        if self.request_key.is_blank() {
            return Err(SagaError::Validation("request key is blank".to_string()));
        }
        Order::validate_items(&self.items).map_err(|e| SagaError::Validation(e.to_string()))
    }
}

/// Terminal result of an order creation, as stored for replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: AggregateId,
    pub status: OrderStatus,
    pub reason: Option<CancellationReason>,
    #[serde(default)]
    pub requires_reconciliation: bool,
    /// True when this reply was served from the idempotency record.
    #[serde(default)]
    pub replayed: bool,
}

impl OrderReceipt {
    pub fn from_outcome(order_id: AggregateId, outcome: &SagaOutcome) -> Self {
        let (reason, requires_reconciliation) = match outcome {
            SagaOutcome::Confirmed => (None, false),
            SagaOutcome::Cancelled {
                reason,
                requires_reconciliation,
            } => (Some(reason.clone()), *requires_reconciliation),
        };
        Self {
            order_id,
            status: outcome.status(),
            reason,
            requires_reconciliation,
            replayed: false,
        }
    }
}

/// Reply to a `CreateOrder` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOrderReply {
    Completed(OrderReceipt),
    /// Another request with the same key is still running; retry later.
    InProgress {
        request_key: RequestKey,
        started_at: DateTime<Utc>,
    },
}

/// Accepts `CreateOrder` commands and runs each at most once per request key.
pub struct OrderPlacementService<S, I, P, K, G>
where
    S: EventStore,
    I: InventoryService,
    P: PaymentService,
    K: EventSink,
    G: IdempotencyStore,
{
    orchestrator: SagaOrchestrator<S, I, P, K>,
    guard: G,
}

impl<S, I, P, K, G> OrderPlacementService<S, I, P, K, G>
where
    S: EventStore,
    I: InventoryService,
    P: PaymentService,
    K: EventSink,
    G: IdempotencyStore,
{
    pub fn new(orchestrator: SagaOrchestrator<S, I, P, K>, guard: G) -> Self {
        Self {
            orchestrator,
            guard,
        }
    }

    pub fn orchestrator(&self) -> &SagaOrchestrator<S, I, P, K> {
        &self.orchestrator
    }

    pub fn guard(&self) -> &G {
        &self.guard
    }

    /// Creates an order and runs its saga to a terminal state.
    ///
    /// A repeated request key replays the first reply without touching any
    /// collaborator. If the saga itself errors out, the claim stays in
    /// progress so [`OrderPlacementService::recover`] can finish it.
    #[tracing::instrument(skip(self, cmd), fields(request_key = %cmd.request_key, user_id = %cmd.user_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<CreateOrderReply> {
        cmd.validate()?;
        let CreateOrder {
            request_key,
            user_id,
            items,
        } = cmd;

        match self.guard.begin(CREATE_ORDER, &request_key).await? {
            BeginOutcome::Fresh => {}
            BeginOutcome::InProgress { started_at } => {
                tracing::info!(%started_at, "request still in progress");
                return Ok(CreateOrderReply::InProgress {
                    request_key,
                    started_at,
                });
            }
            BeginOutcome::Completed(stored) => {
                let mut receipt: OrderReceipt = serde_json::from_value(stored)?;
                receipt.replayed = true;
                tracing::info!(order_id = %receipt.order_id, "replaying stored receipt");
                return Ok(CreateOrderReply::Completed(receipt));
            }
        }

        let cmd = PlaceOrder::new(user_id, request_key.clone(), items);
        let order_id = cmd.order_id;
        let order = match self.orchestrator.place(cmd).await {
            Ok(order) => order,
            Err(err) => {
                if let Err(abandon_err) = self.guard.abandon(CREATE_ORDER, &request_key).await {
                    tracing::error!(%abandon_err, "could not release idempotency claim");
                }
                return Err(err);
            }
        };

        let plan = SagaPlan::for_order(&order)?;
        let outcome = self.orchestrator.execute(order_id, &plan).await?;

        let receipt = OrderReceipt::from_outcome(order_id, &outcome);
        self.guard
            .complete(CREATE_ORDER, &request_key, serde_json::to_value(&receipt)?)
            .await?;
        tracing::info!(%order_id, status = %receipt.status, "order request completed");
        Ok(CreateOrderReply::Completed(receipt))
    }

    /// Finishes work interrupted by a restart.
    ///
    /// Resumes every in-flight saga, then completes the idempotency record of
    /// every terminal order whose request is still marked in progress. The
    /// history of each of those orders is published again, since events they
    /// emitted before the restart may never have reached the sink.
    /// Returns the number of records completed.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let mut interrupted: Vec<AggregateId> = self
            .orchestrator
            .recover_incomplete()
            .await?
            .into_iter()
            .map(|(order_id, _)| order_id)
            .collect();

        let mut completed = 0;
        let orders = self.orchestrator.orders();
        for order_id in orders.order_ids().await? {
            let Some(order) = orders.get_order(order_id).await? else {
                continue;
            };
            let (Some(outcome), Some(request_key)) =
                (SagaOutcome::from_order(&order), order.request_key())
            else {
                continue;
            };

            let pending = self
                .guard
                .get(CREATE_ORDER, request_key)
                .await?
                .is_some_and(|record| record.status == RecordStatus::InProgress);
            if !pending {
                continue;
            }

            let receipt = OrderReceipt::from_outcome(order_id, &outcome);
            self.guard
                .complete(CREATE_ORDER, request_key, serde_json::to_value(&receipt)?)
                .await?;
            completed += 1;
            if !interrupted.contains(&order_id) {
                interrupted.push(order_id);
            }
        }

        for order_id in interrupted {
            if let Err(error) = self
                .orchestrator
                .emitter()
                .republish_history(orders.store(), order_id)
                .await
            {
                tracing::error!(%order_id, %error, "could not republish order history");
            }
        }

        tracing::info!(completed, "idempotency records recovered");
        Ok(completed)
    }
}
