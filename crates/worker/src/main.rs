//! Saga worker entry point.
//!
//! Wires in-memory collaborators, finishes any saga interrupted by a previous
//! run, places a small batch of demo orders concurrently and then keeps the
//! idempotency purger running until shutdown.

use std::sync::Arc;

use common::UserId;
use domain::{LineItem, Money};
use event_store::InMemoryEventStore;
use futures_util::future::join_all;
use idempotency::{InMemoryIdempotencyStore, spawn_purger};
use ledger::{InMemoryReservationLedger, ReservationLedger};
use saga::{
    CircuitBreakerPaymentService, CreateOrder, CreateOrderReply, InMemoryEventSink,
    InMemoryPaymentService, LedgerInventoryService, OrderPlacementService, SagaConfig,
    SagaOrchestrator,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type Placement = OrderPlacementService<
    InMemoryEventStore,
    LedgerInventoryService<InMemoryReservationLedger>,
    CircuitBreakerPaymentService<InMemoryPaymentService>,
    InMemoryEventSink,
    InMemoryIdempotencyStore,
>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(config: &SagaConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Two shoppers race for the last units of `SKU-LAMP` and one request is
/// retried with the same key.
fn demo_orders() -> Vec<CreateOrder> {
    let lamp = |quantity| LineItem::new("SKU-LAMP", quantity, Money::from_cents(4_500));
    let bulb = |quantity| LineItem::new("SKU-BULB", quantity, Money::from_cents(300));

    let alice = UserId::new();
    let bob = UserId::new();
    vec![
        CreateOrder::new("demo-alice-1", alice, vec![lamp(3), bulb(6)]),
        CreateOrder::new("demo-bob-1", bob, vec![lamp(3)]),
        CreateOrder::new("demo-alice-1", alice, vec![lamp(3), bulb(6)]),
        CreateOrder::new("demo-bob-2", bob, vec![bulb(2)]),
    ]
}

async fn run_demo(placement: Arc<Placement>) {
    let tasks = demo_orders().into_iter().map(|cmd| {
        let placement = placement.clone();
        async move {
            let key = cmd.request_key.clone();
            (key, placement.create_order(cmd).await)
        }
    });

    for (key, reply) in join_all(tasks).await {
        match reply {
            Ok(CreateOrderReply::Completed(receipt)) => tracing::info!(
                request_key = %key,
                order_id = %receipt.order_id,
                status = %receipt.status,
                reason = receipt.reason.as_ref().map(|r| r.code.as_str()),
                replayed = receipt.replayed,
                "order request finished"
            ),
            Ok(CreateOrderReply::InProgress { started_at, .. }) => {
                tracing::info!(request_key = %key, %started_at, "order request still in progress")
            }
            Err(e) => tracing::error!(request_key = %key, error = %e, "order request failed"),
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = SagaConfig::from_env();
    init_tracing(&config);
    tracing::info!(?config, "starting saga worker");

    // 2. Collaborators
    let store = InMemoryEventStore::new();
    let ledger = InMemoryReservationLedger::with_stock([("SKU-LAMP", 5), ("SKU-BULB", 40)]);
    let payment =
        CircuitBreakerPaymentService::new(InMemoryPaymentService::new(), config.breaker_config());
    let sink = InMemoryEventSink::new();
    let guard = InMemoryIdempotencyStore::new(config.idempotency_ttl_chrono());

    let orchestrator = SagaOrchestrator::new(
        store,
        LedgerInventoryService::new(ledger.clone()),
        payment,
        sink.clone(),
        &config,
    );
    let placement = Arc::new(OrderPlacementService::new(orchestrator, guard.clone()));

    // 3. Finish sagas interrupted by a previous run
    match placement.recover().await {
        Ok(completed) => tracing::info!(completed, "recovery finished"),
        Err(e) => tracing::error!(error = %e, "recovery failed"),
    }

    // 4. Evict expired idempotency records in the background
    let purger = spawn_purger(Arc::new(guard), config.purge_interval);

    // 5. Demo workload
    run_demo(placement).await;
    for sku in ["SKU-LAMP", "SKU-BULB"] {
        if let Ok(record) = ledger.stock(&sku.into()).await {
            tracing::info!(
                product_id = %record.product_id,
                available = record.available,
                version = record.version,
                "stock after demo"
            );
        }
    }
    tracing::info!(published = sink.published().len(), "events published");

    shutdown_signal().await;
    purger.abort();
    tracing::info!("worker stopped");
}
