//! Saga orchestration for order placement.
//!
//! An order is placed in `PENDING`, then its saga reserves stock for every
//! line and charges the total:
//! 1. Reserve stock (one step per line item)
//! 2. Charge payment (skipped for free orders)
//!
//! If any step fails, previously committed steps are compensated in reverse
//! order and the order ends `CANCELLED`. Otherwise reservations are consumed
//! and the order ends `CONFIRMED`.

pub mod config;
pub mod emitter;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod placement;
pub mod plan;
pub mod retry;
pub mod services;

pub use config::SagaConfig;
pub use emitter::{EventEmitter, EventSink, InMemoryEventSink, PublishedEvent, topics};
pub use error::{Result, SagaError, ServiceError};
pub use executor::{StepExecutor, StepOutcome};
pub use orchestrator::{SagaOrchestrator, SagaOutcome};
pub use placement::{CREATE_ORDER, CreateOrder, CreateOrderReply, OrderPlacementService, OrderReceipt};
pub use plan::{SagaPlan, SagaStep};
pub use retry::RetryPolicy;
pub use services::{
    BreakerState, CircuitBreakerConfig, CircuitBreakerPaymentService, InMemoryPaymentService,
    InventoryService, LedgerInventoryService, Payment, PaymentResult, PaymentService,
    PaymentStatus, RefundResult, ReleaseResult, ReservationResult,
};
