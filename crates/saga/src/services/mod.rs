//! Collaborator contracts and in-memory implementations for saga steps.

pub mod breaker;
pub mod inventory;
pub mod payment;

pub use breaker::{BreakerState, CircuitBreakerConfig, CircuitBreakerPaymentService};
pub use inventory::{InventoryService, LedgerInventoryService, ReleaseResult, ReservationResult};
pub use payment::{
    InMemoryPaymentService, Payment, PaymentResult, PaymentService, PaymentStatus, RefundResult,
};
