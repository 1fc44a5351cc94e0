//! Domain layer for order placement.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - CommandHandler: load from history, decide, append conditioned on version
//! - The Order aggregate and its lifecycle state machine

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult, replay};
pub use error::DomainError;
pub use order::{
    CancellationReason, CommittedStep, CompensationFailureRecord, ConfirmOrder, FinishCancellation,
    LineItem, Money, Order, OrderError, OrderEvent, OrderService, OrderStatus, PaymentRecord,
    PlaceOrder, ReasonCode, RecordCompensation, RecordCompensationFailure, RecordPayment,
    RecordReservation, ReservationRecord, StartCancellation, StatusTransition, step_names,
};
