//! Append-only event log.
//!
//! Every aggregate owns one stream of [`EventEnvelope`]s. Writers append
//! conditioned on the version they last read; a mismatch is rejected with
//! [`EventStoreError::ConcurrencyConflict`] instead of silently overwriting.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, Version};
pub use memory::InMemoryEventStore;
pub use store::{AppendOptions, EventStore};
