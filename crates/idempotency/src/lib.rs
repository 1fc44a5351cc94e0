//! Idempotency guard.
//!
//! A command carrying a caller-supplied request key claims a record before
//! doing any work. Retries with the same (operation, key) pair see either the
//! claim still in progress or the stored outcome of the first attempt.
//!
//! ## Protocol
//!
//! 1. `begin` atomically claims the pair (`Fresh`), or reports an existing
//!    claim (`InProgress`) or a finished one (`Completed` with its outcome)
//! 2. The caller runs its business logic only on `Fresh`
//! 3. `complete` stores the outcome; `abandon` drops a claim whose command
//!    failed before producing any effect
//!
//! Records expire after a retention window and are then treated as absent.

pub mod error;
pub mod memory;
pub mod purge;
pub mod record;
pub mod store;

pub use error::{ConflictReason, IdempotencyError, Result};
pub use memory::InMemoryIdempotencyStore;
pub use purge::spawn_purger;
pub use record::{IdempotencyRecord, RecordStatus};
pub use store::{BeginOutcome, IdempotencyStore};

/// Default retention window of a record (24 hours).
pub const DEFAULT_TTL: chrono::Duration = chrono::Duration::hours(24);
