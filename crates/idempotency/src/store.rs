use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::RequestKey;
use serde_json::Value;

use crate::{IdempotencyRecord, Result};

/// Result of claiming an (operation, key) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// No live record existed; one was created in progress. Proceed.
    Fresh,

    /// Another attempt holds the claim. Retry later; this is neither
    /// success nor failure.
    InProgress { started_at: DateTime<Utc> },

    /// The pair already finished. Reply with the stored outcome.
    Completed(Value),
}

/// Storage for idempotency records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claims the pair, or reports the existing record.
    async fn begin(&self, operation: &str, key: &RequestKey) -> Result<BeginOutcome>;

    /// Stores the outcome of an in-progress record.
    ///
    /// Fails with a conflict if there is no live record or it is already completed.
    async fn complete(&self, operation: &str, key: &RequestKey, outcome: Value) -> Result<()>;

    /// Drops an in-progress claim so a retry can start over.
    ///
    /// A missing record is a no-op; a completed one is a conflict.
    async fn abandon(&self, operation: &str, key: &RequestKey) -> Result<()>;

    /// Returns the live record of the pair, if any.
    async fn get(&self, operation: &str, key: &RequestKey) -> Result<Option<IdempotencyRecord>>;

    /// Evicts expired records and returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}
