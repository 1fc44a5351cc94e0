use chrono::{DateTime, Utc};
use common::RequestKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Claimed, business logic running.
    InProgress,
    /// Finished; the outcome is kept for replay.
    Completed,
}

/// One claimed (operation, key) pair.
///
/// The record goes through these states:
/// 1. `InProgress` - claimed by `begin`
/// 2. `Completed` - outcome stored by `complete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub operation: String,
    pub key: RequestKey,
    pub status: RecordStatus,

    /// Stored outcome, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// After this instant the record is treated as absent.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates a new in-progress record.
    pub fn new_in_progress(
        operation: impl Into<String>,
        key: RequestKey,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            operation: operation.into(),
            key,
            status: RecordStatus::InProgress,
            outcome: None,
            created_at: now,
            completed_at: None,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Marks the record completed with the given outcome.
    pub fn complete(&mut self, outcome: Value, now: DateTime<Utc>) {
        self.status = RecordStatus::Completed;
        self.outcome = Some(outcome);
        self.completed_at = Some(now);
    }
}
