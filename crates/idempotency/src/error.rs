use common::RequestKey;
use thiserror::Error;

/// Why a record could not be completed or abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// No live record exists for the pair.
    Missing,
    /// The record was already completed.
    AlreadyCompleted,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::Missing => f.write_str("no record"),
            ConflictReason::AlreadyCompleted => f.write_str("already completed"),
        }
    }
}

/// Errors raised by the idempotency store.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The record is not in a state that allows the call. Indicates a
    /// programming error in the caller, not a business failure.
    #[error("Idempotency conflict for {operation}/{key}: {reason}")]
    Conflict {
        operation: String,
        key: RequestKey,
        reason: ConflictReason,
    },

    /// The outcome could not be stored or read back.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for idempotency operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;
