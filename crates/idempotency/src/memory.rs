use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::RequestKey;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    BeginOutcome, ConflictReason, DEFAULT_TTL, IdempotencyError, IdempotencyRecord,
    IdempotencyStore, RecordStatus, Result,
};

type RecordKey = (String, RequestKey);

fn record_check(operation: &str, result: &'static str) {
    metrics::counter!(
        "idempotency_checks_total",
        "operation" => operation.to_string(),
        "result" => result
    )
    .increment(1);
}

/// In-memory idempotency store with time-based eviction.
///
/// A single write lock covers the lookup and the insert in `begin`, so two
/// concurrent requests with the same key cannot both see `Fresh`.
#[derive(Debug, Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<RecordKey, IdempotencyRecord>>>,
    ttl: chrono::Duration,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl InMemoryIdempotencyStore {
    /// Creates a store whose records live for `ttl`.
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Returns the number of stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn conflict(operation: &str, key: &RequestKey, reason: ConflictReason) -> IdempotencyError {
        IdempotencyError::Conflict {
            operation: operation.to_string(),
            key: key.clone(),
            reason,
        }
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn begin(&self, operation: &str, key: &RequestKey) -> Result<BeginOutcome> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let record_key = (operation.to_string(), key.clone());

        if let Some(existing) = records.get(&record_key)
            && !existing.is_expired(now)
        {
            return match (existing.status, &existing.outcome) {
                (RecordStatus::Completed, Some(outcome)) => {
                    record_check(operation, "replay");
                    metrics::counter!("idempotency_replays_total").increment(1);
                    tracing::debug!(%key, operation, "replaying stored outcome");
                    Ok(BeginOutcome::Completed(outcome.clone()))
                }
                _ => {
                    record_check(operation, "in_progress");
                    Ok(BeginOutcome::InProgress {
                        started_at: existing.created_at,
                    })
                }
            };
        }

        records.insert(
            record_key,
            IdempotencyRecord::new_in_progress(operation, key.clone(), now, self.ttl),
        );
        record_check(operation, "fresh");
        Ok(BeginOutcome::Fresh)
    }

    async fn complete(&self, operation: &str, key: &RequestKey, outcome: Value) -> Result<()> {
        let now = Utc::now();
        let mut records = self.records.write().await;

        match records.get_mut(&(operation.to_string(), key.clone())) {
            Some(record) if !record.is_expired(now) => match record.status {
                RecordStatus::InProgress => {
                    record.complete(outcome, now);
                    Ok(())
                }
                RecordStatus::Completed => Err(Self::conflict(
                    operation,
                    key,
                    ConflictReason::AlreadyCompleted,
                )),
            },
            _ => Err(Self::conflict(operation, key, ConflictReason::Missing)),
        }
    }

    async fn abandon(&self, operation: &str, key: &RequestKey) -> Result<()> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let record_key = (operation.to_string(), key.clone());

        match records
            .get(&record_key)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.status)
        {
            Some(RecordStatus::Completed) => Err(Self::conflict(
                operation,
                key,
                ConflictReason::AlreadyCompleted,
            )),
            Some(RecordStatus::InProgress) => {
                records.remove(&record_key);
                tracing::debug!(%key, operation, "idempotency claim abandoned");
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn get(&self, operation: &str, key: &RequestKey) -> Result<Option<IdempotencyRecord>> {
        let now = Utc::now();
        Ok(self
            .records
            .read()
            .await
            .get(&(operation.to_string(), key.clone()))
            .filter(|r| !r.is_expired(now))
            .cloned())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let removed = before - records.len();
        if removed > 0 {
            metrics::counter!("idempotency_purged_total").increment(removed as u64);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OP: &str = "create_order";

    #[tokio::test]
    async fn first_begin_is_fresh_then_in_progress() {
        let store = InMemoryIdempotencyStore::default();
        let key = RequestKey::new("req-1");

        assert_eq!(store.begin(OP, &key).await.unwrap(), BeginOutcome::Fresh);
        assert!(matches!(
            store.begin(OP, &key).await.unwrap(),
            BeginOutcome::InProgress { .. }
        ));
    }

    #[tokio::test]
    async fn completed_outcome_is_replayed() {
        let store = InMemoryIdempotencyStore::default();
        let key = RequestKey::new("req-1");
        store.begin(OP, &key).await.unwrap();
        store
            .complete(OP, &key, json!({"status": "CONFIRMED"}))
            .await
            .unwrap();

        for _ in 0..3 {
            assert_eq!(
                store.begin(OP, &key).await.unwrap(),
                BeginOutcome::Completed(json!({"status": "CONFIRMED"}))
            );
        }
    }

    #[tokio::test]
    async fn keys_are_scoped_by_operation() {
        let store = InMemoryIdempotencyStore::default();
        let key = RequestKey::new("shared");
        assert_eq!(store.begin(OP, &key).await.unwrap(), BeginOutcome::Fresh);
        assert_eq!(
            store.begin("cancel_order", &key).await.unwrap(),
            BeginOutcome::Fresh
        );
    }

    #[tokio::test]
    async fn complete_requires_an_open_record() {
        let store = InMemoryIdempotencyStore::default();
        let key = RequestKey::new("req-1");

        assert!(matches!(
            store.complete(OP, &key, json!(1)).await,
            Err(IdempotencyError::Conflict {
                reason: ConflictReason::Missing,
                ..
            })
        ));

        store.begin(OP, &key).await.unwrap();
        store.complete(OP, &key, json!(1)).await.unwrap();
        assert!(matches!(
            store.complete(OP, &key, json!(2)).await,
            Err(IdempotencyError::Conflict {
                reason: ConflictReason::AlreadyCompleted,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn abandon_releases_the_claim() {
        let store = InMemoryIdempotencyStore::default();
        let key = RequestKey::new("req-1");
        store.begin(OP, &key).await.unwrap();

        store.abandon(OP, &key).await.unwrap();
        assert_eq!(store.begin(OP, &key).await.unwrap(), BeginOutcome::Fresh);

        store.complete(OP, &key, json!("done")).await.unwrap();
        assert!(store.abandon(OP, &key).await.is_err());
        assert!(store.abandon(OP, &"unknown".into()).await.is_ok());
    }

    #[tokio::test]
    async fn abandon_ignores_expired_records() {
        let store = InMemoryIdempotencyStore::default();
        let key = RequestKey::new("req-old");
        let long_ago = Utc::now() - chrono::Duration::days(2);
        let mut record = IdempotencyRecord::new_in_progress(OP, key.clone(), long_ago, DEFAULT_TTL);
        record.complete(json!("done"), long_ago);
        store
            .records
            .write()
            .await
            .insert((OP.to_string(), key.clone()), record);

        // Same view as `begin`: the expired outcome no longer exists.
        assert!(store.abandon(OP, &key).await.is_ok());
        assert_eq!(store.begin(OP, &key).await.unwrap(), BeginOutcome::Fresh);
    }

    #[tokio::test]
    async fn expired_records_are_absent_and_purged() {
        let store = InMemoryIdempotencyStore::new(chrono::Duration::zero());
        let key = RequestKey::new("req-1");

        assert_eq!(store.begin(OP, &key).await.unwrap(), BeginOutcome::Fresh);
        // With a zero retention window the claim is already expired.
        assert_eq!(store.begin(OP, &key).await.unwrap(), BeginOutcome::Fresh);
        assert!(store.get(OP, &key).await.unwrap().is_none());

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn live_records_survive_purge() {
        let store = InMemoryIdempotencyStore::default();
        store.begin(OP, &"a".into()).await.unwrap();
        store.begin(OP, &"b".into()).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert_eq!(store.len().await, 2);
        let record = store.get(OP, &"a".into()).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::InProgress);
        assert_eq!(record.expires_at - record.created_at, DEFAULT_TTL);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_begins_admit_exactly_one() {
        let store = InMemoryIdempotencyStore::default();
        let key = RequestKey::new("contended");

        let tasks = (0..32).map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.begin(OP, &key).await.unwrap() })
        });
        let outcomes = futures_util::future::join_all(tasks).await;

        let fresh = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(BeginOutcome::Fresh)))
            .count();
        assert_eq!(fresh, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purger_evicts_in_the_background() {
        let store = Arc::new(InMemoryIdempotencyStore::new(chrono::Duration::zero()));
        store.begin(OP, &"old".into()).await.unwrap();

        let handle = crate::spawn_purger(store.clone(), std::time::Duration::from_secs(60));
        tokio::time::sleep(std::time::Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(store.is_empty().await);
        handle.abort();
    }
}
