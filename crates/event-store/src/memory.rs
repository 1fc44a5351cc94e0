use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Debug, Default)]
struct Streams {
    by_aggregate: HashMap<AggregateId, Vec<EventEnvelope>>,
    /// Aggregate IDs in the order their first event arrived.
    creation_order: Vec<(String, AggregateId)>,
}

/// In-memory event store.
///
/// Streams are kept per aggregate behind a single write lock, so the version
/// check and the append happen atomically with respect to other writers.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<Streams>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.streams
            .read()
            .await
            .by_aggregate
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();
        let first_new_version = events[0].version;

        let mut streams = self.streams.write().await;
        let current_version = streams
            .by_aggregate
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version)
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            metrics::counter!("event_store_conflicts_total").increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        // Unique (aggregate, version) constraint.
        if first_new_version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(current_version);

        let is_new = current_version == Version::initial();
        streams
            .by_aggregate
            .entry(aggregate_id)
            .or_default()
            .extend(events);
        if is_new {
            streams.creation_order.push((aggregate_type, aggregate_id));
        }

        tracing::trace!(%aggregate_id, version = %last_version, "events appended");
        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams
            .by_aggregate
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams
            .by_aggregate
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version))
    }

    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let streams = self.streams.read().await;
        Ok(streams
            .creation_order
            .iter()
            .filter(|(kind, _)| kind == aggregate_type)
            .map(|(_, id)| *id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::new(
            aggregate_id,
            "Order",
            Version::new(version),
            event_type,
            &serde_json::json!({"test": true}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn append_and_read_back_in_order() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let v = store
            .append(vec![event(id, 1, "A")], AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(v, Version::first());

        let v = store
            .append(
                vec![event(id, 2, "B"), event(id, 3, "C")],
                AppendOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();
        assert_eq!(v, Version::new(3));

        let events = store.get_events_for_aggregate(id).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["A", "B", "C"]);
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn stale_expected_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "A")], AppendOptions::expect_new())
            .await
            .unwrap();

        let err = store
            .append(vec![event(id, 1, "B")], AppendOptions::expect_new())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            store.get_aggregate_version(id).await.unwrap(),
            Some(Version::first())
        );
    }

    #[tokio::test]
    async fn duplicate_version_without_expectation_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "A")], AppendOptions::default())
            .await
            .unwrap();

        let result = store
            .append(vec![event(id, 1, "B")], AppendOptions::default())
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_aggregate_has_no_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        assert!(store.get_aggregate_version(id).await.unwrap().is_none());
        assert!(store.get_events_for_aggregate(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aggregate_ids_are_listed_per_type_in_creation_order() {
        let store = InMemoryEventStore::new();
        let first = AggregateId::new();
        let second = AggregateId::new();

        for id in [first, second] {
            store
                .append(vec![event(id, 1, "A")], AppendOptions::expect_new())
                .await
                .unwrap();
        }
        store
            .append(
                vec![event(first, 2, "B")],
                AppendOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();

        assert_eq!(store.aggregate_ids("Order").await.unwrap(), [first, second]);
        assert!(store.aggregate_ids("Other").await.unwrap().is_empty());
    }
}
