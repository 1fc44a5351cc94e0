//! Publishes committed order events to an event sink.
//!
//! Delivery is at least once. Every payload carries the store's event ID,
//! which stays the same when an event is redelivered, so consumers can
//! deduplicate on it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::AggregateId;
use event_store::{EventEnvelope, EventStore};
use serde_json::{Value, json};

use crate::error::{Result, ServiceError};
use crate::executor::{StepExecutor, StepOutcome};

/// Topics order events are published on.
pub mod topics {
    pub const PLACED: &str = "orders.placed";
    pub const PROGRESS: &str = "orders.progress";
    pub const CONFIRMED: &str = "orders.confirmed";
    pub const CANCELLED: &str = "orders.cancelled";

    /// Maps a stored event type to its topic.
    pub fn for_event_type(event_type: &str) -> &'static str {
        match event_type {
            "OrderPlaced" => PLACED,
            "OrderConfirmed" => CONFIRMED,
            "OrderCancelled" => CANCELLED,
            _ => PROGRESS,
        }
    }
}

/// Destination for published events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> std::result::Result<(), ServiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct SinkState {
    published: Vec<PublishedEvent>,
    failing: u32,
}

/// Event sink that keeps every published event in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSink {
    state: Arc<Mutex<SinkState>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail with `Unavailable`.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state().failing = count;
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.state().published.clone()
    }

    /// Returns the payloads published on `topic` for one order.
    pub fn published_for(&self, topic: &str, order_id: AggregateId) -> Vec<Value> {
        let order_id = order_id.to_string();
        self.state()
            .published
            .iter()
            .filter(|e| e.topic == topic && e.payload["order_id"] == order_id.as_str())
            .map(|e| e.payload.clone())
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, topic: &str, payload: Value) -> std::result::Result<(), ServiceError> {
        let mut state = self.state();
        if state.failing > 0 {
            state.failing -= 1;
            return Err(ServiceError::Unavailable("event sink".to_string()));
        }
        state.published.push(PublishedEvent {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Builds the published form of a stored order event.
pub fn event_payload(envelope: &EventEnvelope) -> Value {
    json!({
        "event_id": envelope.event_id,
        "order_id": envelope.aggregate_id,
        "version": envelope.version,
        "event_type": envelope.event_type,
        "occurred_at": envelope.timestamp,
        "data": envelope.payload,
    })
}

/// Publishes order events after they are committed.
#[derive(Debug, Clone)]
pub struct EventEmitter<K> {
    sink: K,
    executor: StepExecutor,
}

impl<K: EventSink> EventEmitter<K> {
    /// Publishing retries transient sink failures through `executor`.
    pub fn new(sink: K, executor: StepExecutor) -> Self {
        Self { sink, executor }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Publishes one stored event.
    pub async fn publish(&self, envelope: &EventEnvelope) -> std::result::Result<(), ServiceError> {
        let topic = topics::for_event_type(&envelope.event_type);
        let payload = event_payload(envelope);

        match self
            .executor
            .run("publish_event", || self.sink.publish(topic, payload.clone()))
            .await
        {
            StepOutcome::Ok(()) => {
                metrics::counter!("events_published_total", "topic" => topic).increment(1);
                Ok(())
            }
            StepOutcome::Failed { error, .. } => Err(error),
        }
    }

    /// Publishes committed events in order.
    ///
    /// A publish that still fails after retries is logged and skipped; the
    /// order history remains the source of truth and can be re-driven with
    /// [`EventEmitter::republish_history`]. Returns how many were published.
    pub async fn emit(&self, envelopes: &[EventEnvelope]) -> usize {
        let mut published = 0;
        for envelope in envelopes {
            match self.publish(envelope).await {
                Ok(()) => published += 1,
                Err(error) => {
                    metrics::counter!("events_publish_failures_total").increment(1);
                    tracing::error!(
                        event_id = %envelope.event_id,
                        order_id = %envelope.aggregate_id,
                        event_type = %envelope.event_type,
                        %error,
                        "event publish failed"
                    );
                }
            }
        }
        published
    }

    /// Publishes an order's full history again, oldest first.
    #[tracing::instrument(skip(self, store))]
    pub async fn republish_history<S: EventStore>(
        &self,
        store: &S,
        order_id: AggregateId,
    ) -> Result<usize> {
        let history = store.get_events_for_aggregate(order_id).await?;
        let published = self.emit(&history).await;
        tracing::info!(events = history.len(), published, "order history republished");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{RequestKey, UserId};
    use domain::{LineItem, Money, OrderService, PlaceOrder};
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::retry::RetryPolicy;

    fn emitter(sink: InMemoryEventSink, attempts: u32) -> EventEmitter<InMemoryEventSink> {
        EventEmitter::new(
            sink,
            StepExecutor::new(
                RetryPolicy::builder()
                    .max_attempts(attempts)
                    .initial_delay(Duration::from_millis(1))
                    .build(),
                Duration::from_secs(1),
            ),
        )
    }

    async fn placed_order(store: &InMemoryEventStore) -> (AggregateId, Vec<EventEnvelope>) {
        let service = OrderService::new(store.clone());
        let cmd = PlaceOrder::new(
            UserId::new(),
            RequestKey::new("req"),
            vec![LineItem::new("SKU-1", 1, Money::from_cents(100))],
        );
        let order_id = cmd.order_id;
        let result = service.place_order(cmd).await.unwrap();
        (order_id, result.envelopes)
    }

    #[test]
    fn test_topics() {
        assert_eq!(topics::for_event_type("OrderPlaced"), "orders.placed");
        assert_eq!(topics::for_event_type("StockReserved"), "orders.progress");
        assert_eq!(topics::for_event_type("OrderConfirmed"), "orders.confirmed");
        assert_eq!(topics::for_event_type("OrderCancelled"), "orders.cancelled");
    }

    #[tokio::test]
    async fn test_payload_carries_event_identity() {
        let store = InMemoryEventStore::new();
        let (order_id, envelopes) = placed_order(&store).await;
        let sink = InMemoryEventSink::new();

        assert_eq!(emitter(sink.clone(), 1).emit(&envelopes).await, 1);

        let payloads = sink.published_for(topics::PLACED, order_id);
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            payloads[0]["event_id"],
            json!(envelopes[0].event_id.to_string())
        );
        assert_eq!(payloads[0]["version"], 1);
        assert_eq!(payloads[0]["event_type"], "OrderPlaced");
        assert_eq!(payloads[0]["data"]["type"], "OrderPlaced");
    }

    #[tokio::test]
    async fn test_transient_sink_failures_are_retried() {
        let store = InMemoryEventStore::new();
        let (_, envelopes) = placed_order(&store).await;
        let sink = InMemoryEventSink::new();
        sink.fail_next_publishes(2);

        assert_eq!(emitter(sink.clone(), 3).emit(&envelopes).await, 1);
        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_publish_can_be_redriven() {
        let store = InMemoryEventStore::new();
        let (order_id, envelopes) = placed_order(&store).await;
        let sink = InMemoryEventSink::new();
        let emitter = emitter(sink.clone(), 1);

        sink.fail_next_publishes(1);
        assert_eq!(emitter.emit(&envelopes).await, 0);
        assert!(sink.published().is_empty());

        assert_eq!(emitter.republish_history(&store, order_id).await.unwrap(), 1);
        let redelivered = sink.published_for(topics::PLACED, order_id);
        assert_eq!(redelivered[0]["event_id"], json!(envelopes[0].event_id.to_string()));
    }
}
