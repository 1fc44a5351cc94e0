//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The stored envelopes, carrying the event IDs assigned at append time.
    pub envelopes: Vec<EventEnvelope>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// A request to change one aggregate.
///
/// Commands may be rejected if the aggregate's current state doesn't allow
/// the action.
pub trait Command: Send + Sync {
    /// The type of aggregate this command targets.
    type Aggregate: Aggregate;

    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;
}

/// Rebuilds an aggregate from an empty state by applying every envelope in order.
pub fn replay<A>(envelopes: &[EventEnvelope]) -> Result<A, DomainError>
where
    A: Aggregate,
{
    let mut aggregate = A::default();
    for envelope in envelopes {
        let event: A::Event = envelope.decode()?;
        aggregate.apply(event);
        aggregate.set_version(envelope.version);
    }
    Ok(aggregate)
}

/// Handler for executing commands against aggregates.
///
/// The handler:
/// 1. Loads the aggregate by replaying its history
/// 2. Runs the command to produce events
/// 3. Appends the events conditioned on the version it loaded
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from its full history.
    ///
    /// If the aggregate doesn't exist, returns a default instance.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;
        replay(&events)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either the events to append or an error. The append is conditioned on
    /// the version that was loaded, so a concurrent writer causes
    /// `ConcurrencyConflict` rather than a lost update.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                envelopes: vec![],
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, current_version, &events)?;

        let new_version = self
            .store
            .append(
                envelopes.clone(),
                AppendOptions::expect_version(current_version),
            )
            .await?;

        for event in &events {
            metrics::counter!("order_events_appended_total", "event" => event.event_type())
                .increment(1);
        }
        aggregate.apply_events(events.iter().cloned());
        debug_assert_eq!(aggregate.version(), new_version);

        Ok(CommandResult {
            aggregate,
            events,
            envelopes,
            new_version,
        })
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            envelopes.push(EventEnvelope::new(
                aggregate_id,
                A::aggregate_type(),
                version,
                event.event_type(),
                event,
            )?);
        }

        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TallyEvent {
        Opened { id: AggregateId },
        Added { amount: i32 },
    }

    impl DomainEvent for TallyEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TallyEvent::Opened { .. } => "TallyOpened",
                TallyEvent::Added { .. } => "TallyAdded",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Tally {
        id: Option<AggregateId>,
        total: i32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("negative amount: {0}")]
    struct NegativeAmount(i32);

    impl From<NegativeAmount> for DomainError {
        fn from(e: NegativeAmount) -> Self {
            DomainError::Serialization(serde_json::Error::io(std::io::Error::other(
                e.to_string(),
            )))
        }
    }

    impl Aggregate for Tally {
        type Event = TallyEvent;
        type Error = NegativeAmount;

        fn aggregate_type() -> &'static str {
            "Tally"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                TallyEvent::Opened { id } => self.id = Some(id),
                TallyEvent::Added { amount } => self.total += amount,
            }
        }
    }

    fn add(amount: i32) -> impl FnOnce(&Tally) -> Result<Vec<TallyEvent>, NegativeAmount> {
        move |_| {
            if amount < 0 {
                Err(NegativeAmount(amount))
            } else {
                Ok(vec![TallyEvent::Added { amount }])
            }
        }
    }

    #[tokio::test]
    async fn execute_appends_and_bumps_version_per_event() {
        let handler: CommandHandler<_, Tally> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let result = handler
            .execute(id, |_| {
                Ok(vec![
                    TallyEvent::Opened { id },
                    TallyEvent::Added { amount: 5 },
                ])
            })
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::new(2));
        assert_eq!(result.aggregate.version(), Version::new(2));
        assert_eq!(result.envelopes.len(), 2);
        assert_eq!(result.envelopes[1].version, Version::new(2));
        assert_eq!(result.aggregate.total, 5);
    }

    #[tokio::test]
    async fn rejected_command_appends_nothing() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let id = AggregateId::new();

        let result = handler.execute(id, add(-1)).await;
        assert!(result.is_err());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn empty_decision_returns_without_persisting() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());

        let result = handler
            .execute(AggregateId::new(), |_| Ok(vec![]))
            .await
            .unwrap();

        assert!(result.events.is_empty());
        assert_eq!(result.new_version, Version::initial());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn load_existing_distinguishes_missing_aggregates() {
        let handler: CommandHandler<_, Tally> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();
        assert!(handler.load_existing(id).await.unwrap().is_none());

        handler
            .execute(id, |_| Ok(vec![TallyEvent::Opened { id }]))
            .await
            .unwrap();
        handler.execute(id, add(7)).await.unwrap();

        let tally = handler.load_existing(id).await.unwrap().unwrap();
        assert_eq!(tally.total, 7);
        assert_eq!(tally.version(), Version::new(2));
    }

    #[tokio::test]
    async fn replay_matches_incremental_state() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Tally> = CommandHandler::new(store.clone());
        let id = AggregateId::new();

        handler
            .execute(id, |_| Ok(vec![TallyEvent::Opened { id }]))
            .await
            .unwrap();
        let last = handler.execute(id, add(3)).await.unwrap();

        let history = store.get_events_for_aggregate(id).await.unwrap();
        let rebuilt: Tally = replay(&history).unwrap();
        assert_eq!(rebuilt.total, last.aggregate.total);
        assert_eq!(rebuilt.version(), last.aggregate.version());
    }
}
