use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::IdempotencyStore;

/// Spawns a task that evicts expired records every `every`.
///
/// The task runs until the returned handle is aborted.
pub fn spawn_purger<S>(store: Arc<S>, every: Duration) -> JoinHandle<()>
where
    S: IdempotencyStore + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "purged expired idempotency records"),
                Err(e) => tracing::warn!(error = %e, "idempotency purge failed"),
            }
        }
    })
}
