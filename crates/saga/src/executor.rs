//! Runs one collaborator action with a timeout and bounded retries.

use std::future::Future;
use std::time::Duration;

use crate::error::ServiceError;
use crate::retry::RetryPolicy;

/// Result of running one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Ok(T),
    /// The step gave up after `attempts` tries with `error` as the last failure.
    Failed { error: ServiceError, attempts: u32 },
}

impl<T> StepOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StepOutcome<U> {
        match self {
            StepOutcome::Ok(value) => StepOutcome::Ok(f(value)),
            StepOutcome::Failed { error, attempts } => StepOutcome::Failed { error, attempts },
        }
    }
}

/// Executes a single remote action.
///
/// Each attempt is bounded by `timeout`; a timeout is a transient failure.
/// Transient failures are retried with exponential backoff up to the policy's
/// attempt bound, terminal ones are returned after the first attempt. The
/// executor never compensates: that is left to the orchestrator.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    policy: RetryPolicy,
    timeout: Duration,
}

impl StepExecutor {
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `action` until it succeeds, fails terminally, or exhausts the bound.
    #[tracing::instrument(skip_all, fields(step = %step))]
    pub async fn run<T, F, Fut>(&self, step: &str, mut action: F) -> StepOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let kind = step_kind(step);
        let mut attempts = 0;

        loop {
            attempts += 1;
            metrics::counter!("step_attempts_total", "step" => kind.clone()).increment(1);

            let result = match tokio::time::timeout(self.timeout, action()).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout {
                    operation: step.to_string(),
                    after: self.timeout,
                }),
            };

            match result {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(attempts, "step succeeded after retry");
                    }
                    return StepOutcome::Ok(value);
                }
                Err(error) if error.is_transient() && self.policy.allows_another(attempts) => {
                    let delay = self.policy.delay_for_attempt(attempts - 1);
                    tracing::warn!(attempts, ?delay, %error, "transient step failure, retrying");
                    metrics::counter!("step_retries_total", "step" => kind.clone()).increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.is_transient() {
                        tracing::warn!(attempts, %error, "step retry bound reached");
                    } else {
                        tracing::info!(attempts, %error, "step failed terminally");
                    }
                    return StepOutcome::Failed { error, attempts };
                }
            }
        }
    }
}

/// Collapses per-product step names to their kind for metric labels.
fn step_kind(step: &str) -> String {
    step.split(':').next().unwrap_or(step).to_string()
}
