//! Circuit breaker in front of the payment collaborator.
//!
//! ```text
//! CLOSED ──(N transient failures)──► OPEN ──(cooldown)──► HALF_OPEN
//!    ▲                                 ▲                      │
//!    └────────────(trial ok)───────────┼──────────────────────┘
//!                                      └──────(trial fails)───┘
//! ```
//!
//! While open, calls fail fast with `ServiceError::Unavailable`, which the
//! step executor treats as transient.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{AggregateId, UserId};
use domain::Money;
use tokio::sync::RwLock;

use crate::error::ServiceError;
use crate::services::payment::{PaymentResult, PaymentService, RefundResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is let through.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Wraps a [`PaymentService`] with a circuit breaker.
///
/// Only transient failures count against the circuit; a declined card is a
/// healthy answer from the provider.
#[derive(Debug, Clone)]
pub struct CircuitBreakerPaymentService<P> {
    inner: P,
    config: CircuitBreakerConfig,
    breaker: Arc<RwLock<Breaker>>,
}

impl<P: PaymentService> CircuitBreakerPaymentService<P> {
    pub fn new(inner: P, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            config,
            breaker: Arc::new(RwLock::new(Breaker {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
            })),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub async fn state(&self) -> BreakerState {
        self.breaker.read().await.state
    }

    /// Returns false while the circuit is open and cooling down.
    async fn can_attempt(&self) -> bool {
        let mut breaker = self.breaker.write().await;
        match breaker.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled = breaker
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.cooldown);
                if cooled {
                    tracing::info!("payment breaker OPEN -> HALF_OPEN");
                    breaker.state = BreakerState::HalfOpen;
                }
                cooled
            }
        }
    }

    async fn on_success(&self) {
        let mut breaker = self.breaker.write().await;
        if breaker.state == BreakerState::HalfOpen {
            tracing::info!("payment breaker HALF_OPEN -> CLOSED");
        }
        breaker.state = BreakerState::Closed;
        breaker.failure_count = 0;
        breaker.opened_at = None;
    }

    async fn on_failure(&self) {
        let mut breaker = self.breaker.write().await;
        match breaker.state {
            BreakerState::Closed => {
                breaker.failure_count += 1;
                if breaker.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = breaker.failure_count,
                        "payment breaker CLOSED -> OPEN"
                    );
                    metrics::counter!("payment_breaker_opened_total").increment(1);
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!("payment breaker HALF_OPEN -> OPEN (trial call failed)");
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {
                breaker.failure_count += 1;
            }
        }
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        if !self.can_attempt().await {
            return Err(ServiceError::Unavailable(
                "payment circuit breaker open".to_string(),
            ));
        }

        let result = call.await;
        match &result {
            Err(e) if e.is_transient() => self.on_failure().await,
            _ => self.on_success().await,
        }
        result
    }
}

#[async_trait]
impl<P: PaymentService> PaymentService for CircuitBreakerPaymentService<P> {
    async fn process_payment(
        &self,
        order_id: AggregateId,
        amount: Money,
        payer_id: UserId,
    ) -> Result<PaymentResult, ServiceError> {
        self.guarded(self.inner.process_payment(order_id, amount, payer_id))
            .await
    }

    async fn refund_payment(&self, payment_id: &str) -> Result<RefundResult, ServiceError> {
        self.guarded(self.inner.refund_payment(payment_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payment::InMemoryPaymentService;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreakerPaymentService<InMemoryPaymentService> {
        CircuitBreakerPaymentService::new(
            InMemoryPaymentService::new(),
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown,
            },
        )
    }

    async fn charge(
        service: &CircuitBreakerPaymentService<InMemoryPaymentService>,
    ) -> Result<PaymentResult, ServiceError> {
        service
            .process_payment(AggregateId::new(), Money::from_cents(100), UserId::new())
            .await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let service = breaker(2, Duration::from_secs(60));
        service.inner().fail_next_charges(10);

        assert!(charge(&service).await.is_err());
        assert_eq!(service.state().await, BreakerState::Closed);
        assert!(charge(&service).await.is_err());
        assert_eq!(service.state().await, BreakerState::Open);

        let err = charge(&service).await.unwrap_err();
        assert!(err.is_transient());
        // The provider was not called while the circuit was open.
        assert_eq!(service.inner().charge_calls(), 2);
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_on_success() {
        let service = breaker(1, Duration::from_millis(10));
        service.inner().fail_next_charges(1);

        assert!(charge(&service).await.is_err());
        assert_eq!(service.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(charge(&service).await.is_ok());
        assert_eq!(service.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens() {
        let service = breaker(1, Duration::from_millis(10));
        service.inner().fail_next_charges(2);

        assert!(charge(&service).await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(charge(&service).await.is_err());
        assert_eq!(service.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_declines_do_not_trip_the_breaker() {
        let service = breaker(1, Duration::from_secs(60));
        service.inner().set_decline(true);

        for _ in 0..3 {
            assert!(matches!(
                charge(&service).await,
                Err(ServiceError::PaymentDeclined(_))
            ));
        }
        assert_eq!(service.state().await, BreakerState::Closed);
    }
}
