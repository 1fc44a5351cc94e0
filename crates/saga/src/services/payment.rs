//! Payment collaborator contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, UserId};
use domain::Money;

use crate::error::ServiceError;

/// Result of a successful payment charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    /// The payment ID assigned by the payment service.
    pub payment_id: String,
    pub amount: Money,
    /// True if the order had already been charged.
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundResult {
    Refunded,
    AlreadyRefunded,
}

/// Payment processing operations.
///
/// Charges are idempotent per order and refunds are idempotent per payment.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges `payer_id` for an order.
    async fn process_payment(
        &self,
        order_id: AggregateId,
        amount: Money,
        payer_id: UserId,
    ) -> Result<PaymentResult, ServiceError>;

    /// Refunds a previously made payment.
    async fn refund_payment(&self, payment_id: &str) -> Result<RefundResult, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Charged,
    Refunded,
}

/// A payment held by [`InMemoryPaymentService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub payment_id: String,
    pub order_id: AggregateId,
    pub payer_id: UserId,
    pub amount: Money,
    pub status: PaymentStatus,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, Payment>,
    by_order: HashMap<AggregateId, String>,
    next_id: u32,
    charge_calls: u32,
    decline: bool,
    failing_charges: u32,
    charge_delay: Option<Duration>,
    fail_refunds: bool,
}

/// In-memory payment service with failure injection for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every charge while set.
    pub fn set_decline(&self, decline: bool) {
        self.state().decline = decline;
    }

    /// Makes the next `count` charges fail with `Unavailable`.
    pub fn fail_next_charges(&self, count: u32) {
        self.state().failing_charges = count;
    }

    /// Delays every charge by `delay` before it is processed.
    pub fn set_charge_delay(&self, delay: Option<Duration>) {
        self.state().charge_delay = delay;
    }

    /// Makes every refund fail with `Unavailable` while set.
    pub fn fail_refunds(&self, fail: bool) {
        self.state().fail_refunds = fail;
    }

    /// Returns the number of payments currently charged (not refunded).
    pub fn charged_count(&self) -> usize {
        self.count(PaymentStatus::Charged)
    }

    pub fn refunded_count(&self) -> usize {
        self.count(PaymentStatus::Refunded)
    }

    /// Returns how many times a charge reached the provider.
    pub fn charge_calls(&self) -> u32 {
        self.state().charge_calls
    }

    /// Returns the payment made for an order, if any.
    pub fn payment_for_order(&self, order_id: AggregateId) -> Option<Payment> {
        let state = self.state();
        state
            .by_order
            .get(&order_id)
            .and_then(|id| state.payments.get(id))
            .cloned()
    }

    fn count(&self, status: PaymentStatus) -> usize {
        self.state()
            .payments
            .values()
            .filter(|p| p.status == status)
            .count()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    #[tracing::instrument(skip_all, fields(%order_id, %amount))]
    async fn process_payment(
        &self,
        order_id: AggregateId,
        amount: Money,
        payer_id: UserId,
    ) -> Result<PaymentResult, ServiceError> {
        let delay = self.state().charge_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.charge_calls += 1;

        if state.failing_charges > 0 {
            state.failing_charges -= 1;
            return Err(ServiceError::Unavailable("payment provider".to_string()));
        }

        if let Some(existing) = state
            .by_order
            .get(&order_id)
            .and_then(|id| state.payments.get(id))
            && existing.status == PaymentStatus::Charged
        {
            tracing::debug!(payment_id = %existing.payment_id, "order already charged");
            return Ok(PaymentResult {
                payment_id: existing.payment_id.clone(),
                amount: existing.amount,
                replayed: true,
            });
        }

        if state.decline {
            return Err(ServiceError::PaymentDeclined(format!(
                "charge of {amount} declined"
            )));
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state.payments.insert(
            payment_id.clone(),
            Payment {
                payment_id: payment_id.clone(),
                order_id,
                payer_id,
                amount,
                status: PaymentStatus::Charged,
            },
        );
        state.by_order.insert(order_id, payment_id.clone());

        Ok(PaymentResult {
            payment_id,
            amount,
            replayed: false,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn refund_payment(&self, payment_id: &str) -> Result<RefundResult, ServiceError> {
        let mut state = self.state();
        if state.fail_refunds {
            return Err(ServiceError::Unavailable("payment provider".to_string()));
        }

        match state.payments.get_mut(payment_id) {
            Some(payment) if payment.status == PaymentStatus::Refunded => {
                Ok(RefundResult::AlreadyRefunded)
            }
            Some(payment) => {
                payment.status = PaymentStatus::Refunded;
                Ok(RefundResult::Refunded)
            }
            None => Err(ServiceError::Internal(format!(
                "unknown payment {payment_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_charge_and_refund() {
        let service = InMemoryPaymentService::new();
        let order_id = AggregateId::new();
        let amount = Money::from_cents(5000);

        let result = service
            .process_payment(order_id, amount, UserId::new())
            .await
            .unwrap();
        assert!(result.payment_id.starts_with("PAY-"));
        assert_eq!(service.charged_count(), 1);

        assert_eq!(
            service.refund_payment(&result.payment_id).await.unwrap(),
            RefundResult::Refunded
        );
        assert_eq!(
            service.refund_payment(&result.payment_id).await.unwrap(),
            RefundResult::AlreadyRefunded
        );
        assert_eq!(service.charged_count(), 0);
        assert_eq!(service.refunded_count(), 1);
    }

    #[tokio::test]
    async fn test_charge_is_idempotent_per_order() {
        let service = InMemoryPaymentService::new();
        let order_id = AggregateId::new();
        let payer = UserId::new();
        let amount = Money::from_cents(1000);

        let r1 = service.process_payment(order_id, amount, payer).await.unwrap();
        let r2 = service.process_payment(order_id, amount, payer).await.unwrap();

        assert_eq!(r1.payment_id, "PAY-0001");
        assert_eq!(r2.payment_id, "PAY-0001");
        assert!(r2.replayed);
        assert_eq!(service.charged_count(), 1);
    }

    #[tokio::test]
    async fn test_sequential_payment_ids() {
        let service = InMemoryPaymentService::new();
        let amount = Money::from_cents(1000);

        let r1 = service
            .process_payment(AggregateId::new(), amount, UserId::new())
            .await
            .unwrap();
        let r2 = service
            .process_payment(AggregateId::new(), amount, UserId::new())
            .await
            .unwrap();

        assert_eq!(r1.payment_id, "PAY-0001");
        assert_eq!(r2.payment_id, "PAY-0002");
    }

    #[tokio::test]
    async fn test_decline() {
        let service = InMemoryPaymentService::new();
        service.set_decline(true);

        let err = service
            .process_payment(AggregateId::new(), Money::from_cents(5000), UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PaymentDeclined(_)));
        assert_eq!(service.charged_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_outages() {
        let service = InMemoryPaymentService::new();
        service.fail_next_charges(2);
        let order_id = AggregateId::new();

        for _ in 0..2 {
            let err = service
                .process_payment(order_id, Money::from_cents(10), UserId::new())
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        service
            .process_payment(order_id, Money::from_cents(10), UserId::new())
            .await
            .unwrap();
        assert_eq!(service.charge_calls(), 3);

        service.fail_refunds(true);
        let payment = service.payment_for_order(order_id).unwrap();
        assert!(service.refund_payment(&payment.payment_id).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_refund_is_terminal() {
        let err = InMemoryPaymentService::new()
            .refund_payment("PAY-9999")
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
