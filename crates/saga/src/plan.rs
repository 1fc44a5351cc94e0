//! Typed step plans.
//!
//! A plan is an ordered list of step descriptors. The orchestrator resolves
//! each descriptor to its forward action and compensation when it runs.

use std::collections::HashSet;

use common::{ProductId, UserId};
use domain::{Money, Order, step_names};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// One step of an order saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SagaStep {
    /// Hold `quantity` units of a product; compensated by releasing them.
    ReserveStock { product_id: ProductId, quantity: u32 },

    /// Charge the order total; compensated by a refund.
    ChargePayment { amount: Money, payer_id: UserId },
}

impl SagaStep {
    /// Name under which the step is recorded in the order history.
    pub fn name(&self) -> String {
        match self {
            SagaStep::ReserveStock { product_id, .. } => step_names::reserve_stock(product_id),
            SagaStep::ChargePayment { .. } => step_names::CHARGE_PAYMENT.to_string(),
        }
    }
}

/// A validated, ordered list of saga steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaPlan {
    steps: Vec<SagaStep>,
}

impl SagaPlan {
    /// Builds a plan, rejecting step lists the orchestrator cannot run.
    ///
    /// A plan needs at least one reservation, every reservation must come
    /// before the payment, and no step may appear twice.
    pub fn new(steps: Vec<SagaStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(SagaError::InvalidPlan("plan has no steps".to_string()));
        }

        let mut names = HashSet::new();
        let mut seen_payment = false;
        let mut reservations = 0;
        for step in &steps {
            if !names.insert(step.name()) {
                return Err(SagaError::InvalidPlan(format!(
                    "step {} appears twice",
                    step.name()
                )));
            }
            match step {
                SagaStep::ReserveStock {
                    product_id,
                    quantity,
                } => {
                    if seen_payment {
                        return Err(SagaError::InvalidPlan(format!(
                            "reservation of {product_id} follows the payment"
                        )));
                    }
                    if *quantity == 0 {
                        return Err(SagaError::InvalidPlan(format!(
                            "reservation of {product_id} has zero quantity"
                        )));
                    }
                    reservations += 1;
                }
                SagaStep::ChargePayment { amount, .. } => {
                    if !amount.is_positive() {
                        return Err(SagaError::InvalidPlan(format!(
                            "payment amount {amount} is not positive"
                        )));
                    }
                    seen_payment = true;
                }
            }
        }
        if reservations == 0 {
            return Err(SagaError::InvalidPlan(
                "plan reserves no stock".to_string(),
            ));
        }

        Ok(Self { steps })
    }

    /// Derives the plan of a placed order: one reservation per line in line
    /// order, then the payment if the total is positive.
    pub fn for_order(order: &Order) -> Result<Self> {
        let payer_id = order
            .user_id()
            .ok_or_else(|| SagaError::InvalidPlan("order has not been placed".to_string()))?;

        let mut steps: Vec<SagaStep> = order
            .items()
            .iter()
            .map(|item| SagaStep::ReserveStock {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect();
        if order.requires_payment() {
            steps.push(SagaStep::ChargePayment {
                amount: order.total_amount(),
                payer_id,
            });
        }

        Self::new(steps)
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use common::{AggregateId, RequestKey};
    use domain::{Aggregate, LineItem};

    use super::*;

    fn placed(items: Vec<LineItem>) -> Order {
        let mut order = Order::default();
        let events = order
            .place(AggregateId::new(), UserId::new(), RequestKey::new("k"), items)
            .unwrap();
        order.apply_events(events);
        order
    }

    fn reserve(sku: &str, quantity: u32) -> SagaStep {
        SagaStep::ReserveStock {
            product_id: ProductId::new(sku),
            quantity,
        }
    }

    fn charge(cents: i64) -> SagaStep {
        SagaStep::ChargePayment {
            amount: Money::from_cents(cents),
            payer_id: UserId::new(),
        }
    }

    #[test]
    fn test_plan_for_order_reserves_each_line_then_charges() {
        let order = placed(vec![
            LineItem::new("A", 2, Money::from_cents(500)),
            LineItem::new("B", 1, Money::from_cents(250)),
        ]);
        let plan = SagaPlan::for_order(&order).unwrap();

        let names: Vec<String> = plan.steps().iter().map(SagaStep::name).collect();
        assert_eq!(
            names,
            vec!["reserve_stock:A", "reserve_stock:B", "charge_payment"]
        );
        assert_eq!(
            plan.steps()[2],
            SagaStep::ChargePayment {
                amount: Money::from_cents(1250),
                payer_id: order.user_id().unwrap(),
            }
        );
    }

    #[test]
    fn test_free_orders_skip_payment() {
        let order = placed(vec![LineItem::new("FREEBIE", 1, Money::zero())]);
        let plan = SagaPlan::for_order(&order).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan.steps()[0], SagaStep::ReserveStock { .. }));
    }

    #[test]
    fn test_unplaced_order_has_no_plan() {
        assert!(matches!(
            SagaPlan::for_order(&Order::default()),
            Err(SagaError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_invalid_plans_are_rejected() {
        assert!(SagaPlan::new(vec![]).is_err());
        assert!(SagaPlan::new(vec![charge(100)]).is_err());
        assert!(SagaPlan::new(vec![charge(100), reserve("A", 1)]).is_err());
        assert!(SagaPlan::new(vec![reserve("A", 1), reserve("A", 2)]).is_err());
        assert!(SagaPlan::new(vec![reserve("A", 0)]).is_err());
        assert!(SagaPlan::new(vec![reserve("A", 1), charge(0)]).is_err());
        assert!(SagaPlan::new(vec![reserve("A", 1), reserve("B", 1), charge(10)]).is_ok());
    }

    #[test]
    fn test_step_serialization_is_tagged() {
        let json = serde_json::to_value(reserve("A", 3)).unwrap();
        assert_eq!(json["kind"], "reserve_stock");
        assert_eq!(json["product_id"], "A");
        assert_eq!(json["quantity"], 3);
    }
}
