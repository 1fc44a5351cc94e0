use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, ProductId};
use tokio::sync::RwLock;

use crate::{
    LedgerError, ReleaseOutcome, Reservation, ReservationLedger, ReservationStatus,
    ReserveOutcome, Result, StockRecord,
};

#[derive(Debug, Default)]
struct LedgerState {
    stock: HashMap<ProductId, StockRecord>,
    reservations: HashMap<(ProductId, AggregateId), Reservation>,
}

impl LedgerState {
    fn record_mut(&mut self, product_id: &ProductId) -> Result<&mut StockRecord> {
        self.stock
            .get_mut(product_id)
            .ok_or_else(|| LedgerError::UnknownProduct(product_id.clone()))
    }
}

/// In-memory reservation ledger.
///
/// Stock records and reservations share one write lock, so the version check,
/// the quantity change and the reservation bookkeeping land together.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger seeded with the given stock levels at version 0.
    pub fn with_stock<I, P>(stock: I) -> Self
    where
        I: IntoIterator<Item = (P, u32)>,
        P: Into<ProductId>,
    {
        let stock = stock
            .into_iter()
            .map(|(product_id, available)| {
                let record = StockRecord::new(product_id, available);
                (record.product_id.clone(), record)
            })
            .collect();
        Self {
            state: Arc::new(RwLock::new(LedgerState {
                stock,
                reservations: HashMap::new(),
            })),
        }
    }

    /// Returns every reservation of an order.
    pub async fn reservations_for_order(&self, order_id: AggregateId) -> Vec<Reservation> {
        let state = self.state.read().await;
        let mut reservations: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        reservations
    }

    /// Returns the number of reservations currently held.
    pub async fn held_count(&self) -> usize {
        self.state
            .read()
            .await
            .reservations
            .values()
            .filter(|r| r.is_held())
            .count()
    }
}

#[async_trait]
impl ReservationLedger for InMemoryReservationLedger {
    async fn stock(&self, product_id: &ProductId) -> Result<StockRecord> {
        self.state
            .read()
            .await
            .stock
            .get(product_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownProduct(product_id.clone()))
    }

    async fn reservation(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
    ) -> Result<Option<Reservation>> {
        Ok(self
            .state
            .read()
            .await
            .reservations
            .get(&(product_id.clone(), order_id))
            .cloned())
    }

    async fn reserve(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
        quantity: u32,
        expected_version: u64,
    ) -> Result<ReserveOutcome> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                product_id: product_id.clone(),
                quantity,
            });
        }

        let mut state = self.state.write().await;
        let key = (product_id.clone(), order_id);
        if let Some(existing) = state.reservations.get(&key)
            && existing.status != ReservationStatus::Released
        {
            return Err(LedgerError::DuplicateReservation {
                product_id: product_id.clone(),
                order_id,
                status: existing.status,
            });
        }

        let record = state.record_mut(product_id)?;
        if record.version != expected_version {
            metrics::counter!("ledger_version_conflicts_total", "op" => "reserve").increment(1);
            return Ok(ReserveOutcome::VersionConflict {
                expected: expected_version,
                actual: record.version,
            });
        }
        if !record.can_reserve(quantity) {
            metrics::counter!("ledger_insufficient_stock_total").increment(1);
            return Ok(ReserveOutcome::InsufficientStock {
                available: record.available,
                requested: quantity,
            });
        }

        record.available -= quantity;
        record.version += 1;
        let new_version = record.version;

        let now = Utc::now();
        let reservation = Reservation {
            reservation_id: Reservation::id_for(product_id, order_id),
            product_id: product_id.clone(),
            order_id,
            quantity,
            status: ReservationStatus::Held,
            created_at: now,
            updated_at: now,
        };
        state.reservations.insert(key, reservation.clone());

        tracing::debug!(%product_id, %order_id, quantity, new_version, "stock reserved");
        Ok(ReserveOutcome::Reserved {
            new_version,
            reservation,
        })
    }

    async fn release(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
        quantity: u32,
        expected_version: u64,
    ) -> Result<ReleaseOutcome> {
        let mut state = self.state.write().await;
        let key = (product_id.clone(), order_id);

        let reserved = match state.reservations.get(&key) {
            Some(r) if r.is_held() => r.quantity,
            _ => {
                return Err(LedgerError::ReservationNotHeld {
                    product_id: product_id.clone(),
                    order_id,
                });
            }
        };
        if reserved != quantity {
            return Err(LedgerError::QuantityMismatch {
                product_id: product_id.clone(),
                reserved,
                requested: quantity,
            });
        }

        let record = state.record_mut(product_id)?;
        if record.version != expected_version {
            metrics::counter!("ledger_version_conflicts_total", "op" => "release").increment(1);
            return Ok(ReleaseOutcome::VersionConflict {
                expected: expected_version,
                actual: record.version,
            });
        }
        record.available = record
            .available
            .checked_add(quantity)
            .ok_or_else(|| LedgerError::Overflow(product_id.clone()))?;
        record.version += 1;
        let new_version = record.version;

        if let Some(reservation) = state.reservations.get_mut(&key) {
            reservation.status = ReservationStatus::Released;
            reservation.updated_at = Utc::now();
        }

        tracing::debug!(%product_id, %order_id, quantity, new_version, "stock released");
        Ok(ReleaseOutcome::Released { new_version })
    }

    async fn consume(&self, product_id: &ProductId, order_id: AggregateId) -> Result<Reservation> {
        let mut state = self.state.write().await;
        match state.reservations.get_mut(&(product_id.clone(), order_id)) {
            Some(reservation) if reservation.status != ReservationStatus::Released => {
                reservation.status = ReservationStatus::Consumed;
                reservation.updated_at = Utc::now();
                Ok(reservation.clone())
            }
            _ => Err(LedgerError::ReservationNotHeld {
                product_id: product_id.clone(),
                order_id,
            }),
        }
    }

    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<StockRecord> {
        let mut state = self.state.write().await;
        let record = state
            .stock
            .entry(product_id.clone())
            .or_insert_with(|| StockRecord::new(product_id.clone(), 0));
        record.available = record
            .available
            .checked_add(quantity)
            .ok_or_else(|| LedgerError::Overflow(product_id.clone()))?;
        record.version += 1;
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sku() -> ProductId {
        ProductId::new("SKU-001")
    }

    #[tokio::test]
    async fn reserve_decrements_and_bumps_version() {
        let ledger = InMemoryReservationLedger::with_stock([("SKU-001", 5)]);
        let order_id = AggregateId::new();

        let outcome = ledger.reserve(&sku(), order_id, 3, 0).await.unwrap();
        assert!(matches!(
            outcome,
            ReserveOutcome::Reserved { new_version: 1, .. }
        ));

        let record = ledger.stock(&sku()).await.unwrap();
        assert_eq!(record.available, 2);
        assert_eq!(record.version, 1);
        assert_eq!(ledger.held_count().await, 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_mutation() {
        let ledger = InMemoryReservationLedger::with_stock([("SKU-001", 5)]);
        ledger.restock(&sku(), 0).await.unwrap();

        let outcome = ledger
            .reserve(&sku(), AggregateId::new(), 1, 0)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReserveOutcome::VersionConflict {
                expected: 0,
                actual: 1
            }
        );
        assert_eq!(ledger.stock(&sku()).await.unwrap().available, 5);
        assert_eq!(ledger.held_count().await, 0);
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_record_untouched() {
        let ledger = InMemoryReservationLedger::with_stock([("SKU-001", 2)]);

        let outcome = ledger
            .reserve(&sku(), AggregateId::new(), 3, 0)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReserveOutcome::InsufficientStock {
                available: 2,
                requested: 3
            }
        );
        assert_eq!(ledger.stock(&sku()).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn release_restores_stock() {
        let ledger = InMemoryReservationLedger::with_stock([("SKU-001", 5)]);
        let order_id = AggregateId::new();
        ledger.reserve(&sku(), order_id, 3, 0).await.unwrap();

        let outcome = ledger.release(&sku(), order_id, 3, 1).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Released { new_version: 2 });

        let record = ledger.stock(&sku()).await.unwrap();
        assert_eq!(record.available, 5);
        let reservation = ledger.reservation(&sku(), order_id).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Released);
    }

    #[tokio::test]
    async fn release_requires_a_held_reservation() {
        let ledger = InMemoryReservationLedger::with_stock([("SKU-001", 5)]);
        let order_id = AggregateId::new();

        assert!(matches!(
            ledger.release(&sku(), order_id, 1, 0).await,
            Err(LedgerError::ReservationNotHeld { .. })
        ));

        ledger.reserve(&sku(), order_id, 2, 0).await.unwrap();
        assert!(matches!(
            ledger.release(&sku(), order_id, 1, 1).await,
            Err(LedgerError::QuantityMismatch {
                reserved: 2,
                requested: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn one_reservation_per_product_and_order() {
        let ledger = InMemoryReservationLedger::with_stock([("SKU-001", 5)]);
        let order_id = AggregateId::new();
        ledger.reserve(&sku(), order_id, 1, 0).await.unwrap();

        assert!(matches!(
            ledger.reserve(&sku(), order_id, 1, 1).await,
            Err(LedgerError::DuplicateReservation {
                status: ReservationStatus::Held,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn release_held_is_a_no_op_without_a_hold() {
        let ledger = InMemoryReservationLedger::with_stock([("SKU-001", 5)]);
        let order_id = AggregateId::new();
        assert_eq!(ledger.release_held(&sku(), order_id).await.unwrap(), None);

        ledger.try_reserve(&sku(), order_id, 4).await.unwrap();
        assert_eq!(
            ledger.release_held(&sku(), order_id).await.unwrap(),
            Some(2)
        );
        assert_eq!(ledger.release_held(&sku(), order_id).await.unwrap(), None);
        assert_eq!(ledger.stock(&sku()).await.unwrap().available, 5);
    }

    #[tokio::test]
    async fn consume_keeps_stock_out() {
        let ledger = InMemoryReservationLedger::with_stock([("SKU-001", 5)]);
        let order_id = AggregateId::new();
        ledger.try_reserve(&sku(), order_id, 2).await.unwrap();

        let reservation = ledger.consume(&sku(), order_id).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Consumed);
        assert_eq!(ledger.release_held(&sku(), order_id).await.unwrap(), None);
        assert_eq!(ledger.stock(&sku()).await.unwrap().available, 3);
    }

    #[tokio::test]
    async fn unknown_products_are_errors() {
        let ledger = InMemoryReservationLedger::new();
        assert!(matches!(
            ledger.try_reserve(&sku(), AggregateId::new(), 1).await,
            Err(LedgerError::UnknownProduct(_))
        ));
    }
}
