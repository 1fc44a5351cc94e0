//! Inventory collaborator contract and its ledger-backed implementation.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{AggregateId, ProductId};
use ledger::{ReservationLedger, ReservationStatus, ReserveOutcome};

use crate::error::ServiceError;

/// Result of a successful stock reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationResult {
    pub reservation_id: String,
    pub product_id: ProductId,
    pub quantity: u32,
    /// True if the order already held this reservation.
    pub replayed: bool,
}

/// Result of a stock release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseResult {
    Released { new_version: u64 },
    /// The order held nothing to release.
    NothingHeld,
}

/// Inventory operations used by the saga.
///
/// Implementations must be idempotent per order: reserving twice for the
/// same `(product, order)` returns the existing reservation, and releasing a
/// reservation that is no longer held does nothing.
#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: AggregateId,
    ) -> Result<ReservationResult, ServiceError>;

    async fn release_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: AggregateId,
    ) -> Result<ReleaseResult, ServiceError>;

    /// Turns a held reservation into a permanent stock deduction.
    async fn consume_stock(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
    ) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct Faults {
    failing_reserves: u32,
    fail_releases: bool,
    fail_consumes: bool,
}

/// Inventory adapter over a [`ReservationLedger`].
///
/// Each reserve call makes a single conditional attempt against the version
/// it just read; a lost race surfaces as a transient
/// `ServiceError::VersionConflict` so the step executor re-runs the whole
/// reservation. Releases retry conflicts inside the ledger until they land.
#[derive(Debug, Clone)]
pub struct LedgerInventoryService<L> {
    ledger: L,
    faults: Arc<Mutex<Faults>>,
}

impl<L: ReservationLedger + Clone> LedgerInventoryService<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Makes the next `count` reserve calls fail with `Unavailable`.
    pub fn fail_next_reserves(&self, count: u32) {
        self.faults().failing_reserves = count;
    }

    /// Makes every release fail with `Unavailable` while set.
    pub fn fail_releases(&self, fail: bool) {
        self.faults().fail_releases = fail;
    }

    /// Makes every consume fail with `Unavailable` while set.
    pub fn fail_consumes(&self, fail: bool) {
        self.faults().fail_consumes = fail;
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_reserve_fault(&self) -> bool {
        let mut faults = self.faults();
        if faults.failing_reserves > 0 {
            faults.failing_reserves -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl<L: ReservationLedger + Clone> InventoryService for LedgerInventoryService<L> {
    #[tracing::instrument(skip_all, fields(%product_id, %order_id, quantity))]
    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: AggregateId,
    ) -> Result<ReservationResult, ServiceError> {
        if self.take_reserve_fault() {
            return Err(ServiceError::Unavailable("inventory".to_string()));
        }

        if let Some(existing) = self.ledger.reservation(product_id, order_id).await?
            && existing.status != ReservationStatus::Released
        {
            if existing.quantity != quantity {
                return Err(ServiceError::Internal(format!(
                    "order {order_id} already holds {} of {product_id}",
                    existing.quantity
                )));
            }
            tracing::debug!("reservation already held");
            return Ok(ReservationResult {
                reservation_id: existing.reservation_id,
                product_id: existing.product_id,
                quantity: existing.quantity,
                replayed: true,
            });
        }

        match self
            .ledger
            .try_reserve(product_id, order_id, quantity)
            .await?
        {
            ReserveOutcome::Reserved { reservation, .. } => Ok(ReservationResult {
                reservation_id: reservation.reservation_id,
                product_id: reservation.product_id,
                quantity: reservation.quantity,
                replayed: false,
            }),
            ReserveOutcome::InsufficientStock {
                available,
                requested,
            } => Err(ServiceError::InsufficientStock {
                product_id: product_id.clone(),
                available,
                requested,
            }),
            ReserveOutcome::VersionConflict { expected, actual } => {
                tracing::debug!(expected, actual, "reservation raced");
                Err(ServiceError::VersionConflict(product_id.to_string()))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(%product_id, %order_id, quantity))]
    async fn release_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: AggregateId,
    ) -> Result<ReleaseResult, ServiceError> {
        if self.faults().fail_releases {
            return Err(ServiceError::Unavailable("inventory".to_string()));
        }

        match self.ledger.reservation(product_id, order_id).await? {
            Some(held) if held.is_held() && held.quantity != quantity => {
                Err(ServiceError::Internal(format!(
                    "release of {quantity} {product_id} does not match held {}",
                    held.quantity
                )))
            }
            Some(held) if held.is_held() => {
                match self.ledger.release_held(product_id, order_id).await? {
                    Some(new_version) => Ok(ReleaseResult::Released { new_version }),
                    None => Ok(ReleaseResult::NothingHeld),
                }
            }
            Some(consumed) if consumed.status == ReservationStatus::Consumed => {
                Err(ServiceError::ReservationConsumed {
                    product_id: product_id.clone(),
                    order_id,
                })
            }
            _ => Ok(ReleaseResult::NothingHeld),
        }
    }

    async fn consume_stock(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
    ) -> Result<(), ServiceError> {
        if self.faults().fail_consumes {
            return Err(ServiceError::Unavailable("inventory".to_string()));
        }

        if let Some(existing) = self.ledger.reservation(product_id, order_id).await?
            && existing.status == ReservationStatus::Consumed
        {
            return Ok(());
        }
        self.ledger.consume(product_id, order_id).await?;
        Ok(())
    }
}
