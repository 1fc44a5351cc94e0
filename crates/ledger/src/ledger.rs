use async_trait::async_trait;
use common::{AggregateId, ProductId};

use crate::{Reservation, Result, StockRecord};

/// Outcome of a conditional reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock was decremented; the record is now at `new_version`.
    Reserved {
        new_version: u64,
        reservation: Reservation,
    },

    /// Not enough stock. A business failure, never retried.
    InsufficientStock { available: u32, requested: u32 },

    /// The caller read a stale version and must re-read before retrying.
    VersionConflict { expected: u64, actual: u64 },
}

/// Outcome of a conditional release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Stock was restored; the record is now at `new_version`.
    Released { new_version: u64 },

    /// The caller read a stale version and must re-read before retrying.
    VersionConflict { expected: u64, actual: u64 },
}

/// Versioned stock with compare-and-swap mutations.
///
/// Nothing here blocks a racing writer: a mutation whose expected version is
/// stale is rejected with a `VersionConflict` outcome.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Returns the current stock record of a product.
    async fn stock(&self, product_id: &ProductId) -> Result<StockRecord>;

    /// Returns the reservation an order holds for a product, in any status.
    async fn reservation(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
    ) -> Result<Option<Reservation>>;

    /// Decrements stock by `quantity` for `order_id` if the record is at
    /// `expected_version` and enough stock is available.
    async fn reserve(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
        quantity: u32,
        expected_version: u64,
    ) -> Result<ReserveOutcome>;

    /// Gives back the `quantity` held by `order_id` if the record is at
    /// `expected_version`.
    async fn release(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
        quantity: u32,
        expected_version: u64,
    ) -> Result<ReleaseOutcome>;

    /// Marks a held reservation consumed. Stock is not touched.
    async fn consume(&self, product_id: &ProductId, order_id: AggregateId) -> Result<Reservation>;

    /// Adds stock, creating the record if needed.
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<StockRecord>;

    /// Reads the current version and attempts one reservation against it.
    ///
    /// A `VersionConflict` is handed back to the caller as a transient outcome.
    async fn try_reserve(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
        quantity: u32,
    ) -> Result<ReserveOutcome> {
        let record = self.stock(product_id).await?;
        self.reserve(product_id, order_id, quantity, record.version)
            .await
    }

    /// Releases whatever `order_id` holds of a product, retrying version
    /// conflicts with fresh reads until the release lands.
    ///
    /// Returns `None` if nothing was held.
    async fn release_held(
        &self,
        product_id: &ProductId,
        order_id: AggregateId,
    ) -> Result<Option<u64>> {
        loop {
            let Some(reservation) = self.reservation(product_id, order_id).await? else {
                return Ok(None);
            };
            if !reservation.is_held() {
                return Ok(None);
            }

            let record = self.stock(product_id).await?;
            match self
                .release(product_id, order_id, reservation.quantity, record.version)
                .await?
            {
                ReleaseOutcome::Released { new_version } => return Ok(Some(new_version)),
                ReleaseOutcome::VersionConflict { expected, actual } => {
                    tracing::debug!(%product_id, expected, actual, "release raced, re-reading");
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}
