use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId};
use serde::{Deserialize, Serialize};

/// Stock of one product.
///
/// `available` never goes negative and `version` increments on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,
    pub available: u32,
    pub version: u64,
}

impl StockRecord {
    pub fn new(product_id: impl Into<ProductId>, available: u32) -> Self {
        Self {
            product_id: product_id.into(),
            available,
            version: 0,
        }
    }

    pub fn can_reserve(&self, quantity: u32) -> bool {
        self.available >= quantity
    }
}

/// Lifecycle of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Stock is set aside for the order.
    Held,
    /// Stock went back to the shelf.
    Released,
    /// The order was confirmed; the stock left for good.
    Consumed,
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Held => "held",
            ReservationStatus::Released => "released",
            ReservationStatus::Consumed => "consumed",
        };
        f.write_str(s)
    }
}

/// Stock set aside for one order. At most one per (product, order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub product_id: ProductId,
    pub order_id: AggregateId,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Reservation IDs are derived from the (product, order) pair.
    pub fn id_for(product_id: &ProductId, order_id: AggregateId) -> String {
        format!("RES-{product_id}-{order_id}")
    }

    pub fn is_held(&self) -> bool {
        self.status == ReservationStatus::Held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_ids_are_stable_per_pair() {
        let order_id = AggregateId::new();
        let sku = ProductId::new("SKU-1");
        assert_eq!(
            Reservation::id_for(&sku, order_id),
            Reservation::id_for(&sku, order_id)
        );
        assert_ne!(
            Reservation::id_for(&sku, order_id),
            Reservation::id_for(&ProductId::new("SKU-2"), order_id)
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Consumed).unwrap(),
            "\"consumed\""
        );
        assert_eq!(ReservationStatus::Held.to_string(), "held");
    }
}
