use common::{AggregateId, ProductId};
use thiserror::Error;

use crate::ReservationStatus;

/// Errors raised by the reservation ledger.
///
/// Version conflicts and insufficient stock are outcomes, not errors; see
/// [`crate::ReserveOutcome`].
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No stock record exists for the product.
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// A reservation quantity must be positive.
    #[error("Invalid quantity for {product_id}: {quantity}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// The order already holds (or consumed) stock of this product.
    #[error("Order {order_id} already has a {status} reservation of {product_id}")]
    DuplicateReservation {
        product_id: ProductId,
        order_id: AggregateId,
        status: ReservationStatus,
    },

    /// The order holds no reservation of this product that could be changed.
    #[error("Order {order_id} holds no reservation of {product_id}")]
    ReservationNotHeld {
        product_id: ProductId,
        order_id: AggregateId,
    },

    /// A release named a different quantity than was reserved.
    #[error("Release of {requested} {product_id} does not match reserved {reserved}")]
    QuantityMismatch {
        product_id: ProductId,
        reserved: u32,
        requested: u32,
    },

    /// Restocking would overflow the available quantity.
    #[error("Stock overflow for {0}")]
    Overflow(ProductId),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
