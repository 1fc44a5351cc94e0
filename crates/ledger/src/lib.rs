//! Reservation ledger.
//!
//! Holds one versioned [`StockRecord`] per product. Every mutation is a
//! conditional write: it succeeds only if the caller's expected version still
//! matches, so racing reservations are rejected instead of overselling.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod model;

pub use error::{LedgerError, Result};
pub use ledger::{ReleaseOutcome, ReservationLedger, ReserveOutcome};
pub use memory::InMemoryReservationLedger;
pub use model::{Reservation, ReservationStatus, StockRecord};
