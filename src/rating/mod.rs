//! Rating Module
//!
//! Rating deltas, progression and the durable per-participant ledger.
//!
//! ## Module Structure
//!
//! - `calc`: Pure delta and XP math
//! - `store`: Records and the settlement entry point
//! - `ledger`: Storage backends

pub mod calc;
pub mod store;
pub mod ledger;

pub use calc::{RatingConfig, ResultDeltas};
pub use store::{LevelProgress, RatingChange, RatingRecord, RatingStore, Settlement};
pub use ledger::{JsonFileLedger, LedgerBackend, MemoryLedger, RatingError};
