//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for the storage layer. The transfer logic
//! depends only on these traits, not on concrete implementations.

mod queries;
mod stats;
mod transactor;

pub use queries::Queries;
pub use stats::{LedgerStats, LedgerTotals};
pub use transactor::{Transactor, TxQueries};
