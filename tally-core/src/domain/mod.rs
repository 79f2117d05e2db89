//! Core domain entities
//!
//! All ledger entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
mod entry;
pub mod result;
mod transfer;

pub use account::{
    Account, AccountId, AddAccountBalanceParams, CreateAccountParams, ListAccountsParams,
};
pub use entry::{CreateEntryParams, Entry, EntryId, ListEntriesParams};
pub use transfer::{
    CreateTransferParams, ListTransfersParams, Transfer, TransferId, TransferRequest,
    TransferResult,
};
