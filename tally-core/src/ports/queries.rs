//! Queries port - single-statement storage operations

use async_trait::async_trait;

use crate::domain::result::Result;
use crate::domain::{
    Account, AccountId, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, EntryId, ListAccountsParams, ListEntriesParams,
    ListTransfersParams, Transfer, TransferId,
};

/// Storage accessor abstraction
///
/// Every method is one atomic statement. An implementation is bound either
/// to the unscoped store (each call auto-commits) or to an open transaction
/// (see [`TxQueries`](super::TxQueries)), in which case all calls share that
/// transaction.
#[async_trait]
pub trait Queries: Send + Sync {
    // === Accounts ===

    /// Insert an account with an opening balance
    async fn create_account(&self, params: &CreateAccountParams) -> Result<Account>;

    /// Get account by ID, `NotFound` if absent
    async fn get_account(&self, id: AccountId) -> Result<Account>;

    /// List accounts ordered by ID
    async fn list_accounts(&self, params: &ListAccountsParams) -> Result<Vec<Account>>;

    /// Add a signed delta to an account's balance and return the updated row.
    ///
    /// Read, increment and write happen in one statement. Inside a
    /// transaction this takes the account's row lock until commit/rollback.
    /// `NotFound` if the account does not exist.
    async fn add_account_balance(&self, params: &AddAccountBalanceParams) -> Result<Account>;

    // === Entries ===

    async fn create_entry(&self, params: &CreateEntryParams) -> Result<Entry>;

    async fn get_entry(&self, id: EntryId) -> Result<Entry>;

    /// Entries of one account ordered by ID
    async fn list_entries(&self, params: &ListEntriesParams) -> Result<Vec<Entry>>;

    // === Transfers ===

    async fn create_transfer(&self, params: &CreateTransferParams) -> Result<Transfer>;

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer>;

    /// Transfers ordered by ID, optionally filtered by account
    async fn list_transfers(&self, params: &ListTransfersParams) -> Result<Vec<Transfer>>;
}
