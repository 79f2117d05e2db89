//! Account service - account creation and ledger reads

use std::sync::Arc;

use tracing::info;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, ListAccountsParams,
    ListEntriesParams, ListTransfersParams, Transfer, TransferId,
};
use crate::ports::Queries;

pub struct AccountService<S> {
    store: Arc<S>,
}

impl<S: Queries> AccountService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create an account. The owner is trimmed and the currency uppercased.
    pub async fn create_account(&self, params: &CreateAccountParams) -> Result<Account> {
        params.validate().map_err(Error::validation)?;

        let normalized = CreateAccountParams {
            owner: params.owner.trim().to_string(),
            balance: params.balance,
            currency: Account::normalize_currency(&params.currency),
        };
        let account = self.store.create_account(&normalized).await?;
        info!(account_id = account.id, currency = %account.currency, "account created");
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.store.get_account(id).await
    }

    pub async fn list_accounts(&self, params: &ListAccountsParams) -> Result<Vec<Account>> {
        self.store.list_accounts(params).await
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.store.get_entry(id).await
    }

    /// Entries of one account; `NotFound` if the account does not exist
    pub async fn list_entries(&self, params: &ListEntriesParams) -> Result<Vec<Entry>> {
        self.store.get_account(params.account_id).await?;
        self.store.list_entries(params).await
    }

    pub async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.store.get_transfer(id).await
    }

    pub async fn list_transfers(&self, params: &ListTransfersParams) -> Result<Vec<Transfer>> {
        for account_id in [params.from_account_id, params.to_account_id]
            .into_iter()
            .flatten()
        {
            self.store.get_account(account_id).await?;
        }
        self.store.list_transfers(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;

    fn service() -> AccountService<MemoryStore> {
        AccountService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_normalizes() {
        let service = service();
        let account = service
            .create_account(&CreateAccountParams::new("  alice ", 100, " usd"))
            .await
            .unwrap();
        assert_eq!(account.owner, "alice");
        assert_eq!(account.currency, "USD");
        assert_eq!(service.get_account(account.id).await.unwrap(), account);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid() {
        let service = service();
        for params in [
            CreateAccountParams::new("", 0, "USD"),
            CreateAccountParams::new("bob", 0, " "),
            CreateAccountParams::new("bob", -1, "USD"),
        ] {
            let err = service.create_account(&params).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{params:?}");
        }
        assert!(service
            .list_accounts(&ListAccountsParams::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_listing_unknown_account_is_not_found() {
        let service = service();
        let err = service
            .list_entries(&ListEntriesParams::for_account(42))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = service
            .list_transfers(&ListTransfersParams::involving(42))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
