//! In-memory store with pessimistic row locks
//!
//! Behaves like a row-locking SQL engine at read-committed isolation:
//!
//! - `add_account_balance` inside a transaction takes the account's row lock
//!   and keeps it until commit or rollback; the same transaction may take it
//!   again without blocking.
//! - Writes are buffered per transaction and become visible on commit.
//! - Entries and transfers must reference existing accounts.
//!
//! Used by tests and the `stress` command, and as a reference for how a
//! store must behave for the transfer protocol to be deadlock free.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountId, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, EntryId, ListAccountsParams, ListEntriesParams,
    ListTransfersParams, Transfer, TransferId,
};
use crate::ports::{LedgerStats, LedgerTotals, Queries, Transactor, TxQueries};

/// Behaviour switches for [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
    /// Reject deltas that would take a balance below zero, like a
    /// `CHECK (balance >= 0)` constraint
    pub non_negative_balances: bool,
    /// Give up waiting for a row lock after this long. The failure is a
    /// retryable conflict. `None` waits forever.
    pub lock_timeout: Option<Duration>,
}

/// Storage operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateAccount,
    CreateTransfer,
    CreateEntry,
    AddAccountBalance,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    operation: Operation,
    /// 1-based call number within one transaction
    nth: usize,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<RowLock<()>>>>,
    faults: Mutex<Vec<Fault>>,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    options: MemoryOptions,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
}

fn page<T: Clone>(rows: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    rows.skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

impl Shared {
    fn row_lock(&self, id: AccountId) -> Result<Arc<RowLock<()>>> {
        let mut locks = lock(&self.row_locks)?;
        Ok(Arc::clone(locks.entry(id).or_default()))
    }

    fn check_fault(&self, operation: Operation, nth: usize) -> Result<()> {
        let faults = lock(&self.faults)?;
        if faults
            .iter()
            .any(|f| f.operation == operation && f.nth == nth)
        {
            return Err(Error::database(format!(
                "injected failure on {:?} call #{}",
                operation, nth
            )));
        }
        Ok(())
    }
}

/// In-memory ledger store
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_options(MemoryOptions::default())
    }

    pub fn with_options(options: MemoryOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(Vec::new()),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                options,
            }),
        }
    }

    /// Make the `nth` call of `operation` fail in every following transaction
    pub fn fail_at(&self, operation: Operation, nth: usize) {
        if let Ok(mut faults) = lock(&self.shared.faults) {
            faults.push(Fault { operation, nth });
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = lock(&self.shared.faults) {
            faults.clear();
        }
    }
}

#[async_trait]
impl Transactor for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            state: Mutex::new(TxState::default()),
        })
    }
}

/// Unscoped access: reads see committed data, each write runs in its own
/// transaction.
#[async_trait]
impl Queries for MemoryStore {
    async fn create_account(&self, params: &CreateAccountParams) -> Result<Account> {
        let tx = self.begin().await?;
        let account = tx.create_account(params).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        lock(&self.shared.tables)?
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("account {}", id)))
    }

    async fn list_accounts(&self, params: &ListAccountsParams) -> Result<Vec<Account>> {
        let tables = lock(&self.shared.tables)?;
        Ok(page(
            tables.accounts.values().cloned(),
            params.limit,
            params.offset,
        ))
    }

    async fn add_account_balance(&self, params: &AddAccountBalanceParams) -> Result<Account> {
        let tx = self.begin().await?;
        let account = tx.add_account_balance(params).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn create_entry(&self, params: &CreateEntryParams) -> Result<Entry> {
        let tx = self.begin().await?;
        let entry = tx.create_entry(params).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        lock(&self.shared.tables)?
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("entry {}", id)))
    }

    async fn list_entries(&self, params: &ListEntriesParams) -> Result<Vec<Entry>> {
        let tables = lock(&self.shared.tables)?;
        let rows = tables
            .entries
            .values()
            .filter(|e| e.account_id == params.account_id)
            .cloned();
        Ok(page(rows, params.limit, params.offset))
    }

    async fn create_transfer(&self, params: &CreateTransferParams) -> Result<Transfer> {
        let tx = self.begin().await?;
        let transfer = tx.create_transfer(params).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        lock(&self.shared.tables)?
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("transfer {}", id)))
    }

    async fn list_transfers(&self, params: &ListTransfersParams) -> Result<Vec<Transfer>> {
        let tables = lock(&self.shared.tables)?;
        let rows = tables
            .transfers
            .values()
            .filter(|t| params.matches(t))
            .cloned();
        Ok(page(rows, params.limit, params.offset))
    }
}

#[async_trait]
impl LedgerStats for MemoryStore {
    async fn ledger_totals(&self) -> Result<LedgerTotals> {
        let tables = lock(&self.shared.tables)?;
        Ok(LedgerTotals {
            account_count: tables.accounts.len() as i64,
            balance_sum: tables.accounts.values().map(|a| a.balance as i128).sum(),
            transfer_count: tables.transfers.len() as i64,
            transfer_amount_sum: tables.transfers.values().map(|t| t.amount as i128).sum(),
            entry_count: tables.entries.len() as i64,
            entry_amount_sum: tables.entries.values().map(|e| e.amount as i128).sum(),
            credit_amount_sum: tables
                .entries
                .values()
                .filter(|e| e.amount > 0)
                .map(|e| e.amount as i128)
                .sum(),
        })
    }
}

#[derive(Default)]
struct TxState {
    /// Row locks taken by this transaction, released when it ends
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    /// Accounts created or updated by this transaction
    accounts: BTreeMap<AccountId, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    calls: HashMap<Operation, usize>,
}

/// A transaction on a [`MemoryStore`]. Dropping it discards its writes.
pub struct MemoryTx {
    shared: Arc<Shared>,
    state: Mutex<TxState>,
}

impl MemoryTx {
    fn state(&self) -> Result<MutexGuard<'_, TxState>> {
        lock(&self.state)
    }

    fn record_call(&self, operation: Operation) -> Result<()> {
        let nth = {
            let mut state = self.state()?;
            let calls = state.calls.entry(operation).or_insert(0);
            *calls += 1;
            *calls
        };
        self.shared.check_fault(operation, nth)
    }

    /// Own writes first, then committed data
    fn visible_account(&self, id: AccountId) -> Result<Option<Account>> {
        if let Some(account) = self.state()?.accounts.get(&id) {
            return Ok(Some(account.clone()));
        }
        Ok(lock(&self.shared.tables)?.accounts.get(&id).cloned())
    }

    fn require_account(&self, id: AccountId) -> Result<()> {
        match self.visible_account(id)? {
            Some(_) => Ok(()),
            None => Err(Error::Constraint(format!(
                "foreign key violation: account {} does not exist",
                id
            ))),
        }
    }

    async fn acquire_row_lock(&self, id: AccountId) -> Result<()> {
        let already_held = self.state()?.held.contains_key(&id);
        if already_held {
            return Ok(());
        }

        let row = self.shared.row_lock(id)?;
        trace!(account_id = id, "waiting for row lock");
        let guard = match self.shared.options.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, row.lock_owned())
                .await
                .map_err(|_| Error::conflict(format!("lock wait timeout on account {}", id)))?,
            None => row.lock_owned().await,
        };
        self.state()?.held.insert(id, guard);
        Ok(())
    }
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_account(&self, params: &CreateAccountParams) -> Result<Account> {
        self.record_call(Operation::CreateAccount)?;
        let account = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: params.owner.clone(),
            balance: params.balance,
            currency: params.currency.clone(),
            created_at: Utc::now(),
        };
        self.state()?.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.visible_account(id)?
            .ok_or_else(|| Error::not_found(format!("account {}", id)))
    }

    async fn list_accounts(&self, params: &ListAccountsParams) -> Result<Vec<Account>> {
        let mut accounts = lock(&self.shared.tables)?.accounts.clone();
        accounts.extend(
            self.state()?
                .accounts
                .iter()
                .map(|(id, a)| (*id, a.clone())),
        );
        Ok(page(accounts.into_values(), params.limit, params.offset))
    }

    async fn add_account_balance(&self, params: &AddAccountBalanceParams) -> Result<Account> {
        self.record_call(Operation::AddAccountBalance)?;
        if self.visible_account(params.id)?.is_none() {
            return Err(Error::not_found(format!("account {}", params.id)));
        }

        self.acquire_row_lock(params.id).await?;

        // Re-read under the lock: the previous holder may have committed
        let mut account = self
            .visible_account(params.id)?
            .ok_or_else(|| Error::not_found(format!("account {}", params.id)))?;
        let balance = account.balance.checked_add(params.amount).ok_or_else(|| {
            Error::Constraint(format!("balance overflow on account {}", params.id))
        })?;
        if self.shared.options.non_negative_balances && balance < 0 {
            return Err(Error::Constraint(format!(
                "balance check violated: account {} would become {}",
                params.id, balance
            )));
        }

        account.balance = balance;
        self.state()?.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn create_entry(&self, params: &CreateEntryParams) -> Result<Entry> {
        self.record_call(Operation::CreateEntry)?;
        self.require_account(params.account_id)?;
        let entry = Entry {
            id: self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.state()?.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        if let Some(entry) = self.state()?.entries.iter().find(|e| e.id == id) {
            return Ok(entry.clone());
        }
        lock(&self.shared.tables)?
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("entry {}", id)))
    }

    async fn list_entries(&self, params: &ListEntriesParams) -> Result<Vec<Entry>> {
        let mut entries: BTreeMap<EntryId, Entry> = lock(&self.shared.tables)?
            .entries
            .values()
            .filter(|e| e.account_id == params.account_id)
            .map(|e| (e.id, e.clone()))
            .collect();
        entries.extend(
            self.state()?
                .entries
                .iter()
                .filter(|e| e.account_id == params.account_id)
                .map(|e| (e.id, e.clone())),
        );
        Ok(page(entries.into_values(), params.limit, params.offset))
    }

    async fn create_transfer(&self, params: &CreateTransferParams) -> Result<Transfer> {
        self.record_call(Operation::CreateTransfer)?;
        self.require_account(params.from_account_id)?;
        self.require_account(params.to_account_id)?;
        let transfer = Transfer {
            id: self.shared.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.state()?.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        if let Some(transfer) = self.state()?.transfers.iter().find(|t| t.id == id) {
            return Ok(transfer.clone());
        }
        lock(&self.shared.tables)?
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("transfer {}", id)))
    }

    async fn list_transfers(&self, params: &ListTransfersParams) -> Result<Vec<Transfer>> {
        let matches = |t: &Transfer| params.matches(t);
        let mut transfers: BTreeMap<TransferId, Transfer> = lock(&self.shared.tables)?
            .transfers
            .values()
            .filter(|t| matches(t))
            .map(|t| (t.id, t.clone()))
            .collect();
        transfers.extend(
            self.state()?
                .transfers
                .iter()
                .filter(|t| matches(t))
                .map(|t| (t.id, t.clone())),
        );
        Ok(page(transfers.into_values(), params.limit, params.offset))
    }
}

#[async_trait]
impl TxQueries for MemoryTx {
    async fn commit(self) -> Result<()> {
        self.record_call(Operation::Commit)?;

        let TxState {
            held,
            accounts,
            entries,
            transfers,
            ..
        } = self
            .state
            .into_inner()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))?;

        {
            let mut tables = lock(&self.shared.tables)?;
            tables.accounts.extend(accounts);
            tables
                .entries
                .extend(entries.into_iter().map(|e| (e.id, e)));
            tables
                .transfers
                .extend(transfers.into_iter().map(|t| (t.id, t)));
        }

        // Locks go only after the writes are visible
        debug!(locks = held.len(), "memory transaction committed");
        drop(held);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Writes and locks are discarded whether or not the injected fault fires
        let outcome = self.record_call(Operation::Rollback);
        drop(self);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(options: MemoryOptions) -> (MemoryStore, Account, Account) {
        let store = MemoryStore::with_options(options);
        let a = store
            .create_account(&CreateAccountParams::new("a", 100, "USD"))
            .await
            .unwrap();
        let b = store
            .create_account(&CreateAccountParams::new("b", 50, "USD"))
            .await
            .unwrap();
        (store, a, b)
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (store, a, _) = seeded(MemoryOptions::default()).await;
        let tx = store.begin().await.unwrap();
        let updated = tx
            .add_account_balance(&AddAccountBalanceParams { id: a.id, amount: -40 })
            .await
            .unwrap();
        assert_eq!(updated.balance, 60);
        assert_eq!(store.get_account(a.id).await.unwrap().balance, 100);

        tx.commit().await.unwrap();
        assert_eq!(store.get_account(a.id).await.unwrap().balance, 60);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let (store, a, b) = seeded(MemoryOptions::default()).await;
        {
            let tx = store.begin().await.unwrap();
            tx.create_entry(&CreateEntryParams { account_id: a.id, amount: -1 })
                .await
                .unwrap();
            tx.add_account_balance(&AddAccountBalanceParams { id: b.id, amount: 1 })
                .await
                .unwrap();
        }
        assert_eq!(store.get_account(b.id).await.unwrap().balance, 50);
        assert!(store
            .list_entries(&ListEntriesParams::for_account(a.id))
            .await
            .unwrap()
            .is_empty());

        // The row lock was released with the dropped transaction
        let after = store
            .add_account_balance(&AddAccountBalanceParams { id: b.id, amount: 5 })
            .await
            .unwrap();
        assert_eq!(after.balance, 55);
    }

    #[tokio::test]
    async fn test_row_lock_is_reentrant() {
        let (store, a, _) = seeded(MemoryOptions {
            lock_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        })
        .await;
        let tx = store.begin().await.unwrap();
        tx.add_account_balance(&AddAccountBalanceParams { id: a.id, amount: -10 })
            .await
            .unwrap();
        let again = tx
            .add_account_balance(&AddAccountBalanceParams { id: a.id, amount: 10 })
            .await
            .unwrap();
        assert_eq!(again.balance, 100);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_wait_times_out_as_conflict() {
        let (store, a, _) = seeded(MemoryOptions {
            lock_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        })
        .await;
        let holder = store.begin().await.unwrap();
        holder
            .add_account_balance(&AddAccountBalanceParams { id: a.id, amount: 1 })
            .await
            .unwrap();

        let waiter = store.begin().await.unwrap();
        let err = waiter
            .add_account_balance(&AddAccountBalanceParams { id: a.id, amount: 1 })
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        holder.rollback().await.unwrap();
        waiter
            .add_account_balance(&AddAccountBalanceParams { id: a.id, amount: 1 })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_negative_check() {
        let (store, a, _) = seeded(MemoryOptions {
            non_negative_balances: true,
            ..Default::default()
        })
        .await;
        let err = store
            .add_account_balance(&AddAccountBalanceParams { id: a.id, amount: -101 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
        assert_eq!(store.get_account(a.id).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_entry_requires_existing_account() {
        let store = MemoryStore::new();
        let err = store
            .create_entry(&CreateEntryParams { account_id: 42, amount: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[tokio::test]
    async fn test_injected_fault_counts_calls_per_transaction() {
        let (store, a, b) = seeded(MemoryOptions::default()).await;
        store.fail_at(Operation::CreateEntry, 2);

        let tx = store.begin().await.unwrap();
        tx.create_entry(&CreateEntryParams { account_id: a.id, amount: -1 })
            .await
            .unwrap();
        assert!(tx
            .create_entry(&CreateEntryParams { account_id: b.id, amount: 1 })
            .await
            .is_err());
        tx.rollback().await.unwrap();

        store.clear_faults();
        let tx = store.begin().await.unwrap();
        tx.create_entry(&CreateEntryParams { account_id: a.id, amount: -1 })
            .await
            .unwrap();
        tx.create_entry(&CreateEntryParams { account_id: b.id, amount: 1 })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let totals = store.ledger_totals().await.unwrap();
        assert_eq!(totals.entry_count, 2);
        assert_eq!(totals.entry_amount_sum, 0);
    }
}
