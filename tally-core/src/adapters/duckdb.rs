//! DuckDB store implementation
//!
//! The unscoped [`DuckDbStore`] runs every statement in auto-commit mode on
//! its own connection. [`Transactor::begin`] clones that connection and opens
//! an explicit transaction on the clone, so concurrent transfers never share
//! a transaction context.
//!
//! DuckDB uses optimistic concurrency control: a second transaction updating
//! the same account row fails with a write-write conflict instead of waiting.
//! Those failures map to the retryable [`Error::Conflict`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{params, Connection, OptionalExt};
use tracing::{debug, warn};

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountId, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, EntryId, ListAccountsParams, ListEntriesParams,
    ListTransfersParams, Transfer, TransferId,
};
use crate::ports::{LedgerStats, LedgerTotals, Queries, Transactor, TxQueries};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, CAST(created_at AS VARCHAR)";
const ENTRY_COLUMNS: &str = "id, account_id, amount, CAST(created_at AS VARCHAR)";
const TRANSFER_COLUMNS: &str =
    "id, from_account_id, to_account_id, amount, CAST(created_at AS VARCHAR)";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_open_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Write-write conflicts and aborted transactions
fn is_conflict_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("conflict")
        || lower.contains("could not serialize")
        || lower.contains("current transaction is aborted")
}

fn is_constraint_error(err_msg: &str) -> bool {
    err_msg.to_lowercase().contains("constraint error")
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        let msg = err.to_string();
        if is_conflict_error(&msg) {
            Error::Conflict(msg)
        } else if is_constraint_error(&msg) {
            Error::Constraint(msg)
        } else {
            Error::Database(msg)
        }
    }
}

/// DuckDB-backed ledger store
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Open (or create) a database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when another process holds the database file.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_open_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            "database busy, retrying: {}",
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        Err(last_error.map(Error::from).unwrap_or_else(|| {
            Error::database(format!(
                "Failed to open database after {} retries",
                MAX_RETRIES
            ))
        }))
    }

    /// Open a private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    /// Attempt to open a database connection (called by new() with retry logic)
    fn try_open_connection(db_path: &Path) -> std::result::Result<Connection, duckdb::Error> {
        // Extension autoloading is off: the ledger needs nothing beyond the core engine
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Connection::open_with_flags(db_path, config)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        let result = self.run_migrations()?;
        if !result.applied.is_empty() {
            debug!(applied = ?result.applied, "applied migrations");
        }
        Ok(())
    }
}

#[async_trait]
impl Transactor for DuckDbStore {
    type Tx = DuckDbTx;

    async fn begin(&self) -> Result<DuckDbTx> {
        let conn = self.lock()?.try_clone()?;
        conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(DuckDbTx {
            conn: Mutex::new(conn),
            finished: false,
        })
    }
}

#[async_trait]
impl Queries for DuckDbStore {
    async fn create_account(&self, params: &CreateAccountParams) -> Result<Account> {
        insert_account(&*self.lock()?, params)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        select_account(&*self.lock()?, id)
    }

    async fn list_accounts(&self, params: &ListAccountsParams) -> Result<Vec<Account>> {
        select_accounts(&*self.lock()?, params)
    }

    async fn add_account_balance(&self, params: &AddAccountBalanceParams) -> Result<Account> {
        update_balance(&*self.lock()?, params)
    }

    async fn create_entry(&self, params: &CreateEntryParams) -> Result<Entry> {
        insert_entry(&*self.lock()?, params)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        select_entry(&*self.lock()?, id)
    }

    async fn list_entries(&self, params: &ListEntriesParams) -> Result<Vec<Entry>> {
        select_entries(&*self.lock()?, params)
    }

    async fn create_transfer(&self, params: &CreateTransferParams) -> Result<Transfer> {
        insert_transfer(&*self.lock()?, params)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        select_transfer(&*self.lock()?, id)
    }

    async fn list_transfers(&self, params: &ListTransfersParams) -> Result<Vec<Transfer>> {
        select_transfers(&*self.lock()?, params)
    }
}

#[async_trait]
impl LedgerStats for DuckDbStore {
    async fn ledger_totals(&self) -> Result<LedgerTotals> {
        let conn = self.lock()?;
        let totals = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM accounts),
                (SELECT CAST(COALESCE(SUM(balance), 0) AS HUGEINT) FROM accounts),
                (SELECT COUNT(*) FROM transfers),
                (SELECT CAST(COALESCE(SUM(amount), 0) AS HUGEINT) FROM transfers),
                (SELECT COUNT(*) FROM entries),
                (SELECT CAST(COALESCE(SUM(amount), 0) AS HUGEINT) FROM entries),
                (SELECT CAST(COALESCE(SUM(amount), 0) AS HUGEINT) FROM entries WHERE amount > 0)",
            [],
            |row| {
                Ok(LedgerTotals {
                    account_count: row.get(0)?,
                    balance_sum: row.get(1)?,
                    transfer_count: row.get(2)?,
                    transfer_amount_sum: row.get(3)?,
                    entry_count: row.get(4)?,
                    entry_amount_sum: row.get(5)?,
                    credit_amount_sum: row.get(6)?,
                })
            },
        )?;
        Ok(totals)
    }
}

/// A transaction on its own DuckDB connection
///
/// Dropped without `commit`/`rollback`, the transaction is rolled back.
pub struct DuckDbTx {
    conn: Mutex<Connection>,
    finished: bool,
}

impl DuckDbTx {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }
}

impl Drop for DuckDbTx {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(conn) = self.conn.lock() {
            // Fails harmlessly when DuckDB already aborted the transaction
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                debug!("implicit rollback: {}", e);
            }
        }
    }
}

#[async_trait]
impl Queries for DuckDbTx {
    async fn create_account(&self, params: &CreateAccountParams) -> Result<Account> {
        insert_account(&*self.lock()?, params)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        select_account(&*self.lock()?, id)
    }

    async fn list_accounts(&self, params: &ListAccountsParams) -> Result<Vec<Account>> {
        select_accounts(&*self.lock()?, params)
    }

    async fn add_account_balance(&self, params: &AddAccountBalanceParams) -> Result<Account> {
        update_balance(&*self.lock()?, params)
    }

    async fn create_entry(&self, params: &CreateEntryParams) -> Result<Entry> {
        insert_entry(&*self.lock()?, params)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        select_entry(&*self.lock()?, id)
    }

    async fn list_entries(&self, params: &ListEntriesParams) -> Result<Vec<Entry>> {
        select_entries(&*self.lock()?, params)
    }

    async fn create_transfer(&self, params: &CreateTransferParams) -> Result<Transfer> {
        insert_transfer(&*self.lock()?, params)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        select_transfer(&*self.lock()?, id)
    }

    async fn list_transfers(&self, params: &ListTransfersParams) -> Result<Vec<Transfer>> {
        select_transfers(&*self.lock()?, params)
    }
}

#[async_trait]
impl TxQueries for DuckDbTx {
    async fn commit(self) -> Result<()> {
        let mut tx = self;
        let outcome = tx.lock()?.execute_batch("COMMIT");
        // On failure the transaction stays unfinished and Drop rolls it back
        outcome?;
        tx.finished = true;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        let mut tx = self;
        let outcome = tx.lock()?.execute_batch("ROLLBACK");
        tx.finished = true;
        outcome.map_err(Error::from)
    }
}

// === Statements shared by the unscoped store and transactions ===

fn now_param() -> String {
    Utc::now()
        .naive_utc()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_account(row: &duckdb::Row) -> duckdb::Result<Account> {
    let created_str: String = row.get(4)?;
    Ok(Account {
        id: row.get(0)?,
        owner: row.get(1)?,
        balance: row.get(2)?,
        currency: row.get(3)?,
        created_at: parse_timestamp(&created_str),
    })
}

fn row_to_entry(row: &duckdb::Row) -> duckdb::Result<Entry> {
    let created_str: String = row.get(3)?;
    Ok(Entry {
        id: row.get(0)?,
        account_id: row.get(1)?,
        amount: row.get(2)?,
        created_at: parse_timestamp(&created_str),
    })
}

fn row_to_transfer(row: &duckdb::Row) -> duckdb::Result<Transfer> {
    let created_str: String = row.get(4)?;
    Ok(Transfer {
        id: row.get(0)?,
        from_account_id: row.get(1)?,
        to_account_id: row.get(2)?,
        amount: row.get(3)?,
        created_at: parse_timestamp(&created_str),
    })
}

fn insert_account(conn: &Connection, params: &CreateAccountParams) -> Result<Account> {
    let account = conn.query_row(
        &format!(
            "INSERT INTO accounts (owner, balance, currency, created_at)
             VALUES (?, ?, ?, CAST(? AS TIMESTAMP))
             RETURNING {}",
            ACCOUNT_COLUMNS
        ),
        params![params.owner, params.balance, params.currency, now_param()],
        row_to_account,
    )?;
    Ok(account)
}

fn select_account(conn: &Connection, id: AccountId) -> Result<Account> {
    conn.query_row(
        &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS),
        params![id],
        row_to_account,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("account {}", id)))
}

fn select_accounts(conn: &Connection, params: &ListAccountsParams) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM accounts ORDER BY id LIMIT ? OFFSET ?",
        ACCOUNT_COLUMNS
    ))?;
    let rows = stmt.query_map(params![params.limit, params.offset], row_to_account)?;
    let mut accounts = Vec::new();
    for account in rows {
        accounts.push(account?);
    }
    Ok(accounts)
}

/// Read, increment and write in one statement; the row stays locked by
/// the enclosing transaction
fn update_balance(conn: &Connection, params: &AddAccountBalanceParams) -> Result<Account> {
    conn.query_row(
        &format!(
            "UPDATE accounts SET balance = balance + ? WHERE id = ? RETURNING {}",
            ACCOUNT_COLUMNS
        ),
        params![params.amount, params.id],
        row_to_account,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("account {}", params.id)))
}

fn insert_entry(conn: &Connection, params: &CreateEntryParams) -> Result<Entry> {
    let entry = conn.query_row(
        &format!(
            "INSERT INTO entries (account_id, amount, created_at)
             VALUES (?, ?, CAST(? AS TIMESTAMP))
             RETURNING {}",
            ENTRY_COLUMNS
        ),
        params![params.account_id, params.amount, now_param()],
        row_to_entry,
    )?;
    Ok(entry)
}

fn select_entry(conn: &Connection, id: EntryId) -> Result<Entry> {
    conn.query_row(
        &format!("SELECT {} FROM entries WHERE id = ?", ENTRY_COLUMNS),
        params![id],
        row_to_entry,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("entry {}", id)))
}

fn select_entries(conn: &Connection, params: &ListEntriesParams) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM entries WHERE account_id = ? ORDER BY id LIMIT ? OFFSET ?",
        ENTRY_COLUMNS
    ))?;
    let rows = stmt.query_map(
        params![params.account_id, params.limit, params.offset],
        row_to_entry,
    )?;
    let mut entries = Vec::new();
    for entry in rows {
        entries.push(entry?);
    }
    Ok(entries)
}

fn insert_transfer(conn: &Connection, params: &CreateTransferParams) -> Result<Transfer> {
    let transfer = conn.query_row(
        &format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount, created_at)
             VALUES (?, ?, ?, CAST(? AS TIMESTAMP))
             RETURNING {}",
            TRANSFER_COLUMNS
        ),
        params![
            params.from_account_id,
            params.to_account_id,
            params.amount,
            now_param()
        ],
        row_to_transfer,
    )?;
    Ok(transfer)
}

fn select_transfer(conn: &Connection, id: TransferId) -> Result<Transfer> {
    conn.query_row(
        &format!("SELECT {} FROM transfers WHERE id = ?", TRANSFER_COLUMNS),
        params![id],
        row_to_transfer,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(format!("transfer {}", id)))
}

fn select_transfers(conn: &Connection, params: &ListTransfersParams) -> Result<Vec<Transfer>> {
    let mut transfers = Vec::new();
    match (params.from_account_id, params.to_account_id) {
        (None, None) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM transfers ORDER BY id LIMIT ? OFFSET ?",
                TRANSFER_COLUMNS
            ))?;
            let rows = stmt.query_map(params![params.limit, params.offset], row_to_transfer)?;
            for transfer in rows {
                transfers.push(transfer?);
            }
        }
        (from, to) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM transfers
                 WHERE from_account_id = ? OR to_account_id = ?
                 ORDER BY id LIMIT ? OFFSET ?",
                TRANSFER_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![from, to, params.limit, params.offset],
                row_to_transfer,
            )?;
            for transfer in rows {
                transfers.push(transfer?);
            }
        }
    }
    Ok(transfers)
}
