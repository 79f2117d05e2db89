//! Tally Core - atomic ledger transfers
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Ledger entities (Account, Entry, Transfer) and errors
//! - **ports**: Storage traits (Queries, Transactor, LedgerStats)
//! - **services**: Business logic orchestration (TransferService, ...)
//! - **adapters**: Concrete stores (DuckDB, in-memory)

pub mod adapters;
pub mod config;
pub mod context;
pub mod domain;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use adapters::duckdb::DuckDbStore;
use config::Config;
use services::{AccountService, DoctorService, RetryPolicy, TransferService};

// Re-export commonly used types at crate root
pub use context::{CancelHandle, Context};
pub use domain::result::{Error, TransferStep};
pub use domain::{Account, Entry, Transfer, TransferRequest, TransferResult};

/// Main context for Tally operations
///
/// Holds the configuration, the database and the services built on it.
pub struct TallyContext {
    pub config: Config,
    pub store: Arc<DuckDbStore>,
    pub transfer_service: TransferService<DuckDbStore>,
    pub account_service: AccountService<DuckDbStore>,
    pub doctor_service: DoctorService<DuckDbStore>,
}

impl TallyContext {
    /// Open the ledger in `tally_dir`, creating the database on first use
    pub fn new(tally_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(tally_dir)?;
        let config = Config::load(tally_dir)?;

        let db_path = tally_dir.join(&config.database.file);
        let store = Arc::new(DuckDbStore::new(&db_path)?);
        store.ensure_schema()?;

        Ok(Self {
            transfer_service: TransferService::new(Arc::clone(&store)),
            account_service: AccountService::new(Arc::clone(&store)),
            doctor_service: DoctorService::new(Arc::clone(&store)),
            config,
            store,
        })
    }

    /// A fresh call context carrying the configured transfer timeout
    pub fn call_context(&self) -> Context {
        match self.config.transfer_timeout() {
            Some(timeout) => Context::background().with_timeout(timeout),
            None => Context::background(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }
}
