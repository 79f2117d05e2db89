//! Ledger statistics port - aggregate reads used by consistency checks

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::result::Result;

/// Aggregates over committed data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerTotals {
    pub account_count: i64,
    pub balance_sum: i128,
    pub transfer_count: i64,
    pub transfer_amount_sum: i128,
    pub entry_count: i64,
    pub entry_amount_sum: i128,
    /// Sum of positive entry amounts
    pub credit_amount_sum: i128,
}

#[async_trait]
pub trait LedgerStats: Send + Sync {
    async fn ledger_totals(&self) -> Result<LedgerTotals>;
}
