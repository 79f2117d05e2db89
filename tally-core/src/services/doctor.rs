//! Doctor service - ledger consistency checks

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::domain::result::Result;
use crate::ports::{LedgerStats, LedgerTotals};

/// Doctor service for ledger health checks
pub struct DoctorService<S> {
    store: Arc<S>,
}

impl<S: LedgerStats> DoctorService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run all checks against committed data
    pub async fn run_checks(&self) -> Result<DoctorReport> {
        let totals = self.store.ledger_totals().await?;
        Ok(DoctorReport::from_totals(totals))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorSummary {
    pub passed: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub totals: LedgerTotals,
    pub checks: BTreeMap<String, CheckResult>,
    pub summary: DoctorSummary,
}

impl DoctorReport {
    pub fn from_totals(totals: LedgerTotals) -> Self {
        let mut checks = BTreeMap::new();

        // Every transfer writes a debit and a credit of the same size
        checks.insert(
            "entry_symmetry".to_string(),
            check(
                totals.entry_amount_sum == 0,
                "Entry amounts sum to zero".to_string(),
                format!("Entry amounts sum to {}, expected 0", totals.entry_amount_sum),
                json!({ "entry_amount_sum": totals.entry_amount_sum.to_string() }),
            ),
        );

        checks.insert(
            "entries_per_transfer".to_string(),
            check(
                totals.entry_count == 2 * totals.transfer_count,
                format!(
                    "{} entries for {} transfers",
                    totals.entry_count, totals.transfer_count
                ),
                format!(
                    "{} entries for {} transfers, expected {}",
                    totals.entry_count,
                    totals.transfer_count,
                    2 * totals.transfer_count
                ),
                json!({
                    "entry_count": totals.entry_count,
                    "transfer_count": totals.transfer_count,
                }),
            ),
        );

        checks.insert(
            "credits_match_transfers".to_string(),
            check(
                totals.credit_amount_sum == totals.transfer_amount_sum,
                "Credit entries match transfer amounts".to_string(),
                format!(
                    "Credit entries total {}, transfers total {}",
                    totals.credit_amount_sum, totals.transfer_amount_sum
                ),
                json!({
                    "credit_amount_sum": totals.credit_amount_sum.to_string(),
                    "transfer_amount_sum": totals.transfer_amount_sum.to_string(),
                }),
            ),
        );

        let errors = checks
            .values()
            .filter(|c| c.status == CheckStatus::Error)
            .count();
        let summary = DoctorSummary {
            passed: checks.len() - errors,
            errors,
        };

        Self {
            totals,
            checks,
            summary,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.summary.errors == 0
    }

    /// Names of the checks that failed
    pub fn failed(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, c)| c.status == CheckStatus::Error)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn check(ok: bool, pass: String, fail: String, details: serde_json::Value) -> CheckResult {
    if ok {
        CheckResult {
            status: CheckStatus::Pass,
            message: pass,
            details: None,
        }
    } else {
        CheckResult {
            status: CheckStatus::Error,
            message: fail,
            details: Some(details),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistent_ledger_passes() {
        let report = DoctorReport::from_totals(LedgerTotals {
            account_count: 2,
            balance_sum: 150,
            transfer_count: 3,
            transfer_amount_sum: 90,
            entry_count: 6,
            entry_amount_sum: 0,
            credit_amount_sum: 90,
        });
        assert!(report.is_healthy());
        assert_eq!(report.summary.passed, 3);
        assert!(report.failed().is_empty());
    }

    #[test]
    fn test_missing_entry_is_reported() {
        let report = DoctorReport::from_totals(LedgerTotals {
            account_count: 2,
            balance_sum: 150,
            transfer_count: 1,
            transfer_amount_sum: 30,
            entry_count: 1,
            entry_amount_sum: -30,
            credit_amount_sum: 0,
        });
        assert!(!report.is_healthy());
        assert_eq!(
            report.failed(),
            vec!["credits_match_transfers", "entries_per_transfer", "entry_symmetry"]
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["checks"]["entry_symmetry"]["status"], "error");
    }

    #[test]
    fn test_empty_ledger_is_healthy() {
        assert!(DoctorReport::from_totals(LedgerTotals::default()).is_healthy());
    }
}
