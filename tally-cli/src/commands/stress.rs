//! Stress command - hammer a scratch ledger with concurrent transfers
//!
//! Transfers run in both directions between neighbouring accounts so that
//! many of them contend on the same rows. Afterwards the ledger must still
//! balance and pass every doctor check.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::ValueEnum;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use tally_core::adapters::duckdb::DuckDbStore;
use tally_core::adapters::memory::{MemoryOptions, MemoryStore};
use tally_core::config::Config;
use tally_core::domain::{AccountId, CreateAccountParams};
use tally_core::ports::{LedgerStats, Queries, Transactor};
use tally_core::services::{
    retry, AccountService, DoctorReport, RetryPolicy, TransferService,
};
use tally_core::{Context, TransferRequest};

use super::doctor::print_report;
use super::get_tally_dir;
use crate::output::{self, create_table, format_amount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// In-process store with blocking row locks
    Memory,
    /// In-memory DuckDB database (optimistic concurrency, conflicts are retried)
    Duckdb,
}

impl StoreKind {
    fn name(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Duckdb => "duckdb",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StressOptions {
    pub store: StoreKind,
    pub accounts: usize,
    pub transfers: usize,
    pub concurrency: usize,
    /// Opening balance of every account, in minor units
    pub opening_balance: i64,
}

struct Outcome {
    succeeded: usize,
    failed: usize,
    retries: usize,
    elapsed: Duration,
    expected_sum: i128,
    report: DoctorReport,
}

impl Outcome {
    fn conserved(&self) -> bool {
        self.report.totals.balance_sum == self.expected_sum
    }

    fn passed(&self) -> bool {
        self.failed == 0 && self.conserved() && self.report.is_healthy()
    }
}

/// Returns whether the run passed
pub async fn run(opts: StressOptions, json: bool) -> Result<bool> {
    // The scratch ledger never touches the user's database; only the retry
    // settings are read from their config.
    let policy = get_tally_dir()
        .and_then(|dir| Config::load(&dir))
        .map(|config| config.retry_policy())
        .unwrap_or_default();
    let policy = RetryPolicy {
        max_attempts: policy.max_attempts.max(20),
        ..policy
    };

    let outcome = match opts.store {
        StoreKind::Memory => {
            let store = MemoryStore::with_options(MemoryOptions {
                non_negative_balances: false,
                lock_timeout: Some(Duration::from_secs(5)),
            });
            stress(Arc::new(store), &opts, policy, json).await?
        }
        StoreKind::Duckdb => {
            let store = DuckDbStore::open_in_memory()?;
            store.ensure_schema()?;
            stress(Arc::new(store), &opts, policy, json).await?
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "store": opts.store.name(),
                "transfers": opts.transfers,
                "succeeded": outcome.succeeded,
                "failed": outcome.failed,
                "retries": outcome.retries,
                "elapsed_ms": outcome.elapsed.as_millis() as u64,
                "balance_conserved": outcome.conserved(),
                "report": outcome.report,
            }))?
        );
    } else {
        print_outcome(&opts, &outcome);
    }

    Ok(outcome.passed())
}

/// Pick the accounts of transfer `i`: neighbours, alternating direction
fn pair(ids: &[AccountId], i: usize) -> (AccountId, AccountId) {
    let a = i % ids.len();
    let b = (a + 1) % ids.len();
    if (i / ids.len()) % 2 == 0 {
        (ids[a], ids[b])
    } else {
        (ids[b], ids[a])
    }
}

async fn stress<S>(
    store: Arc<S>,
    opts: &StressOptions,
    policy: RetryPolicy,
    quiet: bool,
) -> Result<Outcome>
where
    S: Transactor + Queries + LedgerStats + 'static,
{
    let accounts = AccountService::new(Arc::clone(&store));
    let mut ids = Vec::with_capacity(opts.accounts.max(1));
    for n in 0..opts.accounts.max(1) {
        let account = accounts
            .create_account(&CreateAccountParams::new(
                format!("stress-{}", n),
                opts.opening_balance,
                "USD",
            ))
            .await?;
        ids.push(account.id);
    }

    let service = TransferService::new(Arc::clone(&store));
    let retries = Arc::new(AtomicUsize::new(0));

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(opts.transfers as u64).with_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?,
        )
    };

    let started = Instant::now();
    let results: Vec<_> = stream::iter(0..opts.transfers)
        .map(|i| {
            let (from, to) = pair(&ids, i);
            let request = TransferRequest::new(from, to, (i % 10 + 1) as i64);
            let service = service.clone();
            let retries = Arc::clone(&retries);
            tokio::spawn(async move {
                retry(&policy, |attempt| {
                    if attempt > 1 {
                        retries.fetch_add(1, Ordering::Relaxed);
                    }
                    let service = service.clone();
                    async move { service.transfer(&Context::background(), &request).await }
                })
                .await
            })
        })
        .buffer_unordered(opts.concurrency.max(1))
        .inspect(|_| progress.inc(1))
        .collect()
        .await;
    let elapsed = started.elapsed();

    let mut succeeded = 0;
    let mut failed = 0;
    for result in results {
        match result {
            Ok(Ok(_)) => succeeded += 1,
            Ok(Err(e)) => {
                failed += 1;
                tracing::warn!("transfer failed: {}", e);
            }
            Err(e) => {
                failed += 1;
                tracing::error!("transfer task panicked: {}", e);
            }
        }
    }
    progress.finish_with_message(format!("{} ok, {} failed", succeeded, failed));

    let totals = store.ledger_totals().await?;
    Ok(Outcome {
        succeeded,
        failed,
        retries: retries.load(Ordering::Relaxed),
        elapsed,
        expected_sum: opts.opening_balance as i128 * ids.len() as i128,
        report: DoctorReport::from_totals(totals),
    })
}

fn print_outcome(opts: &StressOptions, outcome: &Outcome) {
    let mut table = create_table();
    table.set_header(vec!["Metric", "Value"]);
    let per_sec = outcome.succeeded as f64 / outcome.elapsed.as_secs_f64().max(f64::EPSILON);
    let expected = i64::try_from(outcome.expected_sum)
        .map(format_amount)
        .unwrap_or_else(|_| outcome.expected_sum.to_string());
    let rows = [
        ("Store", opts.store.name().to_string()),
        ("Accounts", opts.accounts.to_string()),
        ("Concurrency", opts.concurrency.to_string()),
        ("Succeeded", outcome.succeeded.to_string()),
        ("Failed", outcome.failed.to_string()),
        ("Retries", outcome.retries.to_string()),
        ("Elapsed", format!("{:.2?}", outcome.elapsed)),
        ("Throughput", format!("{:.0} transfers/s", per_sec)),
        ("Expected balance sum", expected),
    ];
    for (metric, value) in rows {
        table.add_row(vec![metric.to_string(), value]);
    }
    println!("{}", table);
    println!();

    print_report(&outcome.report, true);
    println!();

    if outcome.passed() {
        output::success("Stress run passed");
    } else if !outcome.conserved() {
        output::error("Balance sum changed during the run");
    } else {
        output::warning("Stress run finished with failures");
    }
}
