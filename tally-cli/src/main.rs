//! Tally CLI - atomic ledger transfers in your terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::stress::{StoreKind, StressOptions};
use commands::{account, doctor, entries, get_tally_dir, stress, transfer, transfers};
use tally_core::config::Config;
use tally_core::services::init_logging;

/// Tally - a double-entry ledger with atomic transfers
#[derive(Parser)]
#[command(name = "tally", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage accounts
    Account {
        #[command(subcommand)]
        command: account::AccountCommands,
    },

    /// Move money from one account to another
    Transfer {
        /// Source account ID
        #[arg(long)]
        from: i64,
        /// Destination account ID
        #[arg(long)]
        to: i64,
        /// Amount, e.g. 12.50
        amount: String,
        /// Fail on the first conflict instead of retrying
        #[arg(long)]
        no_retry: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List ledger entries of an account
    Entries {
        /// Account ID
        account_id: i64,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List transfers
    Transfers {
        /// Only transfers from or to this account
        #[arg(long)]
        account_id: Option<i64>,
        /// Match transfers out of this account
        #[arg(long)]
        from: Option<i64>,
        /// Match transfers into this account
        #[arg(long)]
        to: Option<i64>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run ledger consistency checks
    Doctor {
        /// Show details and totals
        #[arg(long, short)]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run concurrent transfers against a scratch ledger
    Stress {
        /// Store to exercise
        #[arg(long, value_enum, default_value_t = StoreKind::Memory)]
        store: StoreKind,
        #[arg(long, default_value_t = 8)]
        accounts: usize,
        #[arg(long, default_value_t = 1000)]
        transfers: usize,
        /// Transfers in flight at once
        #[arg(long, default_value_t = 32)]
        concurrency: usize,
        /// Opening balance of each account
        #[arg(long, default_value = "100.00")]
        balance: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = get_tally_dir()
        .and_then(|dir| Config::load(&dir))
        .unwrap_or_default();
    init_logging(&config.logging);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` means the command ran but its checks failed
async fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Account { command } => account::run(command).await.map(|_| true),
        Commands::Transfer {
            from,
            to,
            amount,
            no_retry,
            json,
        } => transfer::run(from, to, &amount, no_retry, json)
            .await
            .map(|_| true),
        Commands::Entries {
            account_id,
            limit,
            offset,
            json,
        } => entries::run(account_id, limit, offset, json)
            .await
            .map(|_| true),
        Commands::Transfers {
            account_id,
            from,
            to,
            limit,
            offset,
            json,
        } => {
            let filter = transfers::TransferFilter {
                account_id,
                from,
                to,
            };
            transfers::run(filter, limit, offset, json)
                .await
                .map(|_| true)
        }
        Commands::Doctor { verbose, json } => doctor::run(verbose, json).await,
        Commands::Stress {
            store,
            accounts,
            transfers,
            concurrency,
            balance,
            json,
        } => {
            let opts = StressOptions {
                store,
                accounts,
                transfers,
                concurrency,
                opening_balance: output::parse_amount(&balance)?,
            };
            stress::run(opts, json).await
        }
    }
}
