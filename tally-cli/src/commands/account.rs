//! Account commands - create, list and inspect accounts

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Input;

use tally_core::domain::{CreateAccountParams, ListAccountsParams};

use super::get_context;
use crate::output::{self, create_table, format_amount, format_money, parse_amount};

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    New {
        /// Account owner (prompted if omitted)
        #[arg(long)]
        owner: Option<String>,
        /// Opening balance, e.g. 100.00 (prompted if omitted)
        #[arg(long)]
        balance: Option<String>,
        /// ISO 4217 currency code
        #[arg(long, default_value = "USD")]
        currency: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List accounts
    List {
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one account
    Show {
        /// Account ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(command: AccountCommands) -> Result<()> {
    match command {
        AccountCommands::New {
            owner,
            balance,
            currency,
            json,
        } => run_new(owner, balance, currency, json).await,
        AccountCommands::List {
            limit,
            offset,
            json,
        } => run_list(limit, offset, json).await,
        AccountCommands::Show { id, json } => run_show(id, json).await,
    }
}

async fn run_new(
    owner: Option<String>,
    balance: Option<String>,
    currency: String,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;

    let owner = match owner {
        Some(o) => o,
        None => Input::new().with_prompt("Owner").interact_text()?,
    };
    let balance_str = match balance {
        Some(b) => b,
        None => Input::new()
            .with_prompt("Opening balance")
            .default("0.00".to_string())
            .interact_text()?,
    };
    let balance = parse_amount(&balance_str)?;

    let account = ctx
        .account_service
        .create_account(&CreateAccountParams::new(owner, balance, currency))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&account)?);
    } else {
        output::success("Account created");
        println!("  ID: {}", account.id);
        println!("  Owner: {}", account.owner);
        println!("  Balance: {}", format_money(account.balance, &account.currency));
    }
    Ok(())
}

async fn run_list(limit: i64, offset: i64, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let accounts = ctx
        .account_service
        .list_accounts(&ListAccountsParams { limit, offset })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }

    if accounts.is_empty() {
        println!("{}", "No accounts yet. Create one with `tally account new`.".dimmed());
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["ID", "Owner", "Balance", "Currency", "Created"]);
    for account in &accounts {
        table.add_row(vec![
            account.id.to_string(),
            account.owner.clone(),
            format_amount(account.balance),
            account.currency.clone(),
            account.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

async fn run_show(id: i64, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let account = ctx.account_service.get_account(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&account)?);
        return Ok(());
    }

    println!("{}", format!("Account {}", account.id).bold());
    println!("  Owner: {}", account.owner);
    println!("  Balance: {}", format_money(account.balance, &account.currency));
    println!("  Created: {}", account.created_at.to_rfc3339());
    Ok(())
}
