//! Transfer command - move money between two accounts

use anyhow::Result;
use colored::Colorize;

use tally_core::services::{retry, RetryPolicy};
use tally_core::TransferRequest;

use super::get_context;
use crate::output::{self, format_money, parse_amount};

pub async fn run(from: i64, to: i64, amount: &str, no_retry: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let request = TransferRequest::new(from, to, parse_amount(amount)?);
    let policy = if no_retry {
        RetryPolicy::none()
    } else {
        ctx.retry_policy()
    };

    let result = retry(&policy, |attempt| {
        if attempt > 1 {
            output::warning(&format!("Conflict, retrying (attempt {})", attempt));
        }
        let call = ctx.call_context();
        let service = &ctx.transfer_service;
        async move { service.transfer(&call, &request).await }
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    output::success(&format!("Transfer #{} committed", result.transfer.id));
    println!(
        "  {} {} -> {}",
        format_money(result.transfer.amount, &result.from_account.currency),
        result.from_account.owner.bold(),
        result.to_account.owner.bold(),
    );
    println!(
        "  {} balance: {}",
        result.from_account.owner,
        format_money(result.from_account.balance, &result.from_account.currency)
    );
    if !result.transfer.is_self_transfer() {
        println!(
            "  {} balance: {}",
            result.to_account.owner,
            format_money(result.to_account.balance, &result.to_account.currency)
        );
    }
    Ok(())
}
