//! Entries command - ledger entries of one account

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color};

use tally_core::domain::ListEntriesParams;

use super::get_context;
use crate::output::{create_table, format_amount};

pub async fn run(account_id: i64, limit: i64, offset: i64, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let entries = ctx
        .account_service
        .list_entries(&ListEntriesParams {
            account_id,
            limit,
            offset,
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", format!("No entries for account {}", account_id).dimmed());
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["ID", "Amount", "Created"]);
    for entry in &entries {
        let amount = Cell::new(format_amount(entry.amount)).fg(if entry.is_debit() {
            Color::Red
        } else {
            Color::Green
        });
        table.add_row(vec![
            Cell::new(entry.id),
            amount,
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    println!("{}", table);
    Ok(())
}
