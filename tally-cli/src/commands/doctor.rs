//! Doctor command - run ledger consistency checks

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color};
use serde_json::Value;

use tally_core::services::{CheckStatus, DoctorReport};

use super::get_context;
use crate::output::{create_table, format_amount};

/// Format a detail JSON value as "key: value, key: value"
fn format_detail(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}: {}", k, s),
                _ => format!("{}: {}", k, v),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

/// Returns whether every check passed
pub async fn run(verbose: bool, json: bool) -> Result<bool> {
    let ctx = get_context()?;
    let report = ctx.doctor_service.run_checks().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, verbose);
    }

    Ok(report.is_healthy())
}

pub fn print_report(report: &DoctorReport, verbose: bool) {
    println!("{}", "Ledger Health Check".bold());
    println!();

    let mut table = create_table();
    table.set_header(vec!["Check", "Status", "Message"]);

    for (check_name, check) in &report.checks {
        let status_cell = match check.status {
            CheckStatus::Pass => Cell::new("PASS").fg(Color::Green),
            CheckStatus::Error => Cell::new("ERROR").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(check_name),
            status_cell,
            Cell::new(&check.message),
        ]);

        if verbose {
            if let Some(details) = &check.details {
                table.add_row(vec![
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(format!("  - {}", format_detail(details))),
                ]);
            }
        }
    }
    println!("{}", table);
    println!();

    if verbose {
        let totals = &report.totals;
        println!(
            "Accounts: {}  Transfers: {}  Entries: {}",
            totals.account_count, totals.transfer_count, totals.entry_count
        );
        match i64::try_from(totals.balance_sum) {
            Ok(sum) => println!("Sum of balances: {}", format_amount(sum)),
            Err(_) => println!("Sum of balances: {} (minor units)", totals.balance_sum),
        }
        println!();
    }

    println!(
        "Summary: {} passed, {} errors",
        report.summary.passed.to_string().green(),
        report.summary.errors.to_string().red(),
    );
}
