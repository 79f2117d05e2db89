//! Transfers command - list transfers, optionally for one account

use anyhow::Result;
use colored::Colorize;

use tally_core::domain::ListTransfersParams;

use super::get_context;
use crate::output::{create_table, format_amount};

pub struct TransferFilter {
    pub account_id: Option<i64>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl TransferFilter {
    fn params(&self, limit: i64, offset: i64) -> ListTransfersParams {
        ListTransfersParams {
            from_account_id: self.from.or(self.account_id),
            to_account_id: self.to.or(self.account_id),
            limit,
            offset,
        }
    }
}

pub async fn run(filter: TransferFilter, limit: i64, offset: i64, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let transfers = ctx
        .account_service
        .list_transfers(&filter.params(limit, offset))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&transfers)?);
        return Ok(());
    }

    if transfers.is_empty() {
        println!("{}", "No transfers".dimmed());
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["ID", "From", "To", "Amount", "Created"]);
    for transfer in &transfers {
        table.add_row(vec![
            transfer.id.to_string(),
            transfer.from_account_id.to_string(),
            transfer.to_account_id.to_string(),
            format_amount(transfer.amount),
            transfer.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_fills_both_sides() {
        let filter = TransferFilter {
            account_id: Some(3),
            from: None,
            to: Some(7),
        };
        let params = filter.params(10, 5);
        assert_eq!(params.from_account_id, Some(3));
        assert_eq!(params.to_account_id, Some(7));
        assert_eq!((params.limit, params.offset), (10, 5));
    }
}
