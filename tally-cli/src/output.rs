//! Output formatting utilities

use anyhow::{anyhow, Result};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Amounts are stored in the smallest unit; the CLI shows two decimals
const MINOR_UNITS: u32 = 2;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Parse a user-entered amount such as `12.5` into minor units (`1250`)
pub fn parse_amount(input: &str) -> Result<i64> {
    let value: Decimal = input
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid amount: {}", input))?;
    if value.normalize().scale() > MINOR_UNITS {
        return Err(anyhow!(
            "Invalid amount: {} has more than {} decimal places",
            input,
            MINOR_UNITS
        ));
    }
    value
        .checked_mul(Decimal::from(10i64.pow(MINOR_UNITS)))
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| anyhow!("Amount out of range: {}", input))
}

/// Format minor units for display (`-1250` becomes `-12.50`)
pub fn format_amount(minor: i64) -> String {
    Decimal::new(minor, MINOR_UNITS).to_string()
}

/// Format an amount with its currency, colored by sign
pub fn format_money(minor: i64, currency: &str) -> String {
    let text = format!("{} {}", format_amount(minor), currency);
    if minor < 0 {
        text.red().to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("12.34").unwrap(), 1234);
        assert_eq!(parse_amount("12.5").unwrap(), 1250);
        assert_eq!(parse_amount(" 7 ").unwrap(), 700);
        assert_eq!(parse_amount("-3.10").unwrap(), -310);
        assert!(parse_amount("1.234").is_err());
        assert!(parse_amount("ten").is_err());
    }

    #[test]
    fn test_parse_amount_trailing_zeros() {
        assert_eq!(parse_amount("1.230").unwrap(), 123);
        assert_eq!(parse_amount("5.0000").unwrap(), 500);
        assert!(parse_amount("1.2301").is_err());
    }

    #[test]
    fn test_parse_amount_out_of_range() {
        assert!(parse_amount("79228162514264337593543950335").is_err());
        assert!(parse_amount("92233720368547758.08").is_err());
        assert_eq!(parse_amount("92233720368547758.07").unwrap(), i64::MAX);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1234), "12.34");
        assert_eq!(format_amount(-5), "-0.05");
        assert_eq!(format_amount(0), "0.00");
    }
}
