//! CLI command implementations

pub mod account;
pub mod doctor;
pub mod entries;
pub mod stress;
pub mod transfer;
pub mod transfers;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tally_core::TallyContext;

/// Get the tally directory from `TALLY_DIR` or default to `~/.tally`
pub fn get_tally_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TALLY_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".tally"))
        .ok_or_else(|| anyhow!("Could not find home directory; set TALLY_DIR"))
}

/// Open the ledger, creating the directory and database on first use
pub fn get_context() -> Result<TallyContext> {
    let tally_dir = get_tally_dir()?;
    TallyContext::new(&tally_dir)
        .with_context(|| format!("Failed to open ledger in {}", tally_dir.display()))
}
