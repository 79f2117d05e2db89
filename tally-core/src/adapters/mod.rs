//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for persistent ledgers
//! - An in-process store with pessimistic row locks, used by tests and
//!   the stress command

pub mod duckdb;
pub mod memory;
