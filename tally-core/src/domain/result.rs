//! Result and error types for the core library

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The write a transfer was performing when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStep {
    CreateTransfer,
    CreateDebitEntry,
    CreateCreditEntry,
    /// First balance update (lower account id)
    FirstBalanceUpdate,
    /// Second balance update (higher account id)
    SecondBalanceUpdate,
}

impl TransferStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStep::CreateTransfer => "create transfer",
            TransferStep::CreateDebitEntry => "create debit entry",
            TransferStep::CreateCreditEntry => "create credit entry",
            TransferStep::FirstBalanceUpdate => "first balance update",
            TransferStep::SecondBalanceUpdate => "second balance update",
        }
    }
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A storage-level constraint rejected the write (e.g. a balance check)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Write-write conflict, serialization failure or lock wait timeout.
    /// The whole transfer may be retried by the caller.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{step} failed: {source}")]
    Step {
        step: TransferStep,
        #[source]
        source: Box<Error>,
    },

    /// The transaction failed and the rollback that followed failed too
    #[error("tx err: {source}, rb err: {rollback}")]
    Rollback {
        #[source]
        source: Box<Error>,
        rollback: Box<Error>,
    },

    #[error("Commit failed: {0}")]
    Commit(#[source] Box<Error>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Tag this error with the transfer step that produced it
    pub fn at(self, step: TransferStep) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
        }
    }

    /// Whether re-running the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Step { source, .. } | Error::Commit(source) => source.is_retryable(),
            // A failed rollback leaves the outcome unclear; never retry it blindly
            Error::Rollback { .. } => false,
            _ => false,
        }
    }

    /// Whether unwinding the transaction failed as well
    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, Error::Rollback { .. })
    }

    /// The transfer step that failed, if the error came from one
    pub fn failed_step(&self) -> Option<TransferStep> {
        match self {
            Error::Step { step, .. } => Some(*step),
            Error::Rollback { source, .. } => source.failed_step(),
            _ => None,
        }
    }

    /// The innermost error, with step and commit wrappers removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } | Error::Commit(source) => source.root(),
            Error::Rollback { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
