//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

mod account;
mod doctor;
pub mod logging;
pub mod migration;
mod retry;
mod transfer;
mod tx;

pub use account::AccountService;
pub use doctor::{CheckResult, CheckStatus, DoctorReport, DoctorService, DoctorSummary};
pub use logging::init_logging;
pub use migration::{MigrationResult, MigrationService};
pub use retry::{retry, RetryPolicy};
pub use transfer::{apply_balance_deltas, execute_transfer, TransferService};
pub use tx::run_in_transaction;
