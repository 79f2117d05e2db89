//! Transactor port - scoped transaction boundaries

use async_trait::async_trait;

use super::Queries;
use crate::domain::result::Result;

/// A [`Queries`] accessor bound to one open transaction
///
/// Exactly one of `commit` or `rollback` ends the transaction. Dropping the
/// accessor without calling either must roll the transaction back.
#[async_trait]
pub trait TxQueries: Queries + Sized {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Opens transactions on a store
///
/// Use [`run_in_transaction`](crate::services::run_in_transaction) rather than
/// calling `begin` directly; it guarantees commit-or-rollback.
#[async_trait]
pub trait Transactor: Send + Sync {
    type Tx: TxQueries + 'static;

    async fn begin(&self) -> Result<Self::Tx>;
}
