//! Transaction scope helper

use futures::future::BoxFuture;
use tracing::{error, warn};

use crate::context::Context;
use crate::domain::result::{Error, Result};
use crate::ports::{Transactor, TxQueries};

/// Run `body` inside one transaction of `transactor`.
///
/// The body is raced against `ctx`. Any error from the body, or the context
/// firing first, rolls the transaction back. If that rollback fails as well
/// the returned error is [`Error::Rollback`] carrying both causes. After a
/// successful body the context is checked once more before committing; a
/// failed commit is wrapped in [`Error::Commit`].
pub async fn run_in_transaction<X, T, F>(transactor: &X, ctx: &Context, body: F) -> Result<T>
where
    X: Transactor + ?Sized,
    T: Send,
    F: for<'a> FnOnce(&'a X::Tx) -> BoxFuture<'a, Result<T>> + Send,
{
    ctx.check()?;
    let tx = ctx.run(transactor.begin()).await?;

    let outcome = ctx.run(body(&tx)).await;

    let value = match outcome.and_then(|value| ctx.check().map(|_| value)) {
        Ok(value) => value,
        Err(err) => return Err(abort(tx, err).await),
    };

    tx.commit().await.map_err(|e| {
        error!(error = %e, "commit failed");
        Error::Commit(Box::new(e))
    })?;
    Ok(value)
}

/// Roll back after `err`, folding a rollback failure into the error
async fn abort<Tx: TxQueries>(tx: Tx, err: Error) -> Error {
    match tx.rollback().await {
        Ok(()) => {
            warn!(error = %err, "transaction rolled back");
            err
        }
        Err(rollback) => {
            error!(error = %err, rollback_error = %rollback, "rollback failed");
            Error::Rollback {
                source: Box::new(err),
                rollback: Box::new(rollback),
            }
        }
    }
}
