//! Transfer service - moves value between two accounts atomically
//!
//! One call writes, inside a single transaction:
//!
//! 1. the transfer record
//! 2. a debit entry on the source account
//! 3. a credit entry on the destination account
//! 4. both balance updates, lower account id first
//!
//! Balance updates are the only writes that take row locks that other
//! transfers contend on. Issuing them in ascending id order means two
//! transfers over the same pair of accounts always lock in the same order
//! and can never wait on each other in a cycle.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::context::Context;
use crate::domain::result::{Result, TransferStep};
use crate::domain::{
    Account, AddAccountBalanceParams, CreateEntryParams, CreateTransferParams, TransferRequest,
    TransferResult,
};
use crate::ports::{Queries, Transactor};
use crate::services::tx::run_in_transaction;

/// Transfer orchestrator over any transactional store
pub struct TransferService<S> {
    store: Arc<S>,
}

impl<S> Clone for TransferService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Transactor> TransferService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Move `request.amount` from one account to another.
    ///
    /// Either every write commits or none does. Failures carry the step that
    /// failed (see [`Error::failed_step`](crate::Error::failed_step)). The
    /// call is never retried here; conflicts come back as retryable errors.
    pub async fn transfer(&self, ctx: &Context, request: &TransferRequest) -> Result<TransferResult> {
        let span = info_span!(
            "transfer",
            call_id = %Uuid::new_v4(),
            from = request.from_account_id,
            to = request.to_account_id,
            amount = request.amount,
        );

        self.run(ctx, *request).instrument(span).await
    }

    async fn run(&self, ctx: &Context, request: TransferRequest) -> Result<TransferResult> {
        request.validate()?;

        let result = run_in_transaction(self.store.as_ref(), ctx, move |tx| {
            execute_transfer(tx, request).boxed()
        })
        .await?;

        info!(transfer_id = result.transfer.id, "transfer committed");
        Ok(result)
    }
}

/// Issue the writes of one transfer on `q`, which must be bound to an open
/// transaction.
pub async fn execute_transfer<Q>(q: &Q, request: TransferRequest) -> Result<TransferResult>
where
    Q: Queries + ?Sized,
{
    let transfer = q
        .create_transfer(&CreateTransferParams {
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount: request.amount,
        })
        .await
        .map_err(|e| e.at(TransferStep::CreateTransfer))?;
    debug!(transfer_id = transfer.id, "transfer record created");

    let from_entry = q
        .create_entry(&CreateEntryParams {
            account_id: request.from_account_id,
            amount: -request.amount,
        })
        .await
        .map_err(|e| e.at(TransferStep::CreateDebitEntry))?;

    let to_entry = q
        .create_entry(&CreateEntryParams {
            account_id: request.to_account_id,
            amount: request.amount,
        })
        .await
        .map_err(|e| e.at(TransferStep::CreateCreditEntry))?;
    debug!(from_entry = from_entry.id, to_entry = to_entry.id, "entries created");

    let (from_account, to_account) = apply_balance_deltas(
        q,
        AddAccountBalanceParams {
            id: request.from_account_id,
            amount: -request.amount,
        },
        AddAccountBalanceParams {
            id: request.to_account_id,
            amount: request.amount,
        },
    )
    .await?;

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Apply two balance deltas, locking the lower account id first.
///
/// Returns the updated accounts in argument order. When both deltas target
/// the same account, `first` is applied before `second` and both returned
/// snapshots hold the final balance.
pub async fn apply_balance_deltas<Q>(
    q: &Q,
    first: AddAccountBalanceParams,
    second: AddAccountBalanceParams,
) -> Result<(Account, Account)>
where
    Q: Queries + ?Sized,
{
    if first.id <= second.id {
        let first_account = add_balance(q, &first, TransferStep::FirstBalanceUpdate).await?;
        let second_account = add_balance(q, &second, TransferStep::SecondBalanceUpdate).await?;
        if first.id == second.id {
            return Ok((second_account.clone(), second_account));
        }
        Ok((first_account, second_account))
    } else {
        let second_account = add_balance(q, &second, TransferStep::FirstBalanceUpdate).await?;
        let first_account = add_balance(q, &first, TransferStep::SecondBalanceUpdate).await?;
        Ok((first_account, second_account))
    }
}

async fn add_balance<Q>(q: &Q, params: &AddAccountBalanceParams, step: TransferStep) -> Result<Account>
where
    Q: Queries + ?Sized,
{
    let account = q.add_account_balance(params).await.map_err(|e| e.at(step))?;
    debug!(account_id = account.id, balance = account.balance, %step, "balance updated");
    Ok(account)
}
