//! Transfer behaviour under concurrency and failure, on the in-memory store
//!
//! The memory store takes real row locks that are held until commit, so
//! these tests exercise lock ordering the way a row-locking SQL engine would.
//!
//! Run with: cargo test --test transfer_concurrency_test -- --nocapture

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Barrier;

use tally_core::adapters::memory::{MemoryOptions, MemoryStore, Operation};
use tally_core::domain::{
    Account, AccountId, AddAccountBalanceParams, CreateAccountParams, ListAccountsParams,
    ListEntriesParams, ListTransfersParams,
};
use tally_core::ports::{LedgerStats, Queries, Transactor, TxQueries};
use tally_core::services::{DoctorReport, TransferService};
use tally_core::{Context, Error, TransferRequest, TransferStep};

/// Generous enough never to fire unless transfers really deadlock
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

async fn seed(store: &MemoryStore, balances: &[i64]) -> Vec<Account> {
    let mut accounts = Vec::new();
    for (i, balance) in balances.iter().enumerate() {
        let account = store
            .create_account(&CreateAccountParams::new(format!("owner-{i}"), *balance, "USD"))
            .await
            .unwrap();
        accounts.push(account);
    }
    accounts
}

async fn balance(store: &MemoryStore, id: AccountId) -> i64 {
    store.get_account(id).await.unwrap().balance
}

async fn balance_sum(store: &MemoryStore) -> i64 {
    store
        .list_accounts(&ListAccountsParams::default())
        .await
        .unwrap()
        .iter()
        .map(|a| a.balance)
        .sum()
}

async fn transfer_count(store: &MemoryStore) -> usize {
    store
        .list_transfers(&ListTransfersParams {
            limit: 1000,
            ..Default::default()
        })
        .await
        .unwrap()
        .len()
}

async fn entry_count(store: &MemoryStore, id: AccountId) -> usize {
    store
        .list_entries(&ListEntriesParams {
            account_id: id,
            limit: 1000,
            offset: 0,
        })
        .await
        .unwrap()
        .len()
}

fn locking_store(non_negative_balances: bool) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_options(MemoryOptions {
        non_negative_balances,
        lock_timeout: Some(LOCK_TIMEOUT),
    }))
}

/// Opposite-direction transfers between the same accounts must all finish
/// without any lock wait timing out.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidirectional_transfers_do_not_deadlock() {
    let store = locking_store(false);
    let accounts = seed(&store, &[1000, 1000]).await;
    let (a, b) = (accounts[0].id, accounts[1].id);
    let service = TransferService::new(Arc::clone(&store));

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let service = service.clone();
            let request = if i % 2 == 0 {
                TransferRequest::new(a, b, 10)
            } else {
                TransferRequest::new(b, a, 10)
            };
            tokio::spawn(async move { service.transfer(&Context::background(), &request).await })
        })
        .collect();

    for result in join_all(tasks).await {
        let result = result.unwrap();
        assert!(result.is_ok(), "transfer failed: {:?}", result.err());
    }

    assert_eq!(balance(&store, a).await, 1000);
    assert_eq!(balance(&store, b).await, 1000);
    assert_eq!(balance_sum(&store).await, 2000);
    assert_eq!(transfer_count(&store).await, 40);
    assert_eq!(entry_count(&store, a).await, 40);

    let report = DoctorReport::from_totals(store.ledger_totals().await.unwrap());
    assert!(report.is_healthy(), "{:?}", report.failed());
}

/// Without a global order, two transactions locking the same rows in
/// opposite order wait on each other until the lock timeout.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_opposite_lock_order_would_deadlock() {
    let store = Arc::new(MemoryStore::with_options(MemoryOptions {
        non_negative_balances: false,
        lock_timeout: Some(Duration::from_millis(100)),
    }));
    let accounts = seed(&store, &[100, 100]).await;
    let (a, b) = (accounts[0].id, accounts[1].id);
    let barrier = Arc::new(Barrier::new(2));

    let lock_pair = |first: AccountId, second: AccountId| {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        async move {
            let tx = store.begin().await?;
            tx.add_account_balance(&AddAccountBalanceParams { id: first, amount: 1 })
                .await?;
            barrier.wait().await;
            let outcome = tx
                .add_account_balance(&AddAccountBalanceParams { id: second, amount: 1 })
                .await;
            tx.rollback().await?;
            outcome.map(|_| ())
        }
    };

    let (left, right) = tokio::join!(lock_pair(a, b), lock_pair(b, a));
    let timed_out: Vec<Error> = [left, right].into_iter().filter_map(|r| r.err()).collect();
    assert!(!timed_out.is_empty());
    assert!(timed_out.iter().all(|e| e.is_retryable()));
}

/// Account 1 holds 100 and account 2 holds 50; five concurrent transfers of
/// 30 from 1 to 2.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overdrawing_transfers_without_balance_check() {
    let store = locking_store(false);
    let accounts = seed(&store, &[100, 50]).await;
    let (a, b) = (accounts[0].id, accounts[1].id);
    let service = TransferService::new(Arc::clone(&store));

    let results = join_all((0..5).map(|_| {
        let service = service.clone();
        async move {
            service
                .transfer(&Context::background(), &TransferRequest::new(a, b, 30))
                .await
        }
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(balance(&store, a).await, -50);
    assert_eq!(balance(&store, b).await, 200);
    assert_eq!(transfer_count(&store).await, 5);
    assert_eq!(entry_count(&store, a).await + entry_count(&store, b).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overdrawing_transfers_with_balance_check() {
    let store = locking_store(true);
    let accounts = seed(&store, &[100, 50]).await;
    let (a, b) = (accounts[0].id, accounts[1].id);
    let service = TransferService::new(Arc::clone(&store));

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .transfer(&Context::background(), &TransferRequest::new(a, b, 30))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => {
                assert!(matches!(e.root(), Error::Constraint(_)), "{e}");
                assert_eq!(e.failed_step(), Some(TransferStep::FirstBalanceUpdate));
                rejected += 1;
            }
        }
    }

    assert_eq!((succeeded, rejected), (3, 2));
    assert_eq!(balance(&store, a).await, 10);
    assert_eq!(balance(&store, b).await, 140);
    assert_eq!(transfer_count(&store).await, 3);
    assert_eq!(entry_count(&store, a).await + entry_count(&store, b).await, 6);
}

#[tokio::test]
async fn test_self_transfer_keeps_balance() {
    let store = locking_store(false);
    let accounts = seed(&store, &[80]).await;
    let id = accounts[0].id;
    let service = TransferService::new(Arc::clone(&store));

    let result = service
        .transfer(&Context::background(), &TransferRequest::new(id, id, 25))
        .await
        .unwrap();

    assert_eq!(result.from_account.balance, 80);
    assert_eq!(result.to_account.balance, 80);
    assert_eq!(result.from_entry.amount, -25);
    assert_eq!(result.to_entry.amount, 25);
    assert_eq!(balance(&store, id).await, 80);
    assert_eq!(entry_count(&store, id).await, 2);
    assert_eq!(transfer_count(&store).await, 1);
}

#[tokio::test]
async fn test_result_reports_accounts_in_request_order() {
    let store = locking_store(false);
    let accounts = seed(&store, &[100, 100]).await;
    let (low, high) = (accounts[0].id, accounts[1].id);
    let service = TransferService::new(Arc::clone(&store));

    let result = service
        .transfer(&Context::background(), &TransferRequest::new(high, low, 40))
        .await
        .unwrap();

    assert_eq!(result.transfer.from_account_id, high);
    assert_eq!(result.transfer.to_account_id, low);
    assert_eq!(result.transfer.amount, 40);
    assert_eq!((result.from_account.id, result.from_account.balance), (high, 60));
    assert_eq!((result.to_account.id, result.to_account.balance), (low, 140));
    assert_eq!(result.from_entry.account_id, high);
    assert_eq!(result.to_entry.account_id, low);
    assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
}

/// A failure at any write, or at commit, leaves no trace
#[tokio::test]
async fn test_failure_at_each_step_rolls_back() {
    let cases = [
        (Operation::CreateTransfer, 1, Some(TransferStep::CreateTransfer)),
        (Operation::CreateEntry, 1, Some(TransferStep::CreateDebitEntry)),
        (Operation::CreateEntry, 2, Some(TransferStep::CreateCreditEntry)),
        (Operation::AddAccountBalance, 1, Some(TransferStep::FirstBalanceUpdate)),
        (Operation::AddAccountBalance, 2, Some(TransferStep::SecondBalanceUpdate)),
        (Operation::Commit, 1, None),
    ];

    for (operation, nth, expected_step) in cases {
        let store = locking_store(false);
        let accounts = seed(&store, &[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        store.fail_at(operation, nth);
        let service = TransferService::new(Arc::clone(&store));

        let err = service
            .transfer(&Context::background(), &TransferRequest::new(a, b, 30))
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), expected_step, "{operation:?} #{nth}");
        if operation == Operation::Commit {
            assert!(matches!(err, Error::Commit(_)));
        }
        assert!(!err.is_rollback_failure());

        store.clear_faults();
        assert_eq!(balance(&store, a).await, 100, "{operation:?} #{nth}");
        assert_eq!(balance(&store, b).await, 50, "{operation:?} #{nth}");
        assert_eq!(transfer_count(&store).await, 0, "{operation:?} #{nth}");
        assert_eq!(entry_count(&store, a).await, 0, "{operation:?} #{nth}");
        assert_eq!(entry_count(&store, b).await, 0, "{operation:?} #{nth}");
    }
}

#[tokio::test]
async fn test_failed_rollback_reports_both_errors() {
    let store = locking_store(false);
    let accounts = seed(&store, &[100, 50]).await;
    store.fail_at(Operation::CreateEntry, 2);
    store.fail_at(Operation::Rollback, 1);
    let service = TransferService::new(Arc::clone(&store));

    let err = service
        .transfer(
            &Context::background(),
            &TransferRequest::new(accounts[0].id, accounts[1].id, 30),
        )
        .await
        .unwrap_err();

    assert!(err.is_rollback_failure());
    assert_eq!(err.failed_step(), Some(TransferStep::CreateCreditEntry));
    let message = err.to_string();
    assert!(message.contains("tx err:"), "{message}");
    assert!(message.contains("rb err:"), "{message}");
}

#[tokio::test]
async fn test_unknown_account_is_rejected_atomically() {
    let store = locking_store(false);
    let accounts = seed(&store, &[100]).await;
    let service = TransferService::new(Arc::clone(&store));

    let err = service
        .transfer(
            &Context::background(),
            &TransferRequest::new(accounts[0].id, 999, 10),
        )
        .await
        .unwrap_err();

    assert!(err.failed_step().is_some());
    assert_eq!(balance(&store, accounts[0].id).await, 100);
    assert_eq!(transfer_count(&store).await, 0);
}

/// Hold the row lock of `id` in a separate transaction so transfers
/// touching it block at their balance update
async fn block_account(store: &MemoryStore, id: AccountId) -> impl TxQueries {
    let blocker = store.begin().await.unwrap();
    blocker
        .add_account_balance(&AddAccountBalanceParams { id, amount: 0 })
        .await
        .unwrap();
    blocker
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_waiting_rolls_back() {
    let store = Arc::new(MemoryStore::new());
    let accounts = seed(&store, &[100, 50]).await;
    let (a, b) = (accounts[0].id, accounts[1].id);
    let blocker = block_account(&store, a).await;

    let service = TransferService::new(Arc::clone(&store));
    let (ctx, handle) = Context::background().with_cancel();
    let task = tokio::spawn(async move {
        service
            .transfer(&ctx, &TransferRequest::new(b, a, 30))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err}");

    blocker.rollback().await.unwrap();
    assert_eq!(balance(&store, a).await, 100);
    assert_eq!(balance(&store, b).await, 50);
    assert_eq!(transfer_count(&store).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_while_waiting_rolls_back() {
    let store = Arc::new(MemoryStore::new());
    let accounts = seed(&store, &[100, 50]).await;
    let (a, b) = (accounts[0].id, accounts[1].id);
    let blocker = block_account(&store, b).await;

    let service = TransferService::new(Arc::clone(&store));
    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let err = service
        .transfer(&ctx, &TransferRequest::new(a, b, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded), "{err}");

    blocker.rollback().await.unwrap();

    // The lock was released by the rollback; the same transfer now succeeds
    let result = TransferService::new(Arc::clone(&store))
        .transfer(&Context::background(), &TransferRequest::new(a, b, 30))
        .await
        .unwrap();
    assert_eq!(result.from_account.balance, 70);
    assert_eq!(transfer_count(&store).await, 1);
}
