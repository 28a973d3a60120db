//! Concurrency machinery shared by the reconciliation passes.
//!
//! A pass is a [`TransactionCheck`]: given one transaction it searches for a
//! counterpart and possibly flags a record, returning the counters for that
//! single transaction. [`Reconciler`] runs a check over many transactions in
//! one of two ways:
//!
//! - **Fixed pool** (`check_batch`): N persistent workers drain a closed job
//!   channel and push per-transaction results to a results channel that the
//!   caller folds once every worker is done.
//! - **Bounded semaphore** (`check_batch_with_limit`): one task per
//!   transaction, each waiting on a semaphore with a caller-chosen capacity,
//!   merging into a mutex-guarded accumulator.
//!
//! On top of those it offers a paginated full-history scan for one user and
//! a semaphore-bounded fan-out of that scan across many users.
//!
//! A failure on one transaction is recorded in the result and the pass moves
//! on; nothing here aborts a batch. No lock is held across a store call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{CheckResult, Transaction};
use crate::store::{Page, TransactionStore};

pub const DEFAULT_WORKERS: usize = 4;
pub const HISTORY_BATCH_SIZE: usize = 500;

/// One reconciliation rule applied to a single transaction.
#[async_trait]
pub trait TransactionCheck: Send + Sync + 'static {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Counters for this one transaction. `checked` is 0 when the
    /// transaction is not eligible for the rule.
    async fn check(&self, transaction: &Transaction) -> CheckResult;
}

pub fn normalize_workers(workers: usize) -> usize {
    if workers == 0 {
        DEFAULT_WORKERS
    } else {
        workers
    }
}

pub struct Reconciler<C: TransactionCheck> {
    check: Arc<C>,
    transactions: Arc<dyn TransactionStore>,
    workers: usize,
}

impl<C: TransactionCheck> Clone for Reconciler<C> {
    fn clone(&self) -> Self {
        Self {
            check: self.check.clone(),
            transactions: self.transactions.clone(),
            workers: self.workers,
        }
    }
}

impl<C: TransactionCheck> Reconciler<C> {
    pub fn new(check: C, transactions: Arc<dyn TransactionStore>, workers: usize) -> Self {
        Self {
            check: Arc::new(check),
            transactions,
            workers: normalize_workers(workers),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn check_one(&self, transaction: &Transaction) -> CheckResult {
        self.check.check(transaction).await
    }

    /// Fixed worker-pool strategy.
    pub async fn check_batch(&self, cancel: &CancellationToken, transactions: Vec<Transaction>) -> CheckResult {
        let mut total = CheckResult::default();
        if transactions.is_empty() {
            return total;
        }

        let count = transactions.len();
        let workers = self.workers.min(count);

        let (job_tx, job_rx) = mpsc::channel::<Transaction>(count);
        let (result_tx, mut result_rx) = mpsc::channel::<CheckResult>(count);

        for transaction in transactions {
            if job_tx.send(transaction).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let check = self.check.clone();
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = job_rx.lock().await.recv().await;
                    let Some(transaction) = next else { break };

                    let result = check.check(&transaction).await;
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        while let Some(result) = result_rx.recv().await {
            total.merge(result);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("{} worker crashed: {}", self.check.name(), e);
                total.errors.push(format!("{} worker crashed: {}", self.check.name(), e));
            }
        }

        total
    }

    /// Bounded-semaphore strategy: one task per transaction, at most
    /// `max_concurrent` running at once (0 means the service default).
    pub async fn check_batch_with_limit(
        &self,
        cancel: &CancellationToken,
        transactions: Vec<Transaction>,
        max_concurrent: usize,
    ) -> CheckResult {
        let semaphore = Arc::new(Semaphore::new(normalize_workers(max_concurrent)));
        let total = Arc::new(Mutex::new(CheckResult::default()));
        let mut tasks = JoinSet::new();

        for transaction in transactions {
            let semaphore = semaphore.clone();
            let check = self.check.clone();
            let total = total.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let result = check.check(&transaction).await;
                total.lock().merge(result);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("{} task crashed: {}", self.check.name(), e);
                total.lock().errors.push(format!("{} task crashed: {}", self.check.name(), e));
            }
        }

        let result = std::mem::take(&mut *total.lock());
        result
    }

    /// Runs the fixed-pool strategy over every transaction of `user_id`,
    /// [`HISTORY_BATCH_SIZE`] rows at a time.
    pub async fn check_user_history(&self, cancel: &CancellationToken, user_id: Uuid) -> CheckResult {
        let mut total = CheckResult::default();
        let mut offset = 0;
        let mut pages = 0;

        loop {
            if cancel.is_cancelled() {
                warn!(
                    "{} history scan for user {} cancelled after {} page(s)",
                    self.check.name(),
                    user_id,
                    pages
                );
                total
                    .errors
                    .push(format!("scan cancelled for user {} after {} page(s)", user_id, pages));
                break;
            }

            let page = match self
                .transactions
                .list_by_user(user_id, Page::new(HISTORY_BATCH_SIZE, offset))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!("{} history scan for user {} stopped: {}", self.check.name(), user_id, e);
                    total
                        .errors
                        .push(format!("failed to load transactions at offset {}: {}", offset, e));
                    break;
                }
            };
            pages += 1;

            let fetched = page.len();
            if fetched > 0 {
                total.merge(self.check_batch(cancel, page).await);
            }
            if fetched < HISTORY_BATCH_SIZE {
                break;
            }
            offset += fetched;
        }

        info!(
            "{} history scan for user {}: {} page(s), checked {}, found {}, marked {}, {} error(s)",
            self.check.name(),
            user_id,
            pages,
            total.checked,
            total.found,
            total.marked,
            total.errors.len()
        );

        total
    }

    /// One history scan per user, at most `workers` at a time.
    pub async fn check_users_history(
        &self,
        cancel: &CancellationToken,
        user_ids: Vec<Uuid>,
    ) -> HashMap<Uuid, CheckResult> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for user_id in user_ids {
            let semaphore = semaphore.clone();
            let reconciler = self.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let result = match permit {
                    Some(_permit) => reconciler.check_user_history(&cancel, user_id).await,
                    None => CheckResult {
                        errors: vec![format!("scan cancelled before it started for user {}", user_id)],
                        ..CheckResult::default()
                    },
                };
                (user_id, result)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((user_id, result)) => {
                    results.insert(user_id, result);
                }
                Err(e) => error!("{} user scan crashed: {}", self.check.name(), e),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionType;
    use crate::store::memory::MemoryStore;
    use bigdecimal::{BigDecimal, ToPrimitive};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Marks every transaction with an even amount; fails on amount 13.
    struct EvenAmountCheck {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl EvenAmountCheck {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TransactionCheck for EvenAmountCheck {
        fn name(&self) -> &'static str {
            "even_amount"
        }

        async fn check(&self, transaction: &Transaction) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut result = CheckResult { checked: 1, ..Default::default() };
            if transaction.amount == BigDecimal::from(13) {
                result.errors.push("unlucky".to_string());
            } else if transaction.amount.to_i64().map(|v| v % 2 == 0).unwrap_or(false) {
                result.found = 1;
                result.marked = 1;
            }
            result
        }
    }

    fn transaction(user_id: Uuid, amount: i64, minute: i64) -> Transaction {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Transaction {
            id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            user_id,
            provider_transaction_id: format!("p-{}", minute),
            description: "test".to_string(),
            amount: BigDecimal::from(amount),
            transaction_type: TransactionType::Debit,
            transaction_date: at,
            category: None,
            considered: true,
            manipulated: false,
            notes: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn batch(user_id: Uuid, n: i64) -> Vec<Transaction> {
        (0..n).map(|i| transaction(user_id, i, i)).collect()
    }

    #[test]
    fn test_non_positive_workers_fall_back_to_default() {
        let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(EvenAmountCheck::new(), store, 0);
        assert_eq!(reconciler.workers(), DEFAULT_WORKERS);
    }

    #[tokio::test]
    async fn test_fixed_pool_matches_sequential_counts() {
        let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore::new());
        let transactions = batch(Uuid::new_v4(), 40);

        let sequential = Reconciler::new(EvenAmountCheck::new(), store.clone(), 1);
        let mut expected = CheckResult::default();
        for tx in &transactions {
            expected.merge(sequential.check_one(tx).await);
        }

        let pooled = Reconciler::new(EvenAmountCheck::new(), store, 6);
        let result = pooled.check_batch(&CancellationToken::new(), transactions).await;

        assert_eq!(result.checked, 40);
        assert_eq!(result.checked, expected.checked);
        assert_eq!(result.found, expected.found);
        assert_eq!(result.marked, expected.marked);
        assert_eq!(result.errors.len(), expected.errors.len());
        assert_eq!(pooled.check.calls.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn test_semaphore_strategy_respects_limit() {
        let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(EvenAmountCheck::new(), store, 8);

        let result = reconciler
            .check_batch_with_limit(&CancellationToken::new(), batch(Uuid::new_v4(), 30), 3)
            .await;

        assert_eq!(result.checked, 30);
        assert_eq!(result.marked, 15);
        assert!(reconciler.check.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancelled_batch_does_no_work() {
        let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(EvenAmountCheck::new(), store, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let pooled = reconciler.check_batch(&cancel, batch(Uuid::new_v4(), 10)).await;
        let limited = reconciler.check_batch_with_limit(&cancel, batch(Uuid::new_v4(), 10), 2).await;

        assert_eq!(pooled.checked, 0);
        assert_eq!(limited.checked, 0);
        assert_eq!(reconciler.check.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_history_scan_pages_through_all_transactions() {
        let memory = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        for tx in batch(user_id, 1250) {
            memory.insert_transaction(tx);
        }
        // Another user's rows are never visited.
        for tx in batch(Uuid::new_v4(), 20) {
            memory.insert_transaction(tx);
        }

        let store: Arc<dyn TransactionStore> = memory.clone();
        let reconciler = Reconciler::new(EvenAmountCheck::new(), store, 8);
        let result = reconciler.check_user_history(&CancellationToken::new(), user_id).await;

        assert_eq!(memory.transaction_page_fetches(), 3);
        assert_eq!(result.checked, 1250);
        assert_eq!(result.marked, 625);
        assert_eq!(result.errors.len(), 1); // amount 13
    }

    #[tokio::test]
    async fn test_history_scan_stops_on_cancellation() {
        let memory = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        for tx in batch(user_id, 600) {
            memory.insert_transaction(tx);
        }

        let store: Arc<dyn TransactionStore> = memory.clone();
        let reconciler = Reconciler::new(EvenAmountCheck::new(), store, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconciler.check_user_history(&cancel, user_id).await;
        assert_eq!(memory.transaction_page_fetches(), 0);
        assert_eq!(result.checked, 0);
        assert!(result.errors[0].contains("cancelled"));
    }

    #[tokio::test]
    async fn test_users_history_returns_a_result_per_user() {
        let memory = Arc::new(MemoryStore::new());
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for user_id in &users {
            for tx in batch(*user_id, 10) {
                memory.insert_transaction(tx);
            }
        }

        let store: Arc<dyn TransactionStore> = memory.clone();
        let reconciler = Reconciler::new(EvenAmountCheck::new(), store, 2);
        let results = reconciler
            .check_users_history(&CancellationToken::new(), users.clone())
            .await;

        assert_eq!(results.len(), 5);
        for user_id in &users {
            assert_eq!(results[user_id].checked, 10);
            assert_eq!(results[user_id].marked, 5);
        }
    }

    #[tokio::test]
    async fn test_users_history_cancelled_users_report_reason() {
        let store: Arc<dyn TransactionStore> = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(EvenAmountCheck::new(), store, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let users = vec![Uuid::new_v4(), Uuid::new_v4()];
        let results = reconciler.check_users_history(&cancel, users.clone()).await;

        assert_eq!(results.len(), 2);
        for user_id in &users {
            assert!(results[user_id].errors[0].contains("cancelled"));
        }
    }
}
