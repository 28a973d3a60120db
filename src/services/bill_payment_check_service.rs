//! Bill payment detection.
//!
//! A transaction on a credit-card account whose absolute amount equals a bill
//! of that account, due within five days either side, is the payment of that
//! bill. Counting it would double the spending already itemised on the card,
//! so the transaction is set to not considered with an explanatory note.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{BillMatchCriteria, BillPaymentCheckResult, Exclusion, Transaction};
use crate::services::reconciliation::{Reconciler, TransactionCheck};
use crate::store::{BillStore, TransactionStore};

pub const BILL_PAYMENT_WINDOW_HOURS: i64 = 120;
pub const BILL_PAYMENT_MARKER: &str = "Pagamento de fatura";
pub const BILL_PAYMENT_NOTE: &str = "Pagamento de fatura de cartão de crédito - desconsiderada";

const BILL_PAYMENT_EXCLUSION: Exclusion = Exclusion {
    note: BILL_PAYMENT_NOTE,
    skip_markers: &[BILL_PAYMENT_MARKER],
};

pub fn bill_match_criteria(transaction: &Transaction) -> BillMatchCriteria {
    let window = Duration::hours(BILL_PAYMENT_WINDOW_HOURS);
    BillMatchCriteria {
        account_id: transaction.account_id,
        amount: transaction.amount.abs(),
        date_from: transaction.transaction_date - window,
        date_to: transaction.transaction_date + window,
    }
}

pub struct BillPaymentCheck {
    transactions: Arc<dyn TransactionStore>,
    bills: Arc<dyn BillStore>,
}

#[async_trait]
impl TransactionCheck for BillPaymentCheck {
    fn name(&self) -> &'static str {
        "bill_payment_check"
    }

    async fn check(&self, transaction: &Transaction) -> BillPaymentCheckResult {
        let mut result = BillPaymentCheckResult::default();

        // Already excluded, or owned by the user: not ours to decide.
        if !transaction.considered || transaction.manipulated {
            return result;
        }
        result.checked = 1;

        let bill = match self.bills.find_matching_bill(&bill_match_criteria(transaction)).await {
            Ok(Some(bill)) => bill,
            Ok(None) => return result,
            Err(e) => {
                warn!("Failed to search bills for transaction {}: {}", transaction.id, e);
                result
                    .errors
                    .push(format!("transaction {}: bill search failed: {}", transaction.id, e));
                return result;
            }
        };

        result.found = 1;

        match self.transactions.exclude(transaction.id, &BILL_PAYMENT_EXCLUSION).await {
            Ok(true) => {
                result.marked = 1;
                info!(
                    "💳 Transaction {} flagged as payment of bill {} (due {})",
                    transaction.id,
                    bill.id,
                    bill.due_date.format("%Y-%m-%d")
                );
            }
            Ok(false) => debug!("Transaction {} already flagged as bill payment", transaction.id),
            Err(e) => {
                warn!("Failed to flag bill payment {}: {}", transaction.id, e);
                result
                    .errors
                    .push(format!("transaction {}: failed to flag bill payment: {}", transaction.id, e));
            }
        }

        result
    }
}

/// Finds and flags credit-card bill payments. Cheap to clone.
#[derive(Clone)]
pub struct BillPaymentCheckService {
    reconciler: Reconciler<BillPaymentCheck>,
}

impl BillPaymentCheckService {
    pub fn new(transactions: Arc<dyn TransactionStore>, bills: Arc<dyn BillStore>, workers: usize) -> Self {
        let check = BillPaymentCheck {
            transactions: transactions.clone(),
            bills,
        };
        Self {
            reconciler: Reconciler::new(check, transactions, workers),
        }
    }

    pub fn workers(&self) -> usize {
        self.reconciler.workers()
    }

    pub async fn check_transaction(&self, transaction: &Transaction) -> BillPaymentCheckResult {
        self.reconciler.check_one(transaction).await
    }

    pub async fn check_batch(
        &self,
        cancel: &CancellationToken,
        transactions: Vec<Transaction>,
    ) -> BillPaymentCheckResult {
        self.reconciler.check_batch(cancel, transactions).await
    }

    pub async fn check_batch_with_limit(
        &self,
        cancel: &CancellationToken,
        transactions: Vec<Transaction>,
        max_concurrent: usize,
    ) -> BillPaymentCheckResult {
        self.reconciler
            .check_batch_with_limit(cancel, transactions, max_concurrent)
            .await
    }

    pub async fn check_user_history(&self, cancel: &CancellationToken, user_id: Uuid) -> BillPaymentCheckResult {
        self.reconciler.check_user_history(cancel, user_id).await
    }

    pub async fn check_users_history(
        &self,
        cancel: &CancellationToken,
        user_ids: Vec<Uuid>,
    ) -> HashMap<Uuid, BillPaymentCheckResult> {
        self.reconciler.check_users_history(cancel, user_ids).await
    }
}
