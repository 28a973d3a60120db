//! Duplicate detection.
//!
//! After an import, each new or updated transaction T is compared against the
//! user's other transactions of the opposite type, the same absolute amount
//! and a date within 24 hours either way. Every such match M is a probable
//! second recording of the same economic event (a purchase and its reversal,
//! a card payment and the matching statement credit), so M is flagged as not
//! considered with an explanatory note.
//!
//! Matches already adjusted by a person or a rule (`manipulated`) are left
//! alone, and matches whose notes already carry the duplicate marker (or the
//! generic "desconsiderada" suffix) are skipped, which makes re-running the
//! pass harmless.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{DuplicateCheckResult, DuplicateCriteria, Exclusion, Transaction};
use crate::services::reconciliation::{Reconciler, TransactionCheck};
use crate::store::TransactionStore;

pub const DUPLICATE_WINDOW_HOURS: i64 = 24;
pub const DUPLICATE_MARKER: &str = "Possível duplicidade";
pub const DUPLICATE_NOTE: &str =
    "Possível duplicidade: lançamento de tipo oposto e mesmo valor em até 24h - desconsiderada";
pub const IGNORED_SUFFIX: &str = "desconsiderada";

const DUPLICATE_EXCLUSION: Exclusion = Exclusion {
    note: DUPLICATE_NOTE,
    skip_markers: &[DUPLICATE_MARKER, IGNORED_SUFFIX],
};

pub fn duplicate_criteria(transaction: &Transaction) -> DuplicateCriteria {
    let window = Duration::hours(DUPLICATE_WINDOW_HOURS);
    DuplicateCriteria {
        user_id: transaction.user_id,
        transaction_type: transaction.transaction_type.opposite(),
        amount: transaction.amount.abs(),
        date_from: transaction.transaction_date - window,
        date_to: transaction.transaction_date + window,
        exclude_id: transaction.id,
    }
}

pub struct DuplicateCheck {
    transactions: Arc<dyn TransactionStore>,
}

#[async_trait]
impl TransactionCheck for DuplicateCheck {
    fn name(&self) -> &'static str {
        "duplicate_check"
    }

    async fn check(&self, transaction: &Transaction) -> DuplicateCheckResult {
        let mut result = DuplicateCheckResult {
            checked: 1,
            ..Default::default()
        };

        let criteria = duplicate_criteria(transaction);
        let matches = match self.transactions.find_potential_duplicates(&criteria).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Failed to search duplicates for transaction {}: {}", transaction.id, e);
                result
                    .errors
                    .push(format!("transaction {}: duplicate search failed: {}", transaction.id, e));
                return result;
            }
        };

        result.found = matches.len();

        for candidate in matches {
            if !DUPLICATE_EXCLUSION.applies_to(&candidate) {
                debug!("Transaction {} manipulated or already flagged, skipping", candidate.id);
                continue;
            }

            // Another worker may flag the same row first; the store re-checks.
            match self.transactions.exclude(candidate.id, &DUPLICATE_EXCLUSION).await {
                Ok(true) => {
                    result.marked += 1;
                    info!(
                        "🔁 Transaction {} flagged as duplicate of {} ({} {})",
                        candidate.id, transaction.id, candidate.transaction_type, candidate.amount
                    );
                }
                Ok(false) => debug!("Transaction {} flagged concurrently, skipping", candidate.id),
                Err(e) => {
                    warn!("Failed to flag duplicate transaction {}: {}", candidate.id, e);
                    result
                        .errors
                        .push(format!("transaction {}: failed to flag duplicate: {}", candidate.id, e));
                }
            }
        }

        result
    }
}

/// Finds and flags probable duplicates. Cheap to clone.
#[derive(Clone)]
pub struct DuplicateCheckService {
    reconciler: Reconciler<DuplicateCheck>,
}

impl DuplicateCheckService {
    /// `workers` of 0 falls back to the default pool size.
    pub fn new(transactions: Arc<dyn TransactionStore>, workers: usize) -> Self {
        let check = DuplicateCheck {
            transactions: transactions.clone(),
        };
        Self {
            reconciler: Reconciler::new(check, transactions, workers),
        }
    }

    pub fn workers(&self) -> usize {
        self.reconciler.workers()
    }

    pub async fn check_transaction(&self, transaction: &Transaction) -> DuplicateCheckResult {
        self.reconciler.check_one(transaction).await
    }

    /// Checks a batch on the service's fixed worker pool.
    pub async fn check_batch(
        &self,
        cancel: &CancellationToken,
        transactions: Vec<Transaction>,
    ) -> DuplicateCheckResult {
        self.reconciler.check_batch(cancel, transactions).await
    }

    /// Checks a batch with one task per transaction, at most `max_concurrent` at a time.
    pub async fn check_batch_with_limit(
        &self,
        cancel: &CancellationToken,
        transactions: Vec<Transaction>,
        max_concurrent: usize,
    ) -> DuplicateCheckResult {
        self.reconciler
            .check_batch_with_limit(cancel, transactions, max_concurrent)
            .await
    }

    pub async fn check_user_history(&self, cancel: &CancellationToken, user_id: Uuid) -> DuplicateCheckResult {
        self.reconciler.check_user_history(cancel, user_id).await
    }

    pub async fn check_users_history(
        &self,
        cancel: &CancellationToken,
        user_ids: Vec<Uuid>,
    ) -> HashMap<Uuid, DuplicateCheckResult> {
        self.reconciler.check_users_history(cancel, user_ids).await
    }
}
