//! Sync Jobs Module
//!
//! Units of work executed by the worker pool. Every job targets exactly one
//! user and is dropped after it ran once; the pool never retries.
//!
//! # Available Jobs
//!
//! - `account_sync_job` - Imports accounts; doubles as the credential check
//! - `transaction_sync_job` - Imports transactions in incremental mode
//! - `bill_sync_job` - Imports credit-card bills
//! - `user_sync_job` - Runs the three phases above in order for one user
//!
//! # Error reporting
//!
//! - A rejected provider credential ends the job with `SyncAborted`.
//! - Any other phase error ends it with `PhaseFailed`.
//! - A phase that finished with per-record errors yields `PartialFailure`,
//!   after all remaining phases ran; the committed work is kept.

pub mod account_sync_job;
pub mod bill_sync_job;
pub mod transaction_sync_job;
pub mod user_sync_job;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::errors::{AppError, SyncPhase};
use crate::observability::{PhaseOutcome, PhaseTimer, SyncTelemetry};
use crate::services::account_sync_service::AccountSyncer;
use crate::services::bill_sync_service::BillSyncer;
use crate::services::transaction_sync_service::TransactionSyncer;

pub use account_sync_job::AccountSyncJob;
pub use bill_sync_job::BillSyncJob;
pub use transaction_sync_job::TransactionSyncJob;
pub use user_sync_job::UserSyncJob;

// Collaborators handed to every job.
#[derive(Clone)]
pub struct JobContext {
    pub accounts: Arc<dyn AccountSyncer>,
    pub transactions: Arc<dyn TransactionSyncer>,
    pub bills: Arc<dyn BillSyncer>,
    pub telemetry: Arc<dyn SyncTelemetry>,
}

impl JobContext {
    pub fn account_job(&self, user_id: Uuid) -> SyncJob {
        SyncJob::Account(AccountSyncJob::new(self.clone(), user_id))
    }

    pub fn transaction_job(&self, user_id: Uuid) -> SyncJob {
        SyncJob::Transaction(TransactionSyncJob::new(self.clone(), user_id))
    }

    pub fn bill_job(&self, user_id: Uuid) -> SyncJob {
        SyncJob::Bill(BillSyncJob::new(self.clone(), user_id))
    }

    pub fn user_job(&self, user_id: Uuid) -> SyncJob {
        SyncJob::User(UserSyncJob::new(self.clone(), user_id))
    }
}

/// The closed set of jobs the pool knows how to run.
pub enum SyncJob {
    Account(AccountSyncJob),
    Transaction(TransactionSyncJob),
    Bill(BillSyncJob),
    User(UserSyncJob),
}

impl SyncJob {
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        match self {
            SyncJob::Account(job) => job.execute(cancel).await,
            SyncJob::Transaction(job) => job.execute(cancel).await,
            SyncJob::Bill(job) => job.execute(cancel).await,
            SyncJob::User(job) => job.execute(cancel).await,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            SyncJob::Account(job) => job.user_id,
            SyncJob::Transaction(job) => job.user_id,
            SyncJob::Bill(job) => job.user_id,
            SyncJob::User(job) => job.user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncJob::Account(_) => "account_sync",
            SyncJob::Transaction(_) => "transaction_sync",
            SyncJob::Bill(_) => "bill_sync",
            SyncJob::User(_) => "user_sync",
        }
    }

    pub fn description(&self) -> String {
        format!("{} for user {}", self.kind(), self.user_id())
    }
}

/// Closes the phase timer and classifies a failed phase.
///
/// A rejected credential becomes `SyncAborted`, anything else `PhaseFailed`.
pub(crate) fn finish_phase<T>(
    timer: PhaseTimer<'_>,
    phase: SyncPhase,
    user_id: Uuid,
    outcome: Result<T, AppError>,
    has_errors: impl Fn(&T) -> bool,
) -> Result<T, AppError> {
    match outcome {
        Ok(result) => {
            timer.finish(if has_errors(&result) {
                PhaseOutcome::PartiallyFailed
            } else {
                PhaseOutcome::Succeeded
            });
            Ok(result)
        }
        Err(e) if e.is_unauthorized() => {
            timer.finish(PhaseOutcome::Aborted);
            warn!("🔒 {} aborted for user {}: provider credential rejected", phase, user_id);
            Err(AppError::SyncAborted {
                phase,
                user_id,
                source: Box::new(e),
            })
        }
        Err(e) => {
            timer.finish(PhaseOutcome::Failed);
            error!("❌ {} failed for user {}: {}", phase, user_id, e);
            Err(AppError::PhaseFailed {
                phase,
                user_id,
                source: Box::new(e),
            })
        }
    }
}

/// `PartialFailure` when a finished phase collected record errors.
pub(crate) fn check_partial(phase: SyncPhase, user_id: Uuid, errors: &[String]) -> Result<(), AppError> {
    if errors.is_empty() {
        return Ok(());
    }
    for e in errors.iter().take(10) {
        warn!("{} record error for user {}: {}", phase, user_id, e);
    }
    Err(AppError::PartialFailure {
        phase,
        user_id,
        count: errors.len(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Counting fakes for the three sync collaborators.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::JobContext;
    use crate::errors::AppError;
    use crate::models::{BillSyncResult, SyncResult, TransactionSyncResult};
    use crate::observability::NoopTelemetry;
    use crate::services::account_sync_service::AccountSyncer;
    use crate::services::bill_sync_service::BillSyncer;
    use crate::services::transaction_sync_service::TransactionSyncer;

    #[derive(Default)]
    pub struct FakeSyncers {
        pub account_calls: AtomicUsize,
        pub transaction_calls: AtomicUsize,
        pub bill_calls: AtomicUsize,
        pub accounts_created: AtomicUsize,
        pub unauthorized: AtomicBool,
        pub fail_transactions: AtomicBool,
        pub account_errors: Mutex<Vec<String>>,
        pub full_history_requests: Mutex<Vec<bool>>,
        pub delay: Mutex<Duration>,
    }

    impl FakeSyncers {
        pub fn context(self: &Arc<Self>) -> JobContext {
            JobContext {
                accounts: self.clone(),
                transactions: self.clone(),
                bills: self.clone(),
                telemetry: Arc::new(NoopTelemetry),
            }
        }

        pub fn calls(&self) -> (usize, usize, usize) {
            (
                self.account_calls.load(Ordering::SeqCst),
                self.transaction_calls.load(Ordering::SeqCst),
                self.bill_calls.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl AccountSyncer for FakeSyncers {
        async fn sync_user_accounts(&self, _cancel: &CancellationToken, user_id: Uuid) -> Result<SyncResult, AppError> {
            self.account_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.unauthorized.load(Ordering::SeqCst) {
                return Err(AppError::ProviderUnauthorized);
            }
            let mut result = SyncResult::new(user_id);
            result.created = self.accounts_created.load(Ordering::SeqCst);
            result.found = result.created;
            result.errors = self.account_errors.lock().clone();
            Ok(result)
        }
    }

    #[async_trait]
    impl TransactionSyncer for FakeSyncers {
        async fn sync_user_transactions(
            &self,
            _cancel: &CancellationToken,
            user_id: Uuid,
            full_history: bool,
        ) -> Result<TransactionSyncResult, AppError> {
            self.transaction_calls.fetch_add(1, Ordering::SeqCst);
            self.full_history_requests.lock().push(full_history);
            if self.fail_transactions.load(Ordering::SeqCst) {
                return Err(AppError::External("provider returned 500".into()));
            }
            Ok(TransactionSyncResult::new(user_id, full_history))
        }
    }

    #[async_trait]
    impl BillSyncer for FakeSyncers {
        async fn sync_user_bills(&self, _cancel: &CancellationToken, user_id: Uuid) -> Result<BillSyncResult, AppError> {
            self.bill_calls.fetch_add(1, Ordering::SeqCst);
            Ok(BillSyncResult::new(user_id))
        }
    }
}
