use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, SyncPhase};
use crate::jobs::account_sync_job::run_account_phase;
use crate::jobs::bill_sync_job::run_bill_phase;
use crate::jobs::transaction_sync_job::run_transaction_phase;
use crate::jobs::{check_partial, JobContext};

/// Full sync of one user: accounts, then transactions, then bills.
///
/// Phases never overlap and a phase that fails stops the pipeline:
///
/// 1. Accounts. Acts as the credential gate; any error here ends the job.
/// 2. Transactions, over the full history when phase 1 created accounts
///    (they have nothing stored locally yet), otherwise incrementally.
/// 3. Bills.
///
/// Record-level errors do not stop later phases; they are reported as a
/// `PartialFailure` of the earliest affected phase once all phases ran.
pub struct UserSyncJob {
    pub user_id: Uuid,
    ctx: JobContext,
}

impl UserSyncJob {
    pub fn new(ctx: JobContext, user_id: Uuid) -> Self {
        Self { user_id, ctx }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        let user_id = self.user_id;
        info!("🔄 Starting full sync for user {}", user_id);

        let accounts = run_account_phase(&self.ctx, cancel, user_id).await?;
        ensure_not_cancelled(cancel, user_id)?;

        let full_history = accounts.created > 0;
        let transactions = run_transaction_phase(&self.ctx, cancel, user_id, full_history).await?;
        ensure_not_cancelled(cancel, user_id)?;

        let bills = run_bill_phase(&self.ctx, cancel, user_id).await?;

        info!(
            "✅ Full sync for user {} done: accounts +{}, transactions +{} ~{}, bills +{}",
            user_id, accounts.created, transactions.created, transactions.updated, bills.created
        );

        check_partial(SyncPhase::Accounts, user_id, &accounts.errors)?;
        check_partial(SyncPhase::Transactions, user_id, &transactions.errors)?;
        check_partial(SyncPhase::Bills, user_id, &bills.errors)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken, user_id: Uuid) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled(format!("full sync for user {}", user_id)));
    }
    Ok(())
}
