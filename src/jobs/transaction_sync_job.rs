use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::errors::{AppError, SyncPhase};
use crate::jobs::{check_partial, finish_phase, JobContext};
use crate::models::TransactionSyncResult;
use crate::observability::PhaseTimer;

/// Standalone transaction import, always over the incremental window.
pub struct TransactionSyncJob {
    pub user_id: Uuid,
    ctx: JobContext,
}

impl TransactionSyncJob {
    pub fn new(ctx: JobContext, user_id: Uuid) -> Self {
        Self { user_id, ctx }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        let result = run_transaction_phase(&self.ctx, cancel, self.user_id, false).await?;
        check_partial(SyncPhase::Transactions, self.user_id, &result.errors)
    }
}

pub(crate) async fn run_transaction_phase(
    ctx: &JobContext,
    cancel: &CancellationToken,
    user_id: Uuid,
    full_history: bool,
) -> Result<TransactionSyncResult, AppError> {
    let (timer, span) = PhaseTimer::start(ctx.telemetry.as_ref(), SyncPhase::Transactions, user_id);
    let outcome = ctx
        .transactions
        .sync_user_transactions(cancel, user_id, full_history)
        .instrument(span)
        .await;

    let result = finish_phase(
        timer,
        SyncPhase::Transactions,
        user_id,
        outcome,
        TransactionSyncResult::has_errors,
    )?;
    info!(
        "💸 transaction_sync user={} full_history={} found={} created={} updated={} skipped={} duplicates={} bill_payments={} errors={}",
        user_id,
        result.full_history,
        result.found,
        result.created,
        result.updated,
        result.skipped,
        result.duplicates_marked,
        result.bill_payments_marked,
        result.errors.len()
    );
    Ok(result)
}
