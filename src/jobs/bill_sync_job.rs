use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::errors::{AppError, SyncPhase};
use crate::jobs::{check_partial, finish_phase, JobContext};
use crate::models::BillSyncResult;
use crate::observability::PhaseTimer;

/// Standalone bill import.
pub struct BillSyncJob {
    pub user_id: Uuid,
    ctx: JobContext,
}

impl BillSyncJob {
    pub fn new(ctx: JobContext, user_id: Uuid) -> Self {
        Self { user_id, ctx }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        let result = run_bill_phase(&self.ctx, cancel, self.user_id).await?;
        check_partial(SyncPhase::Bills, self.user_id, &result.errors)
    }
}

pub(crate) async fn run_bill_phase(
    ctx: &JobContext,
    cancel: &CancellationToken,
    user_id: Uuid,
) -> Result<BillSyncResult, AppError> {
    let (timer, span) = PhaseTimer::start(ctx.telemetry.as_ref(), SyncPhase::Bills, user_id);
    let outcome = ctx.bills.sync_user_bills(cancel, user_id).instrument(span).await;

    let result = finish_phase(timer, SyncPhase::Bills, user_id, outcome, BillSyncResult::has_errors)?;
    info!(
        "🧾 bill_sync user={} found={} created={} updated={} skipped={} errors={}",
        user_id,
        result.found,
        result.created,
        result.updated,
        result.skipped,
        result.errors.len()
    );
    Ok(result)
}
