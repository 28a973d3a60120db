use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::errors::{AppError, SyncPhase};
use crate::jobs::{check_partial, finish_phase, JobContext};
use crate::models::SyncResult;
use crate::observability::PhaseTimer;

/// Imports the user's accounts.
///
/// The account call is the first one made with the user's credential, so a
/// rejection here is reported as `SyncAborted`; the sync service has already
/// cleared the credential by then.
pub struct AccountSyncJob {
    pub user_id: Uuid,
    ctx: JobContext,
}

impl AccountSyncJob {
    pub fn new(ctx: JobContext, user_id: Uuid) -> Self {
        Self { user_id, ctx }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        let result = run_account_phase(&self.ctx, cancel, self.user_id).await?;
        check_partial(SyncPhase::Accounts, self.user_id, &result.errors)
    }
}

pub(crate) async fn run_account_phase(
    ctx: &JobContext,
    cancel: &CancellationToken,
    user_id: Uuid,
) -> Result<SyncResult, AppError> {
    let (timer, span) = PhaseTimer::start(ctx.telemetry.as_ref(), SyncPhase::Accounts, user_id);
    let outcome = ctx
        .accounts
        .sync_user_accounts(cancel, user_id)
        .instrument(span)
        .await;

    let result = finish_phase(timer, SyncPhase::Accounts, user_id, outcome, SyncResult::has_errors)?;
    info!(
        "🏦 account_sync user={} found={} created={} updated={} skipped={} errors={}",
        user_id,
        result.found,
        result.created,
        result.updated,
        result.skipped,
        result.errors.len()
    );
    Ok(result)
}
