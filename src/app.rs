use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::{SchedulerConfig, WorkerPoolConfig};
use crate::errors::AppError;
use crate::models::CheckResult;
use crate::services::scheduler_service::{JobProvider, SchedulerService};
use crate::services::until_cancelled;
use crate::state::AppState;

/// One `UserSyncJob` for every user that still has a provider credential.
pub fn user_sync_job_provider(state: &AppState) -> JobProvider {
    let users = state.users.clone();
    let jobs = state.jobs.clone();

    Arc::new(move |cancel: CancellationToken| {
        let users = users.clone();
        let jobs = jobs.clone();
        async move {
            let listed = until_cancelled(&cancel, "user listing", users.list_users_with_credential()).await?;
            Ok(listed.into_iter().map(|user| jobs.user_job(user.id)).collect())
        }
        .boxed()
    })
}

pub fn create_scheduler(
    state: &AppState,
    scheduler: SchedulerConfig,
    pool: WorkerPoolConfig,
    cancel: &CancellationToken,
) -> Arc<SchedulerService> {
    SchedulerService::new(scheduler, pool, user_sync_job_provider(state), cancel)
}

#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub users: usize,
    pub duplicates: CheckResult,
    pub bill_payments: CheckResult,
    pub per_user: HashMap<Uuid, (CheckResult, CheckResult)>,
}

/// Full-history duplicate scan followed by the bill-payment scan, for every
/// user with a credential.
pub async fn reconcile_history(state: &AppState, cancel: &CancellationToken) -> Result<ReconciliationReport, AppError> {
    let user_ids: Vec<Uuid> = state
        .users
        .list_users_with_credential()
        .await?
        .into_iter()
        .map(|u| u.id)
        .collect();

    info!("🔍 Reconciling full history of {} users", user_ids.len());

    let mut duplicates = state.duplicates.check_users_history(cancel, user_ids.clone()).await;
    let mut bill_payments = state.bill_payments.check_users_history(cancel, user_ids.clone()).await;

    let mut report = ReconciliationReport {
        users: user_ids.len(),
        ..Default::default()
    };
    for user_id in user_ids {
        let duplicate = duplicates.remove(&user_id).unwrap_or_default();
        let bill_payment = bill_payments.remove(&user_id).unwrap_or_default();
        info!(
            "🔍 User {}: duplicates found={} marked={}, bill payments found={} marked={}, errors={}",
            user_id,
            duplicate.found,
            duplicate.marked,
            bill_payment.found,
            bill_payment.marked,
            duplicate.errors.len() + bill_payment.errors.len()
        );
        report.duplicates.merge(duplicate.clone());
        report.bill_payments.merge(bill_payment.clone());
        report.per_user.insert(user_id, (duplicate, bill_payment));
    }

    Ok(report)
}
