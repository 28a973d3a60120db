pub mod account_sync_service;
pub mod bill_payment_check_service;
pub mod bill_sync_service;
pub mod credential_service;
pub mod duplicate_check_service;
pub mod notification_service;
pub mod rate_limiter;
pub mod reconciliation;
pub mod scheduler_service;
pub mod transaction_sync_service;
pub mod worker_pool;

use std::future::Future;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::User;
use crate::store::UserStore;

/// Resolves `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, what: &str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled(what.to_string())),
        result = fut => result,
    }
}

/// Loads a user together with the stored provider credential.
pub(crate) async fn load_syncable_user(users: &dyn UserStore, user_id: Uuid) -> Result<(User, String), AppError> {
    let user = users
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

    let credential = user
        .provider_credential
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("user {} has no provider credential", user_id)))?;

    Ok((user, credential))
}
