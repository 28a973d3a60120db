use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::external::provider::{FinancialDataProvider, ProviderAccount};
use crate::models::{amount_from_provider, SyncResult, UpsertAccount};
use crate::services::credential_service::CredentialInvalidator;
use crate::services::{load_syncable_user, until_cancelled};
use crate::store::{AccountStore, UserStore};

/// Imports a user's accounts from the provider.
///
/// A rejected credential is invalidated before the error is returned, so
/// callers only have to stop; they never clean up.
#[async_trait]
pub trait AccountSyncer: Send + Sync {
    async fn sync_user_accounts(&self, cancel: &CancellationToken, user_id: Uuid) -> Result<SyncResult, AppError>;
}

pub struct AccountSyncService {
    provider: Arc<dyn FinancialDataProvider>,
    users: Arc<dyn UserStore>,
    accounts: Arc<dyn AccountStore>,
    invalidator: CredentialInvalidator,
}

impl AccountSyncService {
    pub fn new(
        provider: Arc<dyn FinancialDataProvider>,
        users: Arc<dyn UserStore>,
        accounts: Arc<dyn AccountStore>,
        invalidator: CredentialInvalidator,
    ) -> Self {
        Self {
            provider,
            users,
            accounts,
            invalidator,
        }
    }
}

pub fn to_upsert_account(user_id: Uuid, account: ProviderAccount) -> UpsertAccount {
    UpsertAccount {
        user_id,
        provider_account_id: account.id,
        name: account.name.trim().to_string(),
        account_type: account.account_type.to_ascii_uppercase(),
        subtype: account.subtype.to_ascii_uppercase(),
        number: account.number,
        balance: amount_from_provider(account.balance),
        currency_code: account.currency_code,
    }
}

#[async_trait]
impl AccountSyncer for AccountSyncService {
    async fn sync_user_accounts(&self, cancel: &CancellationToken, user_id: Uuid) -> Result<SyncResult, AppError> {
        let (user, credential) = load_syncable_user(self.users.as_ref(), user_id).await?;

        let fetched = until_cancelled(cancel, "account fetch", async {
            self.provider
                .fetch_accounts(&credential)
                .await
                .map_err(AppError::from)
        })
        .await;

        let provider_accounts = match fetched {
            Ok(accounts) => accounts,
            Err(AppError::ProviderUnauthorized) => {
                self.invalidator.invalidate(&user).await;
                return Err(AppError::ProviderUnauthorized);
            }
            Err(e) => return Err(e),
        };

        let mut result = SyncResult::new(user_id);
        result.found = provider_accounts.len();

        for provider_account in provider_accounts {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled(format!("account sync for user {}", user_id)));
            }

            let provider_id = provider_account.id.clone();
            match self.accounts.upsert(to_upsert_account(user_id, provider_account)).await {
                Ok((_, outcome)) => result.record(outcome),
                Err(e) => {
                    warn!("Failed to upsert account {} for user {}: {}", provider_id, user_id, e);
                    result.errors.push(format!("account {}: {}", provider_id, e));
                }
            }
        }

        info!(
            "🏦 Accounts for user {}: found={} created={} updated={} skipped={} errors={}",
            user_id,
            result.found,
            result.created,
            result.updated,
            result.skipped,
            result.errors.len()
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::Page;
    use crate::testing::{provider_account, user_with_credential, FakeProvider};

    fn service(provider: Arc<FakeProvider>, store: Arc<MemoryStore>) -> AccountSyncService {
        AccountSyncService::new(
            provider,
            store.clone(),
            store.clone(),
            CredentialInvalidator::new(store, None),
        )
    }

    #[tokio::test]
    async fn test_first_sync_creates_then_second_skips() {
        let store = Arc::new(MemoryStore::new());
        let user = user_with_credential();
        store.insert_user(user.clone());
        let provider = Arc::new(
            FakeProvider::new()
                .with_account(provider_account("acc-1", "Conta Corrente", "BANK"))
                .with_account(provider_account("acc-2", "Cartão Gold", "CREDIT")),
        );
        let service = service(provider, store.clone());
        let cancel = CancellationToken::new();

        let first = service.sync_user_accounts(&cancel, user.id).await.unwrap();
        assert_eq!((first.found, first.created, first.skipped), (2, 2, 0));

        let second = service.sync_user_accounts(&cancel, user.id).await.unwrap();
        assert_eq!((second.found, second.created, second.skipped), (2, 0, 2));

        let stored = AccountStore::list_by_user(store.as_ref(), user.id, Page::all())
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|a| a.is_credit_card()));
    }

    #[tokio::test]
    async fn test_unauthorized_clears_credential() {
        let store = Arc::new(MemoryStore::new());
        let user = user_with_credential();
        store.insert_user(user.clone());
        let provider = Arc::new(FakeProvider::new());
        provider.reject_credentials();

        let err = service(provider, store.clone())
            .sync_user_accounts(&CancellationToken::new(), user.id)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ProviderUnauthorized));
        assert!(!store.user(user.id).unwrap().has_credential());
    }

    #[tokio::test]
    async fn test_user_without_credential_is_rejected_without_calling_provider() {
        let store = Arc::new(MemoryStore::new());
        let mut user = user_with_credential();
        user.provider_credential = None;
        store.insert_user(user.clone());
        let provider = Arc::new(FakeProvider::new());

        let err = service(provider.clone(), store)
            .sync_user_accounts(&CancellationToken::new(), user.id)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(provider.account_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let store = Arc::new(MemoryStore::new());
        let user = user_with_credential();
        store.insert_user(user.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service(Arc::new(FakeProvider::new()), store)
            .sync_user_accounts(&cancel, user.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled(_)));
    }
}
