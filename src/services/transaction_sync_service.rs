//! Transaction import.
//!
//! For every provider account of the user the service resolves the local
//! account, pulls transactions since the start of the sync window, upserts
//! them and finally runs the duplicate and bill-payment passes over the rows
//! that were created or changed in this run.
//!
//! The provider may hand out new account ids after a reconnection, so a local
//! account is looked up by provider id first and by its `name|type|subtype`
//! key second. That lookup table is built once per run and dropped with it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SyncWindowConfig, MAX_SYNC_WINDOW_DAYS};
use crate::errors::AppError;
use crate::external::provider::{FinancialDataProvider, ProviderAccount, ProviderTransaction};
use crate::models::{
    account_matching_key, amount_from_provider, Account, Transaction, TransactionSyncResult,
    TransactionType, UpsertOutcome, UpsertTransaction,
};
use crate::services::bill_payment_check_service::BillPaymentCheckService;
use crate::services::credential_service::CredentialInvalidator;
use crate::services::duplicate_check_service::DuplicateCheckService;
use crate::services::{load_syncable_user, until_cancelled};
use crate::store::{AccountStore, Page, TransactionStore, UserStore};

#[async_trait]
pub trait TransactionSyncer: Send + Sync {
    /// `full_history` widens the window from the incremental days to the
    /// backfill days.
    async fn sync_user_transactions(
        &self,
        cancel: &CancellationToken,
        user_id: Uuid,
        full_history: bool,
    ) -> Result<TransactionSyncResult, AppError>;
}

pub struct TransactionSyncService {
    provider: Arc<dyn FinancialDataProvider>,
    users: Arc<dyn UserStore>,
    accounts: Arc<dyn AccountStore>,
    transactions: Arc<dyn TransactionStore>,
    duplicates: DuplicateCheckService,
    bill_payments: BillPaymentCheckService,
    invalidator: CredentialInvalidator,
    window: SyncWindowConfig,
}

/// Local accounts of one user, indexed for the current run only.
struct AccountCache {
    by_provider_id: HashMap<String, Account>,
    by_key: HashMap<String, Account>,
}

impl AccountCache {
    fn new(accounts: Vec<Account>) -> Self {
        let mut by_provider_id = HashMap::with_capacity(accounts.len());
        let mut by_key = HashMap::with_capacity(accounts.len());
        for account in accounts {
            by_key.insert(account.matching_key(), account.clone());
            by_provider_id.insert(account.provider_account_id.clone(), account);
        }
        Self { by_provider_id, by_key }
    }

    fn resolve(&self, provider_account: &ProviderAccount) -> Option<&Account> {
        self.by_provider_id.get(&provider_account.id).or_else(|| {
            let key = account_matching_key(
                provider_account.name.trim(),
                &provider_account.account_type.to_ascii_uppercase(),
                &provider_account.subtype.to_ascii_uppercase(),
            );
            self.by_key.get(&key)
        })
    }
}

impl TransactionSyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn FinancialDataProvider>,
        users: Arc<dyn UserStore>,
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        duplicates: DuplicateCheckService,
        bill_payments: BillPaymentCheckService,
        invalidator: CredentialInvalidator,
        window: SyncWindowConfig,
    ) -> Self {
        Self {
            provider,
            users,
            accounts,
            transactions,
            duplicates,
            bill_payments,
            invalidator,
            window,
        }
    }

    /// Window lengths are clamped to `0..=MAX_SYNC_WINDOW_DAYS`.
    pub fn window_start(&self, today: NaiveDate, full_history: bool) -> NaiveDate {
        let days = if full_history {
            self.window.full_history_days
        } else {
            self.window.incremental_days
        };
        let days = days.clamp(0, MAX_SYNC_WINDOW_DAYS);
        today.checked_sub_signed(Duration::days(days)).unwrap_or(NaiveDate::MIN)
    }

    async fn run_reconciliation(
        &self,
        cancel: &CancellationToken,
        touched: Vec<Transaction>,
        result: &mut TransactionSyncResult,
    ) {
        if touched.is_empty() {
            return;
        }

        let duplicates = self.duplicates.check_batch(cancel, touched.clone()).await;
        result.duplicates_marked = duplicates.marked;
        result.errors.extend(duplicates.errors);

        // The duplicate pass may have excluded some of these rows; judge the current state.
        let mut current = Vec::with_capacity(touched.len());
        for transaction in touched {
            match self.transactions.get_by_id(transaction.id).await {
                Ok(Some(fresh)) => current.push(fresh),
                Ok(None) => {}
                Err(e) => result
                    .errors
                    .push(format!("transaction {}: reload failed: {}", transaction.id, e)),
            }
        }

        let bill_payments = self.bill_payments.check_batch(cancel, current).await;
        result.bill_payments_marked = bill_payments.marked;
        result.errors.extend(bill_payments.errors);
    }
}

fn to_upsert_transaction(account: &Account, transaction: ProviderTransaction) -> Result<UpsertTransaction, String> {
    let transaction_type: TransactionType = transaction.transaction_type.parse()?;
    if !transaction.amount.is_finite() {
        return Err(format!("amount {} is not a number", transaction.amount));
    }

    Ok(UpsertTransaction {
        account_id: account.id,
        user_id: account.user_id,
        provider_transaction_id: transaction.id,
        description: transaction.description.trim().to_string(),
        amount: amount_from_provider(transaction.amount),
        transaction_type,
        transaction_date: transaction.date,
        category: transaction.category,
    })
}

#[async_trait]
impl TransactionSyncer for TransactionSyncService {
    async fn sync_user_transactions(
        &self,
        cancel: &CancellationToken,
        user_id: Uuid,
        full_history: bool,
    ) -> Result<TransactionSyncResult, AppError> {
        let (user, credential) = load_syncable_user(self.users.as_ref(), user_id).await?;
        let since = self.window_start(Utc::now().date_naive(), full_history);
        let mut result = TransactionSyncResult::new(user_id, full_history);

        let fetched = until_cancelled(cancel, "account list", async {
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

        let cache = AccountCache::new(self.accounts.list_by_user(user_id, Page::all()).await?);
        let mut touched = Vec::new();

        info!(
            "💸 Syncing transactions for user {} since {} ({} accounts, full_history={})",
            user_id,
            since,
            provider_accounts.len(),
            full_history
        );

        for provider_account in &provider_accounts {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled(format!("transaction sync for user {}", user_id)));
            }

            let Some(account) = cache.resolve(provider_account) else {
                warn!(
                    "No local account for provider account {} of user {}",
                    provider_account.id, user_id
                );
                result
                    .errors
                    .push(format!("provider account {}: not imported yet", provider_account.id));
                continue;
            };

            let fetched = until_cancelled(cancel, "transaction fetch", async {
                self.provider
                    .fetch_transactions(&credential, &provider_account.id, since)
                    .await
                    .map_err(AppError::from)
            })
            .await;

            let provider_transactions = match fetched {
                Ok(list) => list,
                Err(AppError::ProviderUnauthorized) => {
                    self.invalidator.invalidate(&user).await;
                    return Err(AppError::ProviderUnauthorized);
                }
                Err(e @ AppError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    warn!("Failed to fetch transactions of account {}: {}", provider_account.id, e);
                    result
                        .errors
                        .push(format!("provider account {}: {}", provider_account.id, e));
                    continue;
                }
            };

            debug!(
                "Account {}: {} transactions from provider",
                account.id,
                provider_transactions.len()
            );
            result.found += provider_transactions.len();

            for provider_transaction in provider_transactions {
                let provider_id = provider_transaction.id.clone();
                let input = match to_upsert_transaction(account, provider_transaction) {
                    Ok(input) => input,
                    Err(e) => {
                        result.errors.push(format!("transaction {}: {}", provider_id, e));
                        continue;
                    }
                };

                match self.transactions.upsert(input).await {
                    Ok((transaction, outcome)) => {
                        result.record(outcome);
                        if outcome != UpsertOutcome::Unchanged {
                            touched.push(transaction);
                        }
                    }
                    Err(e) => {
                        warn!("Failed to upsert transaction {}: {}", provider_id, e);
                        result.errors.push(format!("transaction {}: {}", provider_id, e));
                    }
                }
            }
        }

        self.run_reconciliation(cancel, touched, &mut result).await;

        info!(
            "💸 Transactions for user {}: found={} created={} updated={} skipped={} duplicates={} bill_payments={} errors={}",
            user_id,
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bill, UpsertAccount};
    use crate::store::memory::MemoryStore;
    use crate::testing::{provider_account, provider_transaction, user_with_credential, FakeProvider};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    struct Fixture {
        store: Arc<MemoryStore>,
        provider: Arc<FakeProvider>,
        service: TransactionSyncService,
        user_id: Uuid,
    }

    async fn fixture(provider: FakeProvider, local_accounts: &[(&str, &str, &str)]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = user_with_credential();
        store.insert_user(user.clone());

        for (provider_id, name, account_type) in local_accounts {
            let account = provider_account(provider_id, name, account_type);
            AccountStore::upsert(
                store.as_ref(),
                UpsertAccount {
                    user_id: user.id,
                    provider_account_id: account.id,
                    name: account.name,
                    account_type: account.account_type,
                    subtype: account.subtype,
                    number: account.number,
                    balance: BigDecimal::from(0),
                    currency_code: account.currency_code,
                },
            )
            .await
            .unwrap();
        }

        let provider = Arc::new(provider);
        let service = TransactionSyncService::new(
            provider.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            DuplicateCheckService::new(store.clone(), 2),
            BillPaymentCheckService::new(store.clone(), store.clone(), 2),
            CredentialInvalidator::new(store.clone(), None),
            SyncWindowConfig::default(),
        );

        Fixture {
            store,
            provider,
            service,
            user_id: user.id,
        }
    }

    fn days_ago(days: i64) -> chrono::DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }

    #[tokio::test]
    async fn test_window_start() {
        let f = fixture(FakeProvider::new(), &[]).await;
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(f.service.window_start(today, false), NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
        assert_eq!(f.service.window_start(today, true), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
    }

    #[tokio::test]
    async fn test_oversized_window_is_clamped() {
        let mut f = fixture(FakeProvider::new(), &[]).await;
        f.service.window = SyncWindowConfig {
            incremental_days: -5,
            full_history_days: i64::MAX / 100_000,
        };
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(f.service.window_start(today, false), today);
        assert_eq!(
            f.service.window_start(today, true),
            today - Duration::days(MAX_SYNC_WINDOW_DAYS)
        );
    }

    #[tokio::test]
    async fn test_imports_and_flags_duplicates() {
        let provider = FakeProvider::new()
            .with_account(provider_account("acc-1", "Conta", "BANK"))
            .with_transaction(provider_transaction("t1", "acc-1", -80.0, "DEBIT", days_ago(2)))
            .with_transaction(provider_transaction("t2", "acc-1", 80.0, "CREDIT", days_ago(2)))
            .with_transaction(provider_transaction("t3", "acc-1", -12.5, "DEBIT", days_ago(1)));
        let f = fixture(provider, &[("acc-1", "Conta", "BANK")]).await;
        let cancel = CancellationToken::new();

        let result = f.service.sync_user_transactions(&cancel, f.user_id, false).await.unwrap();

        assert_eq!((result.found, result.created, result.skipped), (3, 3, 0));
        // t1 and t2 flag each other.
        assert_eq!(result.duplicates_marked, 2);
        assert!(result.errors.is_empty());

        let again = f.service.sync_user_transactions(&cancel, f.user_id, false).await.unwrap();
        assert_eq!((again.created, again.skipped, again.duplicates_marked), (0, 3, 0));
    }

    #[tokio::test]
    async fn test_incremental_window_skips_old_rows_full_history_includes_them() {
        let provider = FakeProvider::new()
            .with_account(provider_account("acc-1", "Conta", "BANK"))
            .with_transaction(provider_transaction("recent", "acc-1", -10.0, "DEBIT", days_ago(1)))
            .with_transaction(provider_transaction("old", "acc-1", -20.0, "DEBIT", days_ago(90)));
        let f = fixture(provider, &[("acc-1", "Conta", "BANK")]).await;
        let cancel = CancellationToken::new();

        let incremental = f.service.sync_user_transactions(&cancel, f.user_id, false).await.unwrap();
        assert_eq!(incremental.created, 1);

        let full = f.service.sync_user_transactions(&cancel, f.user_id, true).await.unwrap();
        assert!(full.full_history);
        assert_eq!((full.created, full.skipped), (1, 1));
        assert_eq!(
            *f.provider.last_since.lock(),
            Some(Utc::now().date_naive() - Duration::days(365))
        );
    }

    #[tokio::test]
    async fn test_reconnected_account_is_matched_by_name_type_subtype() {
        let provider = FakeProvider::new()
            .with_account(provider_account("new-id", "Conta", "BANK"))
            .with_transaction(provider_transaction("t1", "new-id", -10.0, "DEBIT", days_ago(1)));
        let f = fixture(provider, &[("old-id", "Conta", "BANK")]).await;

        let result = f
            .service
            .sync_user_transactions(&CancellationToken::new(), f.user_id, false)
            .await
            .unwrap();

        assert_eq!(result.created, 1);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_record_errors_do_not_stop_the_run() {
        let provider = FakeProvider::new()
            .with_account(provider_account("acc-1", "Conta", "BANK"))
            .with_account(provider_account("acc-2", "Poupança", "BANK"))
            .with_account(provider_account("unknown", "Outra", "BANK"))
            .with_transaction(provider_transaction("bad", "acc-1", -10.0, "TRANSFER", days_ago(1)))
            .with_transaction(provider_transaction("good", "acc-1", -11.0, "DEBIT", days_ago(1)));
        provider.fail_account("acc-2");
        let f = fixture(provider, &[("acc-1", "Conta", "BANK"), ("acc-2", "Poupança", "BANK")]).await;

        let result = f
            .service
            .sync_user_transactions(&CancellationToken::new(), f.user_id, false)
            .await
            .unwrap();

        assert_eq!(result.created, 1);
        // Bad type, failing account, unknown account.
        assert_eq!(result.errors.len(), 3);
    }

    #[tokio::test]
    async fn test_bill_payment_flagged_after_import() {
        let provider = FakeProvider::new()
            .with_account(provider_account("card", "Cartão", "CREDIT"))
            .with_transaction(provider_transaction("pay", "card", 150.0, "CREDIT", days_ago(1)));
        let f = fixture(provider, &[("card", "Cartão", "CREDIT")]).await;

        let card = AccountStore::list_by_user(f.store.as_ref(), f.user_id, Page::all())
            .await
            .unwrap()
            .remove(0);
        let now = Utc::now();
        f.store.insert_bill(Bill {
            id: Uuid::new_v4(),
            account_id: card.id,
            user_id: f.user_id,
            provider_bill_id: "bill-1".to_string(),
            due_date: now,
            total_amount: BigDecimal::from_str("150.00").unwrap(),
            minimum_payment: None,
            currency_code: "BRL".to_string(),
            created_at: now,
            updated_at: now,
        });

        let result = f
            .service
            .sync_user_transactions(&CancellationToken::new(), f.user_id, false)
            .await
            .unwrap();

        assert_eq!(result.bill_payments_marked, 1);
    }

    #[tokio::test]
    async fn test_unauthorized_clears_credential() {
        let f = fixture(FakeProvider::new(), &[]).await;
        f.provider.reject_credentials();

        let err = f
            .service
            .sync_user_transactions(&CancellationToken::new(), f.user_id, false)
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert!(!f.store.user(f.user_id).unwrap().has_credential());
    }
}
