use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::external::provider::{FinancialDataProvider, ProviderBill};
use crate::models::{amount_from_provider, Account, BillSyncResult, UpsertBill};
use crate::services::credential_service::CredentialInvalidator;
use crate::services::{load_syncable_user, until_cancelled};
use crate::store::{AccountStore, BillStore, Page, UserStore};

/// Imports credit-card bills for the user's credit accounts.
#[async_trait]
pub trait BillSyncer: Send + Sync {
    async fn sync_user_bills(&self, cancel: &CancellationToken, user_id: Uuid) -> Result<BillSyncResult, AppError>;
}

pub struct BillSyncService {
    provider: Arc<dyn FinancialDataProvider>,
    users: Arc<dyn UserStore>,
    accounts: Arc<dyn AccountStore>,
    bills: Arc<dyn BillStore>,
    invalidator: CredentialInvalidator,
}

impl BillSyncService {
    pub fn new(
        provider: Arc<dyn FinancialDataProvider>,
        users: Arc<dyn UserStore>,
        accounts: Arc<dyn AccountStore>,
        bills: Arc<dyn BillStore>,
        invalidator: CredentialInvalidator,
    ) -> Self {
        Self {
            provider,
            users,
            accounts,
            bills,
            invalidator,
        }
    }
}

fn to_upsert_bill(account: &Account, bill: ProviderBill) -> UpsertBill {
    UpsertBill {
        account_id: account.id,
        user_id: account.user_id,
        provider_bill_id: bill.id,
        due_date: bill.due_date,
        total_amount: amount_from_provider(bill.total_amount),
        minimum_payment: bill.minimum_payment.map(amount_from_provider),
        currency_code: bill.currency_code,
    }
}

#[async_trait]
impl BillSyncer for BillSyncService {
    async fn sync_user_bills(&self, cancel: &CancellationToken, user_id: Uuid) -> Result<BillSyncResult, AppError> {
        let (user, credential) = load_syncable_user(self.users.as_ref(), user_id).await?;

        let credit_accounts: Vec<Account> = self
            .accounts
            .list_by_user(user_id, Page::all())
            .await?
            .into_iter()
            .filter(Account::is_credit_card)
            .collect();

        let mut result = BillSyncResult::new(user_id);

        for account in &credit_accounts {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled(format!("bill sync for user {}", user_id)));
            }

            let fetched = until_cancelled(cancel, "bill fetch", async {
                self.provider
                    .fetch_bills(&credential, &account.provider_account_id)
                    .await
                    .map_err(AppError::from)
            })
            .await;

            let provider_bills = match fetched {
                Ok(bills) => bills,
                Err(AppError::ProviderUnauthorized) => {
                    self.invalidator.invalidate(&user).await;
                    return Err(AppError::ProviderUnauthorized);
                }
                Err(e @ AppError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    warn!("Failed to fetch bills of account {}: {}", account.id, e);
                    result.errors.push(format!("account {}: {}", account.id, e));
                    continue;
                }
            };

            result.found += provider_bills.len();

            for provider_bill in provider_bills {
                let provider_id = provider_bill.id.clone();
                match self.bills.upsert(to_upsert_bill(account, provider_bill)).await {
                    Ok((_, outcome)) => result.record(outcome),
                    Err(e) => {
                        warn!("Failed to upsert bill {}: {}", provider_id, e);
                        result.errors.push(format!("bill {}: {}", provider_id, e));
                    }
                }
            }
        }

        info!(
            "🧾 Bills for user {} ({} credit accounts): found={} created={} updated={} skipped={} errors={}",
            user_id,
            credit_accounts.len(),
            result.found,
            result.created,
            result.updated,
            result.skipped,
            result.errors.len()
        );

        Ok(result)
    }
}
