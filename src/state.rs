use std::sync::Arc;

use crate::config::SyncWindowConfig;
use crate::external::provider::FinancialDataProvider;
use crate::jobs::JobContext;
use crate::observability::SyncTelemetry;
use crate::services::account_sync_service::AccountSyncService;
use crate::services::bill_payment_check_service::BillPaymentCheckService;
use crate::services::bill_sync_service::BillSyncService;
use crate::services::credential_service::CredentialInvalidator;
use crate::services::duplicate_check_service::DuplicateCheckService;
use crate::services::notification_service::NotificationSink;
use crate::services::transaction_sync_service::TransactionSyncService;
use crate::store::{AccountStore, BillStore, TransactionStore, UserStore};

/// Everything the scheduler and the CLI modes need, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub jobs: JobContext,
    pub duplicates: DuplicateCheckService,
    pub bill_payments: BillPaymentCheckService,
}

impl AppState {
    /// `store` backs all four store traits (Postgres in production, memory in tests).
    pub fn new<S>(
        store: Arc<S>,
        provider: Arc<dyn FinancialDataProvider>,
        notifications: Option<Arc<dyn NotificationSink>>,
        telemetry: Arc<dyn SyncTelemetry>,
        reconciliation_workers: usize,
        window: SyncWindowConfig,
    ) -> Self
    where
        S: UserStore + AccountStore + TransactionStore + BillStore + 'static,
    {
        let users: Arc<dyn UserStore> = store.clone();
        let accounts: Arc<dyn AccountStore> = store.clone();
        let transactions: Arc<dyn TransactionStore> = store.clone();
        let bills: Arc<dyn BillStore> = store;

        let invalidator = CredentialInvalidator::new(users.clone(), notifications);
        let duplicates = DuplicateCheckService::new(transactions.clone(), reconciliation_workers);
        let bill_payments =
            BillPaymentCheckService::new(transactions.clone(), bills.clone(), reconciliation_workers);

        let jobs = JobContext {
            accounts: Arc::new(AccountSyncService::new(
                provider.clone(),
                users.clone(),
                accounts.clone(),
                invalidator.clone(),
            )),
            transactions: Arc::new(TransactionSyncService::new(
                provider.clone(),
                users.clone(),
                accounts.clone(),
                transactions,
                duplicates.clone(),
                bill_payments.clone(),
                invalidator.clone(),
                window,
            )),
            bills: Arc::new(BillSyncService::new(provider, users.clone(), accounts, bills, invalidator)),
            telemetry,
        };

        Self {
            users,
            jobs,
            duplicates,
            bill_payments,
        }
    }
}
