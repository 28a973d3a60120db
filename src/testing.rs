//! Fakes and fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use crate::external::provider::{
    FinancialDataProvider, ProviderAccount, ProviderBill, ProviderError, ProviderTransaction,
};
use crate::models::User;

/// Provider that serves canned records and counts calls.
#[derive(Default)]
pub struct FakeProvider {
    pub accounts: Mutex<Vec<ProviderAccount>>,
    pub transactions: Mutex<HashMap<String, Vec<ProviderTransaction>>>,
    pub bills: Mutex<HashMap<String, Vec<ProviderBill>>>,
    pub unauthorized: AtomicBool,
    pub failing_accounts: Mutex<Vec<String>>,
    pub account_calls: AtomicUsize,
    pub transaction_calls: AtomicUsize,
    pub bill_calls: AtomicUsize,
    pub last_since: Mutex<Option<NaiveDate>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, account: ProviderAccount) -> Self {
        self.accounts.lock().push(account);
        self
    }

    pub fn with_transaction(self, transaction: ProviderTransaction) -> Self {
        self.transactions
            .lock()
            .entry(transaction.account_id.clone())
            .or_default()
            .push(transaction);
        self
    }

    pub fn with_bill(self, provider_account_id: &str, bill: ProviderBill) -> Self {
        self.bills
            .lock()
            .entry(provider_account_id.to_string())
            .or_default()
            .push(bill);
        self
    }

    pub fn reject_credentials(&self) {
        self.unauthorized.store(true, Ordering::SeqCst);
    }

    /// Requests for this provider account fail with a network error.
    pub fn fail_account(&self, provider_account_id: &str) {
        self.failing_accounts.lock().push(provider_account_id.to_string());
    }

    fn check(&self, provider_account_id: Option<&str>) -> Result<(), ProviderError> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ProviderError::Unauthorized);
        }
        if let Some(id) = provider_account_id {
            if self.failing_accounts.lock().iter().any(|f| f == id) {
                return Err(ProviderError::Network(format!("connection reset for {}", id)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FinancialDataProvider for FakeProvider {
    async fn fetch_accounts(&self, _credential: &str) -> Result<Vec<ProviderAccount>, ProviderError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        self.check(None)?;
        Ok(self.accounts.lock().clone())
    }

    async fn fetch_transactions(
        &self,
        _credential: &str,
        provider_account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_since.lock() = Some(since);
        self.check(Some(provider_account_id))?;
        Ok(self
            .transactions
            .lock()
            .get(provider_account_id)
            .map(|list| {
                list.iter()
                    .filter(|t| t.date.date_naive() >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_bills(
        &self,
        _credential: &str,
        provider_account_id: &str,
    ) -> Result<Vec<ProviderBill>, ProviderError> {
        self.bill_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Some(provider_account_id))?;
        Ok(self
            .bills
            .lock()
            .get(provider_account_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn provider_account(id: &str, name: &str, account_type: &str) -> ProviderAccount {
    ProviderAccount {
        id: id.to_string(),
        name: name.to_string(),
        account_type: account_type.to_string(),
        subtype: if account_type == "CREDIT" {
            "CREDIT_CARD".to_string()
        } else {
            "CHECKING_ACCOUNT".to_string()
        },
        number: Some("0001".to_string()),
        balance: 1000.0,
        currency_code: "BRL".to_string(),
    }
}

pub fn provider_transaction(
    id: &str,
    account_id: &str,
    amount: f64,
    transaction_type: &str,
    date: DateTime<Utc>,
) -> ProviderTransaction {
    ProviderTransaction {
        id: id.to_string(),
        account_id: account_id.to_string(),
        description: format!("Lançamento {}", id),
        amount,
        date,
        transaction_type: transaction_type.to_string(),
        category: None,
    }
}

pub fn provider_bill(id: &str, due_date: DateTime<Utc>, total_amount: f64) -> ProviderBill {
    ProviderBill {
        id: id.to_string(),
        due_date,
        total_amount,
        minimum_payment: Some(total_amount * 0.15),
        currency_code: "BRL".to_string(),
    }
}

pub fn user_with_credential() -> User {
    User::new("ana@example.com".into(), "Ana".into(), Some("item-1".into()))
}
