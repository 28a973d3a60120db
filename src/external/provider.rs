use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderAccount {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub number: Option<String>,
    pub balance: f64,
    #[serde(rename = "currencyCode", default = "default_currency")]
    pub currency_code: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderTransaction {
    pub id: String,
    #[serde(rename = "accountId")]
    pub account_id: String,
    pub description: String,
    pub amount: f64,
    pub date: DateTime<Utc>,
    /// "DEBIT" or "CREDIT"
    #[serde(rename = "type")]
    pub transaction_type: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderBill {
    pub id: String,
    #[serde(rename = "dueDate")]
    pub due_date: DateTime<Utc>,
    #[serde(rename = "totalAmount")]
    pub total_amount: f64,
    #[serde(rename = "minimumPaymentAmount", default)]
    pub minimum_payment: Option<f64>,
    #[serde(rename = "totalAmountCurrencyCode", default = "default_currency")]
    pub currency_code: String,
}

fn default_currency() -> String {
    "BRL".to_string()
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected the credential")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Read-only view of the external financial-data provider.
///
/// `credential` is the per-user connection identifier stored on the user
/// record. Implementations must report a revoked or invalid credential as
/// [`ProviderError::Unauthorized`] and nothing else.
#[async_trait]
pub trait FinancialDataProvider: Send + Sync {
    async fn fetch_accounts(&self, credential: &str) -> Result<Vec<ProviderAccount>, ProviderError>;

    async fn fetch_transactions(
        &self,
        credential: &str,
        provider_account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError>;

    async fn fetch_bills(
        &self,
        credential: &str,
        provider_account_id: &str,
    ) -> Result<Vec<ProviderBill>, ProviderError>;
}
