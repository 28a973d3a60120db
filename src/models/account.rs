use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// A bank or credit-card account imported from the provider.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub provider_account_id: String,
    pub name: String,
    pub account_type: String,
    pub subtype: String,
    pub number: Option<String>,
    pub balance: BigDecimal,
    pub currency_code: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertAccount {
    pub user_id: uuid::Uuid,
    pub provider_account_id: String,
    pub name: String,
    pub account_type: String,
    pub subtype: String,
    pub number: Option<String>,
    pub balance: BigDecimal,
    pub currency_code: String,
}

pub const CREDIT_ACCOUNT_TYPE: &str = "CREDIT";

impl Account {
    /// Composite key used to re-identify an account when the provider hands out
    /// new account ids (e.g. after the user reconnects).
    pub fn matching_key(&self) -> String {
        account_matching_key(&self.name, &self.account_type, &self.subtype)
    }

    pub fn is_credit_card(&self) -> bool {
        self.account_type.eq_ignore_ascii_case(CREDIT_ACCOUNT_TYPE)
    }
}

pub fn account_matching_key(name: &str, account_type: &str, subtype: &str) -> String {
    format!("{}|{}|{}", name, account_type, subtype)
}

impl UpsertAccount {
    pub fn differs_from(&self, existing: &Account) -> bool {
        self.name != existing.name
            || self.account_type != existing.account_type
            || self.subtype != existing.subtype
            || self.number != existing.number
            || self.balance != existing.balance
            || self.currency_code != existing.currency_code
    }
}
