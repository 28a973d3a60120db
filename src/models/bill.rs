use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// A credit-card statement. Read-only for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bill {
    pub id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub provider_bill_id: String,
    pub due_date: DateTime<Utc>,
    pub total_amount: BigDecimal,
    pub minimum_payment: Option<BigDecimal>,
    pub currency_code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertBill {
    pub account_id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub provider_bill_id: String,
    pub due_date: DateTime<Utc>,
    pub total_amount: BigDecimal,
    pub minimum_payment: Option<BigDecimal>,
    pub currency_code: String,
}

impl UpsertBill {
    pub fn differs_from(&self, existing: &Bill) -> bool {
        self.due_date != existing.due_date
            || self.total_amount != existing.total_amount
            || self.minimum_payment != existing.minimum_payment
            || self.currency_code != existing.currency_code
    }
}

/// Lookup for a bill paid by a transaction: same account, same absolute
/// amount, due date inside `[date_from, date_to]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BillMatchCriteria {
    pub account_id: uuid::Uuid,
    pub amount: BigDecimal,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}
