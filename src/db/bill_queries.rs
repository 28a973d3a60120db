use sqlx::PgPool;
use uuid::Uuid;
use crate::models::{Bill, BillMatchCriteria, UpsertBill};

const BILL_COLUMNS: &str = "id, account_id, user_id, provider_bill_id, due_date, total_amount, minimum_payment, currency_code, created_at, updated_at";

pub async fn fetch_by_account(pool: &PgPool, account_id: Uuid) -> Result<Vec<Bill>, sqlx::Error> {
    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {BILL_COLUMNS}
         FROM bills
         WHERE account_id = $1
         ORDER BY due_date"
    ))
    .bind(account_id)
    .fetch_all(pool)
    .await
}

pub async fn find_by_provider_id(
    pool: &PgPool,
    account_id: Uuid,
    provider_bill_id: &str,
) -> Result<Option<Bill>, sqlx::Error> {
    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {BILL_COLUMNS}
         FROM bills
         WHERE account_id = $1 AND provider_bill_id = $2"
    ))
    .bind(account_id)
    .bind(provider_bill_id)
    .fetch_optional(pool)
    .await
}

pub async fn insert(pool: &PgPool, input: &UpsertBill) -> Result<Bill, sqlx::Error> {
    sqlx::query_as::<_, Bill>(&format!(
        "INSERT INTO bills (id, account_id, user_id, provider_bill_id, due_date, total_amount, minimum_payment, currency_code)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (account_id, provider_bill_id)
         DO UPDATE SET
             due_date = EXCLUDED.due_date,
             total_amount = EXCLUDED.total_amount,
             minimum_payment = EXCLUDED.minimum_payment,
             currency_code = EXCLUDED.currency_code,
             updated_at = NOW()
         RETURNING {BILL_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.account_id)
    .bind(input.user_id)
    .bind(&input.provider_bill_id)
    .bind(input.due_date)
    .bind(&input.total_amount)
    .bind(&input.minimum_payment)
    .bind(&input.currency_code)
    .fetch_one(pool)
    .await
}

pub async fn update(pool: &PgPool, id: Uuid, input: &UpsertBill) -> Result<Bill, sqlx::Error> {
    sqlx::query_as::<_, Bill>(&format!(
        "UPDATE bills
         SET due_date = $2, total_amount = $3, minimum_payment = $4, currency_code = $5, updated_at = NOW()
         WHERE id = $1
         RETURNING {BILL_COLUMNS}"
    ))
    .bind(id)
    .bind(input.due_date)
    .bind(&input.total_amount)
    .bind(&input.minimum_payment)
    .bind(&input.currency_code)
    .fetch_one(pool)
    .await
}

/// Closest due date to the middle of the window wins.
pub async fn find_matching(pool: &PgPool, criteria: &BillMatchCriteria) -> Result<Option<Bill>, sqlx::Error> {
    let centre = criteria.date_from + (criteria.date_to - criteria.date_from) / 2;

    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {BILL_COLUMNS}
         FROM bills
         WHERE account_id = $1
           AND ABS(total_amount) = $2
           AND due_date BETWEEN $3 AND $4
         ORDER BY ABS(EXTRACT(EPOCH FROM (due_date - $5)))
         LIMIT 1"
    ))
    .bind(criteria.account_id)
    .bind(&criteria.amount)
    .bind(criteria.date_from)
    .bind(criteria.date_to)
    .bind(centre)
    .fetch_optional(pool)
    .await
}
