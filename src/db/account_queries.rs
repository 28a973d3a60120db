use sqlx::PgPool;
use uuid::Uuid;
use crate::models::{Account, UpsertAccount};

const ACCOUNT_COLUMNS: &str = "id, user_id, provider_account_id, name, account_type, subtype, number, balance, currency_code, created_at, updated_at";

pub async fn fetch_by_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS}
         FROM accounts
         WHERE user_id = $1
         ORDER BY created_at, id
         LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn fetch_one(pool: &PgPool, id: Uuid) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_provider_id(
    pool: &PgPool,
    user_id: Uuid,
    provider_account_id: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS}
         FROM accounts
         WHERE user_id = $1 AND provider_account_id = $2"
    ))
    .bind(user_id)
    .bind(provider_account_id)
    .fetch_optional(pool)
    .await
}

pub async fn insert(pool: &PgPool, input: &UpsertAccount) -> Result<Account, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "INSERT INTO accounts (id, user_id, provider_account_id, name, account_type, subtype, number, balance, currency_code)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (user_id, provider_account_id)
         DO UPDATE SET
             name = EXCLUDED.name,
             account_type = EXCLUDED.account_type,
             subtype = EXCLUDED.subtype,
             number = EXCLUDED.number,
             balance = EXCLUDED.balance,
             currency_code = EXCLUDED.currency_code,
             updated_at = NOW()
         RETURNING {ACCOUNT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.user_id)
    .bind(&input.provider_account_id)
    .bind(&input.name)
    .bind(&input.account_type)
    .bind(&input.subtype)
    .bind(&input.number)
    .bind(&input.balance)
    .bind(&input.currency_code)
    .fetch_one(pool)
    .await
}

pub async fn update(pool: &PgPool, id: Uuid, input: &UpsertAccount) -> Result<Account, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "UPDATE accounts
         SET name = $2, account_type = $3, subtype = $4, number = $5, balance = $6, currency_code = $7, updated_at = NOW()
         WHERE id = $1
         RETURNING {ACCOUNT_COLUMNS}"
    ))
    .bind(id)
    .bind(&input.name)
    .bind(&input.account_type)
    .bind(&input.subtype)
    .bind(&input.number)
    .bind(&input.balance)
    .bind(&input.currency_code)
    .fetch_one(pool)
    .await
}
