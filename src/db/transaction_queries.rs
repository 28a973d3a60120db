use sqlx::PgPool;
use uuid::Uuid;
use crate::models::{DuplicateCriteria, Exclusion, Transaction, UpsertTransaction};

const TRANSACTION_COLUMNS: &str = "id, account_id, user_id, provider_transaction_id, description, amount, transaction_type, transaction_date, category, considered, manipulated, notes, created_at, updated_at";

pub async fn fetch_one(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_by_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS}
         FROM transactions
         WHERE user_id = $1
         ORDER BY transaction_date, id
         LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn find_by_provider_id(
    pool: &PgPool,
    account_id: Uuid,
    provider_transaction_id: &str,
) -> Result<Option<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS}
         FROM transactions
         WHERE account_id = $1 AND provider_transaction_id = $2"
    ))
    .bind(account_id)
    .bind(provider_transaction_id)
    .fetch_optional(pool)
    .await
}

pub async fn insert(pool: &PgPool, input: &UpsertTransaction) -> Result<Transaction, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!(
        "INSERT INTO transactions (id, account_id, user_id, provider_transaction_id, description, amount, transaction_type, transaction_date, category)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (account_id, provider_transaction_id)
         DO UPDATE SET
             description = EXCLUDED.description,
             amount = EXCLUDED.amount,
             transaction_type = EXCLUDED.transaction_type,
             transaction_date = EXCLUDED.transaction_date,
             category = EXCLUDED.category,
             updated_at = NOW()
         RETURNING {TRANSACTION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(input.account_id)
    .bind(input.user_id)
    .bind(&input.provider_transaction_id)
    .bind(&input.description)
    .bind(&input.amount)
    .bind(input.transaction_type.as_str())
    .bind(input.transaction_date)
    .bind(&input.category)
    .fetch_one(pool)
    .await
}

/// Rewrites provider-owned fields only; `considered`, `manipulated` and `notes` are kept.
pub async fn update_from_provider(
    pool: &PgPool,
    id: Uuid,
    input: &UpsertTransaction,
) -> Result<Transaction, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!(
        "UPDATE transactions
         SET description = $2, amount = $3, transaction_type = $4, transaction_date = $5, category = $6, updated_at = NOW()
         WHERE id = $1
         RETURNING {TRANSACTION_COLUMNS}"
    ))
    .bind(id)
    .bind(&input.description)
    .bind(&input.amount)
    .bind(input.transaction_type.as_str())
    .bind(input.transaction_date)
    .bind(&input.category)
    .fetch_one(pool)
    .await
}

/// Conditional exclusion; returns the number of rows changed (0 or 1).
pub async fn apply_exclusion(pool: &PgPool, id: Uuid, exclusion: &Exclusion) -> Result<u64, sqlx::Error> {
    let markers: Vec<String> = exclusion.skip_markers.iter().map(|m| m.to_string()).collect();
    let result = sqlx::query(
        "UPDATE transactions
         SET considered = FALSE,
             notes = CASE
                 WHEN notes IS NULL OR BTRIM(notes) = '' THEN $2
                 ELSE BTRIM(notes) || ' ' || $2
             END,
             updated_at = NOW()
         WHERE id = $1
           AND NOT manipulated
           AND NOT EXISTS (
               SELECT 1 FROM UNNEST($3::text[]) AS marker
               WHERE STRPOS(COALESCE(notes, ''), marker) > 0
           )"
    )
    .bind(id)
    .bind(exclusion.note)
    .bind(markers)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn find_potential_duplicates(
    pool: &PgPool,
    criteria: &DuplicateCriteria,
) -> Result<Vec<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS}
         FROM transactions
         WHERE user_id = $1
           AND transaction_type = $2
           AND ABS(amount) = $3
           AND transaction_date BETWEEN $4 AND $5
           AND id <> $6
         ORDER BY transaction_date"
    ))
    .bind(criteria.user_id)
    .bind(criteria.transaction_type.as_str())
    .bind(&criteria.amount)
    .bind(criteria.date_from)
    .bind(criteria.date_to)
    .bind(criteria.exclude_id)
    .fetch_all(pool)
    .await
}
