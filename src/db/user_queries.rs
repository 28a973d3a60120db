use sqlx::PgPool;
use uuid::Uuid;
use crate::models::User;

pub async fn fetch_one(pool: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT id, email, name, provider_credential, created_at
         FROM users
         WHERE id = $1"
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_with_credential(pool: &PgPool) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT id, email, name, provider_credential, created_at
         FROM users
         WHERE provider_credential IS NOT NULL AND provider_credential <> ''
         ORDER BY created_at"
    )
    .fetch_all(pool)
    .await
}

pub async fn clear_provider_credential(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET provider_credential = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
