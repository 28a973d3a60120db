use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{account_queries, bill_queries, transaction_queries, user_queries};
use crate::errors::AppError;
use crate::models::{
    Account, Bill, BillMatchCriteria, DuplicateCriteria, Exclusion, Transaction,
    UpsertAccount, UpsertBill, UpsertOutcome, UpsertTransaction, User,
};
use crate::store::{AccountStore, BillStore, Page, TransactionStore, UserStore};

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn page_bounds(page: Page) -> (i64, i64) {
    (
        i64::try_from(page.limit).unwrap_or(i64::MAX),
        i64::try_from(page.offset).unwrap_or(i64::MAX),
    )
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(user_queries::fetch_one(&self.pool, user_id).await?)
    }

    async fn clear_provider_credential(&self, user_id: Uuid) -> Result<(), AppError> {
        let affected = user_queries::clear_provider_credential(&self.pool, user_id).await?;
        if affected == 0 {
            return Err(AppError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn list_users_with_credential(&self) -> Result<Vec<User>, AppError> {
        Ok(user_queries::fetch_with_credential(&self.pool).await?)
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn upsert(&self, input: UpsertAccount) -> Result<(Account, UpsertOutcome), AppError> {
        let existing =
            account_queries::find_by_provider_id(&self.pool, input.user_id, &input.provider_account_id).await?;

        match existing {
            Some(existing) if !input.differs_from(&existing) => Ok((existing, UpsertOutcome::Unchanged)),
            Some(existing) => {
                let account = account_queries::update(&self.pool, existing.id, &input).await?;
                Ok((account, UpsertOutcome::Updated))
            }
            None => {
                let account = account_queries::insert(&self.pool, &input).await?;
                Ok((account, UpsertOutcome::Created))
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        Ok(account_queries::fetch_one(&self.pool, id).await?)
    }

    async fn list_by_user(&self, user_id: Uuid, page: Page) -> Result<Vec<Account>, AppError> {
        let (limit, offset) = page_bounds(page);
        Ok(account_queries::fetch_by_user(&self.pool, user_id, limit, offset).await?)
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn upsert(&self, input: UpsertTransaction) -> Result<(Transaction, UpsertOutcome), AppError> {
        let existing = transaction_queries::find_by_provider_id(
            &self.pool,
            input.account_id,
            &input.provider_transaction_id,
        )
        .await?;

        match existing {
            Some(existing) if !input.differs_from(&existing) => Ok((existing, UpsertOutcome::Unchanged)),
            Some(existing) => {
                let tx = transaction_queries::update_from_provider(&self.pool, existing.id, &input).await?;
                Ok((tx, UpsertOutcome::Updated))
            }
            None => {
                let tx = transaction_queries::insert(&self.pool, &input).await?;
                Ok((tx, UpsertOutcome::Created))
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Transaction>, AppError> {
        Ok(transaction_queries::fetch_one(&self.pool, id).await?)
    }

    async fn list_by_user(&self, user_id: Uuid, page: Page) -> Result<Vec<Transaction>, AppError> {
        let (limit, offset) = page_bounds(page);
        Ok(transaction_queries::fetch_by_user(&self.pool, user_id, limit, offset).await?)
    }

    async fn exclude(&self, id: Uuid, exclusion: &Exclusion) -> Result<bool, AppError> {
        if transaction_queries::apply_exclusion(&self.pool, id, exclusion).await? > 0 {
            return Ok(true);
        }
        match transaction_queries::fetch_one(&self.pool, id).await? {
            Some(_) => Ok(false),
            None => Err(AppError::NotFound(format!("transaction {}", id))),
        }
    }

    async fn find_potential_duplicates(
        &self,
        criteria: &DuplicateCriteria,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(transaction_queries::find_potential_duplicates(&self.pool, criteria).await?)
    }
}

#[async_trait]
impl BillStore for PgStore {
    async fn upsert(&self, input: UpsertBill) -> Result<(Bill, UpsertOutcome), AppError> {
        let existing =
            bill_queries::find_by_provider_id(&self.pool, input.account_id, &input.provider_bill_id).await?;

        match existing {
            Some(existing) if !input.differs_from(&existing) => Ok((existing, UpsertOutcome::Unchanged)),
            Some(existing) => {
                let bill = bill_queries::update(&self.pool, existing.id, &input).await?;
                Ok((bill, UpsertOutcome::Updated))
            }
            None => {
                let bill = bill_queries::insert(&self.pool, &input).await?;
                Ok((bill, UpsertOutcome::Created))
            }
        }
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<Bill>, AppError> {
        Ok(bill_queries::fetch_by_account(&self.pool, account_id).await?)
    }

    async fn find_matching_bill(&self, criteria: &BillMatchCriteria) -> Result<Option<Bill>, AppError> {
        Ok(bill_queries::find_matching(&self.pool, criteria).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds_saturate() {
        assert_eq!(page_bounds(Page::new(500, 1000)), (500, 1000));
        assert_eq!(page_bounds(Page::all()), (i64::MAX, 0));
    }
}
