//! Storage seams consumed by the sync and reconciliation services.
//!
//! Services only ever see these traits. `postgres::PgStore` backs them with
//! the query modules in `crate::db`; `memory::MemoryStore` keeps everything in
//! process and is what the tests run against.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Account, Bill, BillMatchCriteria, DuplicateCriteria, Exclusion, Transaction,
    UpsertAccount, UpsertBill, UpsertOutcome, UpsertTransaction, User,
};

/// Offset pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    pub fn all() -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    /// Forgets the provider credential so no further sync is attempted with it.
    async fn clear_provider_credential(&self, user_id: Uuid) -> Result<(), AppError>;

    async fn list_users_with_credential(&self) -> Result<Vec<User>, AppError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn upsert(&self, input: UpsertAccount) -> Result<(Account, UpsertOutcome), AppError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError>;

    async fn list_by_user(&self, user_id: Uuid, page: Page) -> Result<Vec<Account>, AppError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn upsert(&self, input: UpsertTransaction) -> Result<(Transaction, UpsertOutcome), AppError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Transaction>, AppError>;

    /// Stable order (transaction date, then id) so offset pages do not overlap.
    async fn list_by_user(&self, user_id: Uuid, page: Page) -> Result<Vec<Transaction>, AppError>;

    /// Applies `exclusion` atomically. `Ok(false)` when the row is manipulated
    /// or already carries one of its markers; `NotFound` when it is gone.
    async fn exclude(&self, id: Uuid, exclusion: &Exclusion) -> Result<bool, AppError>;

    async fn find_potential_duplicates(
        &self,
        criteria: &DuplicateCriteria,
    ) -> Result<Vec<Transaction>, AppError>;
}

#[async_trait]
pub trait BillStore: Send + Sync {
    async fn upsert(&self, input: UpsertBill) -> Result<(Bill, UpsertOutcome), AppError>;

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<Bill>, AppError>;

    /// At most one bill; the one whose due date is closest to the window centre.
    async fn find_matching_bill(&self, criteria: &BillMatchCriteria) -> Result<Option<Bill>, AppError>;
}
