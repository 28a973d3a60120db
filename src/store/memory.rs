use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Account, Bill, BillMatchCriteria, DuplicateCriteria, Exclusion, Transaction,
    UpsertAccount, UpsertBill, UpsertOutcome, UpsertTransaction, User,
};
use crate::store::{AccountStore, BillStore, Page, TransactionStore, UserStore};

/// In-process store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    accounts: DashMap<Uuid, Account>,
    transactions: DashMap<Uuid, Transaction>,
    bills: DashMap<Uuid, Bill>,
    // Serializes find-then-insert in upserts.
    upsert_lock: Mutex<()>,
    transaction_page_fetches: AtomicUsize,
    transaction_updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn insert_account(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn insert_transaction(&self, transaction: Transaction) {
        self.transactions.insert(transaction.id, transaction);
    }

    pub fn insert_bill(&self, bill: Bill) {
        self.bills.insert(bill.id, bill);
    }

    pub fn transaction(&self, id: Uuid) -> Option<Transaction> {
        self.transactions.get(&id).map(|t| t.value().clone())
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Number of `TransactionStore::list_by_user` calls served so far.
    pub fn transaction_page_fetches(&self) -> usize {
        self.transaction_page_fetches.load(Ordering::SeqCst)
    }

    /// Number of exclusions actually applied so far.
    pub fn transaction_updates(&self) -> usize {
        self.transaction_updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.user(user_id))
    }

    async fn clear_provider_credential(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        user.provider_credential = None;
        Ok(())
    }

    async fn list_users_with_credential(&self) -> Result<Vec<User>, AppError> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| u.has_credential())
            .map(|u| u.value().clone())
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn upsert(&self, input: UpsertAccount) -> Result<(Account, UpsertOutcome), AppError> {
        let _guard = self.upsert_lock.lock();
        let now = Utc::now();

        let existing = self
            .accounts
            .iter()
            .find(|a| a.user_id == input.user_id && a.provider_account_id == input.provider_account_id)
            .map(|a| a.value().clone());

        let (account, outcome) = match existing {
            Some(existing) if !input.differs_from(&existing) => (existing, UpsertOutcome::Unchanged),
            Some(existing) => (
                Account {
                    name: input.name,
                    account_type: input.account_type,
                    subtype: input.subtype,
                    number: input.number,
                    balance: input.balance,
                    currency_code: input.currency_code,
                    updated_at: now,
                    ..existing
                },
                UpsertOutcome::Updated,
            ),
            None => (
                Account {
                    id: Uuid::new_v4(),
                    user_id: input.user_id,
                    provider_account_id: input.provider_account_id,
                    name: input.name,
                    account_type: input.account_type,
                    subtype: input.subtype,
                    number: input.number,
                    balance: input.balance,
                    currency_code: input.currency_code,
                    created_at: now,
                    updated_at: now,
                },
                UpsertOutcome::Created,
            ),
        };

        self.accounts.insert(account.id, account.clone());
        Ok((account, outcome))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        Ok(self.accounts.get(&id).map(|a| a.value().clone()))
    }

    async fn list_by_user(&self, user_id: Uuid, page: Page) -> Result<Vec<Account>, AppError> {
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.value().clone())
            .collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts.into_iter().skip(page.offset).take(page.limit).collect())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn upsert(&self, input: UpsertTransaction) -> Result<(Transaction, UpsertOutcome), AppError> {
        let _guard = self.upsert_lock.lock();
        let now = Utc::now();

        let existing = self
            .transactions
            .iter()
            .find(|t| {
                t.account_id == input.account_id
                    && t.provider_transaction_id == input.provider_transaction_id
            })
            .map(|t| t.value().clone());

        let (transaction, outcome) = match existing {
            Some(existing) if !input.differs_from(&existing) => (existing, UpsertOutcome::Unchanged),
            Some(existing) => (
                Transaction {
                    description: input.description,
                    amount: input.amount,
                    transaction_type: input.transaction_type,
                    transaction_date: input.transaction_date,
                    category: input.category,
                    updated_at: now,
                    ..existing
                },
                UpsertOutcome::Updated,
            ),
            None => (
                Transaction {
                    id: Uuid::new_v4(),
                    account_id: input.account_id,
                    user_id: input.user_id,
                    provider_transaction_id: input.provider_transaction_id,
                    description: input.description,
                    amount: input.amount,
                    transaction_type: input.transaction_type,
                    transaction_date: input.transaction_date,
                    category: input.category,
                    considered: true,
                    manipulated: false,
                    notes: None,
                    created_at: now,
                    updated_at: now,
                },
                UpsertOutcome::Created,
            ),
        };

        self.transactions.insert(transaction.id, transaction.clone());
        Ok((transaction, outcome))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Transaction>, AppError> {
        Ok(self.transaction(id))
    }

    async fn list_by_user(&self, user_id: Uuid, page: Page) -> Result<Vec<Transaction>, AppError> {
        self.transaction_page_fetches.fetch_add(1, Ordering::SeqCst);

        let mut transactions: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.value().clone())
            .collect();
        transactions.sort_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then(a.id.cmp(&b.id))
        });
        Ok(transactions.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn exclude(&self, id: Uuid, exclusion: &Exclusion) -> Result<bool, AppError> {
        // The entry guard makes check-and-set atomic per row.
        let mut transaction = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;

        if !exclusion.applies_to(&transaction) {
            return Ok(false);
        }
        transaction.notes = Some(transaction.notes_with(exclusion.note));
        transaction.considered = false;
        transaction.updated_at = Utc::now();
        self.transaction_updates.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn find_potential_duplicates(
        &self,
        criteria: &DuplicateCriteria,
    ) -> Result<Vec<Transaction>, AppError> {
        let mut matches: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| {
                t.id != criteria.exclude_id
                    && t.user_id == criteria.user_id
                    && t.transaction_type == criteria.transaction_type
                    && t.amount.abs() == criteria.amount
                    && t.transaction_date >= criteria.date_from
                    && t.transaction_date <= criteria.date_to
            })
            .map(|t| t.value().clone())
            .collect();
        matches.sort_by_key(|t| t.transaction_date);
        Ok(matches)
    }
}

#[async_trait]
impl BillStore for MemoryStore {
    async fn upsert(&self, input: UpsertBill) -> Result<(Bill, UpsertOutcome), AppError> {
        let _guard = self.upsert_lock.lock();
        let now = Utc::now();

        let existing = self
            .bills
            .iter()
            .find(|b| b.account_id == input.account_id && b.provider_bill_id == input.provider_bill_id)
            .map(|b| b.value().clone());

        let (bill, outcome) = match existing {
            Some(existing) if !input.differs_from(&existing) => (existing, UpsertOutcome::Unchanged),
            Some(existing) => (
                Bill {
                    due_date: input.due_date,
                    total_amount: input.total_amount,
                    minimum_payment: input.minimum_payment,
                    currency_code: input.currency_code,
                    updated_at: now,
                    ..existing
                },
                UpsertOutcome::Updated,
            ),
            None => (
                Bill {
                    id: Uuid::new_v4(),
                    account_id: input.account_id,
                    user_id: input.user_id,
                    provider_bill_id: input.provider_bill_id,
                    due_date: input.due_date,
                    total_amount: input.total_amount,
                    minimum_payment: input.minimum_payment,
                    currency_code: input.currency_code,
                    created_at: now,
                    updated_at: now,
                },
                UpsertOutcome::Created,
            ),
        };

        self.bills.insert(bill.id, bill.clone());
        Ok((bill, outcome))
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<Bill>, AppError> {
        let mut bills: Vec<Bill> = self
            .bills
            .iter()
            .filter(|b| b.account_id == account_id)
            .map(|b| b.value().clone())
            .collect();
        bills.sort_by_key(|b| b.due_date);
        Ok(bills)
    }

    async fn find_matching_bill(&self, criteria: &BillMatchCriteria) -> Result<Option<Bill>, AppError> {
        let centre = criteria.date_from + (criteria.date_to - criteria.date_from) / 2;

        Ok(self
            .bills
            .iter()
            .filter(|b| {
                b.account_id == criteria.account_id
                    && b.total_amount.abs() == criteria.amount
                    && b.due_date >= criteria.date_from
                    && b.due_date <= criteria.date_to
            })
            .map(|b| b.value().clone())
            .min_by_key(|b| (b.due_date - centre).num_seconds().abs()))
    }
}
