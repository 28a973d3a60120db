use serde::Serialize;
use uuid::Uuid;

/// Outcome of a single upsert, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Per-run, per-user counters of an account or bill sync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub user_id: Uuid,
    pub found: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.skipped += 1,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub type BillSyncResult = SyncResult;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionSyncResult {
    pub user_id: Uuid,
    pub full_history: bool,
    pub found: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub duplicates_marked: usize,
    pub bill_payments_marked: usize,
    pub errors: Vec<String>,
}

impl TransactionSyncResult {
    pub fn new(user_id: Uuid, full_history: bool) -> Self {
        Self {
            user_id,
            full_history,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.skipped += 1,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Aggregate counters of a reconciliation pass.
///
/// `found` counts every match, `marked` only the matches that were actually
/// updated; the two differ whenever a match is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub checked: usize,
    pub found: usize,
    pub marked: usize,
    pub errors: Vec<String>,
}

impl CheckResult {
    pub fn merge(&mut self, other: CheckResult) {
        self.checked += other.checked;
        self.found += other.found;
        self.marked += other.marked;
        self.errors.extend(other.errors);
    }
}

pub type DuplicateCheckResult = CheckResult;
pub type BillPaymentCheckResult = CheckResult;
