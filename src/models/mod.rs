mod account;
mod amount;
mod bill;
mod schedule;
mod sync_result;
mod transaction;
mod user;

pub use account::{account_matching_key, Account, UpsertAccount, CREDIT_ACCOUNT_TYPE};
pub use amount::amount_from_provider;
pub use bill::{Bill, BillMatchCriteria, UpsertBill};
pub use schedule::ScheduleTime;
pub use sync_result::{
    BillPaymentCheckResult, BillSyncResult, CheckResult, DuplicateCheckResult, SyncResult,
    TransactionSyncResult, UpsertOutcome,
};
pub use transaction::{
    DuplicateCriteria, Exclusion, Transaction, TransactionType, UpsertTransaction,
};
pub use user::User;
