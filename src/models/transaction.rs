use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl TransactionType {
    pub fn opposite(&self) -> Self {
        match self {
            TransactionType::Debit => TransactionType::Credit,
            TransactionType::Credit => TransactionType::Debit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "DEBIT",
            TransactionType::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBIT" => Ok(TransactionType::Debit),
            "CREDIT" => Ok(TransactionType::Credit),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

impl TryFrom<String> for TransactionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// A posted account movement. Reconciliation only ever touches `considered` and `notes`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub provider_transaction_id: String,
    pub description: String,
    pub amount: BigDecimal,
    #[sqlx(try_from = "String")]
    pub transaction_type: TransactionType,
    pub transaction_date: DateTime<Utc>,
    pub category: Option<String>,
    /// Counted in balances and insights.
    pub considered: bool,
    /// Adjusted by the user or a rule; never overridden automatically.
    pub manipulated: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn notes_contain(&self, needle: &str) -> bool {
        self.notes
            .as_deref()
            .map(|n| n.contains(needle))
            .unwrap_or(false)
    }

    /// Existing notes with `note` appended, space-separated.
    pub fn notes_with(&self, note: &str) -> String {
        match self.notes.as_deref().map(str::trim) {
            Some(existing) if !existing.is_empty() => format!("{} {}", existing, note),
            _ => note.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertTransaction {
    pub account_id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub provider_transaction_id: String,
    pub description: String,
    pub amount: BigDecimal,
    pub transaction_type: TransactionType,
    pub transaction_date: DateTime<Utc>,
    pub category: Option<String>,
}

impl UpsertTransaction {
    /// Only provider-owned fields are compared; local flags and notes survive re-imports.
    pub fn differs_from(&self, existing: &Transaction) -> bool {
        self.description != existing.description
            || self.amount != existing.amount
            || self.transaction_type != existing.transaction_type
            || self.transaction_date != existing.transaction_date
            || self.category != existing.category
    }
}

/// Exclusion applied by the reconciliation passes: `considered = false` plus
/// `note` appended to the notes.
///
/// Stores apply it atomically and only to rows that are not manipulated and
/// whose notes contain none of `skip_markers`, so concurrent passes flag a row
/// at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exclusion {
    pub note: &'static str,
    pub skip_markers: &'static [&'static str],
}

impl Exclusion {
    pub fn applies_to(&self, transaction: &Transaction) -> bool {
        !transaction.manipulated && !self.skip_markers.iter().any(|m| transaction.notes_contain(m))
    }
}

/// Lookup for probable duplicates of one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCriteria {
    pub user_id: uuid::Uuid,
    pub transaction_type: TransactionType,
    pub amount: BigDecimal,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub exclude_id: uuid::Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_type() {
        assert_eq!(TransactionType::Debit.opposite(), TransactionType::Credit);
        assert_eq!(TransactionType::Credit.opposite(), TransactionType::Debit);
    }

    #[test]
    fn test_parse_type_is_case_insensitive() {
        assert_eq!("debit".parse::<TransactionType>().unwrap(), TransactionType::Debit);
        assert_eq!(" CREDIT ".parse::<TransactionType>().unwrap(), TransactionType::Credit);
        assert!("TRANSFER".parse::<TransactionType>().is_err());
    }
}
