use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::external::provider::ProviderError;

/// The phase of a per-user sync pipeline an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Accounts,
    Transactions,
    Bills,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Accounts => "account_sync",
            SyncPhase::Transactions => "transaction_sync",
            SyncPhase::Bills => "bill_sync",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(sqlx::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("External error: {0}")]
    External(String),
    #[error("Provider rejected the stored credential")]
    ProviderUnauthorized,
    #[error("{phase} aborted for user {user_id}: {source}")]
    SyncAborted {
        phase: SyncPhase,
        user_id: Uuid,
        #[source]
        source: Box<AppError>,
    },
    #[error("{phase} failed for user {user_id}: {source}")]
    PhaseFailed {
        phase: SyncPhase,
        user_id: Uuid,
        #[source]
        source: Box<AppError>,
    },
    #[error("{phase} for user {user_id} completed with {count} record error(s)")]
    PartialFailure {
        phase: SyncPhase,
        user_id: Uuid,
        count: usize,
    },
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Worker pool is closed")]
    PoolClosed,
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

impl AppError {
    /// True when this error, or any error it wraps, is a rejected provider credential.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            AppError::ProviderUnauthorized => true,
            AppError::SyncAborted { source, .. } | AppError::PhaseFailed { source, .. } => {
                source.is_unauthorized()
            }
            _ => false,
        }
    }

    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            AppError::SyncAborted { phase, .. }
            | AppError::PhaseFailed { phase, .. }
            | AppError::PartialFailure { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<ProviderError> for AppError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Unauthorized => AppError::ProviderUnauthorized,
            other => AppError::External(other.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Validation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_detected_through_wrappers() {
        let user_id = Uuid::new_v4();
        let err = AppError::SyncAborted {
            phase: SyncPhase::Accounts,
            user_id,
            source: Box::new(AppError::ProviderUnauthorized),
        };
        assert!(err.is_unauthorized());
        assert_eq!(err.phase(), Some(SyncPhase::Accounts));

        let other = AppError::PhaseFailed {
            phase: SyncPhase::Transactions,
            user_id,
            source: Box::new(AppError::External("boom".into())),
        };
        assert!(!other.is_unauthorized());
    }

    #[test]
    fn test_provider_error_conversion() {
        assert!(matches!(
            AppError::from(ProviderError::Unauthorized),
            AppError::ProviderUnauthorized
        ));
        assert!(matches!(
            AppError::from(ProviderError::RateLimited),
            AppError::External(_)
        ));
    }

    #[test]
    fn test_error_messages_carry_phase_and_user() {
        let user_id = Uuid::nil();
        let err = AppError::PartialFailure {
            phase: SyncPhase::Bills,
            user_id,
            count: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("bill_sync"));
        assert!(msg.contains(&user_id.to_string()));
        assert!(msg.contains("2 record error"));
    }
}
