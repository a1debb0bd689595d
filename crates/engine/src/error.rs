//! The module contains the error the engine can throw.
//!
//! Errors fall in three families:
//!
//! - business rules ([`InsufficientFunds`], [`InvalidTransaction`],
//!   [`Validation`], [`KeyNotFound`], [`ExistingKey`]): never retried, the
//!   caller reacts to them;
//! - concurrency ([`ConcurrentUpdate`]): the whole unit can be retried from
//!   scratch;
//! - storage ([`Database`], [`TransactionFailed`]): infrastructure faults,
//!   retried by the queue worker up to its attempt limit.
//!
//!  [`InsufficientFunds`]: EngineError::InsufficientFunds
//!  [`InvalidTransaction`]: EngineError::InvalidTransaction
//!  [`Validation`]: EngineError::Validation
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`ExistingKey`]: EngineError::ExistingKey
//!  [`ConcurrentUpdate`]: EngineError::ConcurrentUpdate
//!  [`Database`]: EngineError::Database
//!  [`TransactionFailed`]: EngineError::TransactionFailed
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::MoneyCents;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(
        "Insufficient funds on account {account_id}: required {required}, available {available}"
    )]
    InsufficientFunds {
        account_id: Uuid,
        required: MoneyCents,
        available: MoneyCents,
    },
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Concurrent update on account {account_id} (expected version {expected_version})")]
    ConcurrentUpdate {
        account_id: Uuid,
        expected_version: i64,
    },
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("Transaction failed: {message}")]
    TransactionFailed {
        message: String,
        #[source]
        source: DbErr,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Coarse classification of [`EngineError`], so callers can branch on the
/// kind of failure without matching every payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    InvalidTransaction,
    ConcurrentUpdate,
    NotFound,
    Conflict,
    Storage,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidCursor(_) => ErrorKind::Validation,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::InvalidTransaction(_) => ErrorKind::InvalidTransaction,
            Self::ConcurrentUpdate { .. } => ErrorKind::ConcurrentUpdate,
            Self::KeyNotFound(_) => ErrorKind::NotFound,
            Self::ExistingKey(_) => ErrorKind::Conflict,
            Self::TransactionFailed { .. } | Self::Serialization(_) | Self::Database(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// Whether re-running the whole orchestration unit may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentUpdate { .. } | Self::TransactionFailed { .. } | Self::Database(_)
        )
    }

    /// Business-rule rejections are surfaced to the caller unchanged.
    pub fn is_business(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::InsufficientFunds
                | ErrorKind::InvalidTransaction
                | ErrorKind::NotFound
                | ErrorKind::Conflict
        )
    }

    /// Wraps raw storage faults into [`EngineError::TransactionFailed`],
    /// leaving every other error untouched.
    pub(crate) fn into_transaction_failure(self) -> Self {
        match self {
            Self::Database(source) => Self::TransactionFailed {
                message: source.to_string(),
                source,
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (
                Self::InsufficientFunds {
                    account_id: a,
                    required: ar,
                    available: aa,
                },
                Self::InsufficientFunds {
                    account_id: b,
                    required: br,
                    available: ba,
                },
            ) => a == b && ar == br && aa == ba,
            (Self::InvalidTransaction(a), Self::InvalidTransaction(b)) => a == b,
            (
                Self::ConcurrentUpdate {
                    account_id: a,
                    expected_version: av,
                },
                Self::ConcurrentUpdate {
                    account_id: b,
                    expected_version: bv,
                },
            ) => a == b && av == bv,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InvalidCursor(a), Self::InvalidCursor(b)) => a == b,
            (Self::TransactionFailed { message: a, .. }, Self::TransactionFailed { message: b, .. }) => {
                a == b
            }
            (Self::Serialization(a), Self::Serialization(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_retryable() {
        let err = EngineError::Database(DbErr::Custom("disk I/O error".to_string()));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Storage);

        let wrapped = err.into_transaction_failure();
        assert!(matches!(wrapped, EngineError::TransactionFailed { .. }));
        assert!(wrapped.is_retryable());
        assert!(wrapped.to_string().contains("disk I/O error"));
    }

    #[test]
    fn business_errors_pass_through_wrapping() {
        let err = EngineError::InvalidTransaction("amount must be positive".to_string());
        let same = err.into_transaction_failure();
        assert_eq!(
            same,
            EngineError::InvalidTransaction("amount must be positive".to_string())
        );
        assert!(same.is_business());
        assert!(!same.is_retryable());
    }

    #[test]
    fn insufficient_funds_message_carries_amounts() {
        let account_id = Uuid::nil();
        let err = EngineError::InsufficientFunds {
            account_id,
            required: MoneyCents::new(500_000),
            available: MoneyCents::new(100_000),
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(
            err.to_string(),
            format!(
                "Insufficient funds on account {account_id}: required 5000.00, available 1000.00"
            )
        );
    }

    #[test]
    fn concurrent_update_is_retryable_but_not_business() {
        let err = EngineError::ConcurrentUpdate {
            account_id: Uuid::nil(),
            expected_version: 3,
        };
        assert!(err.is_retryable());
        assert!(!err.is_business());
    }
}
