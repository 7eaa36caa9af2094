use std::time::Duration;

use common::{Money, ProductId, UserId};
use thiserror::Error;

use crate::retry::is_transient_message;

/// How a failure should be handled by the layers above the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expected to succeed on retry (lock contention, serialization failure).
    Transient,
    /// A business rule rejected the operation (insufficient funds or stock).
    Business,
    /// Infrastructure failure that retrying will not fix.
    Permanent,
}

/// Errors returned by the participant stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("insufficient funds for user {user_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        user_id: UserId,
        requested: Money,
        available: Money,
    },

    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    #[error("wallet not found for user {0}")]
    WalletNotFound(UserId),

    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// A commit asked for more than the row holds or has reserved.
    #[error("cannot commit {amount} against {entity}: total {total}, reserved {reserved}")]
    CommitExceedsReservation {
        entity: String,
        amount: i64,
        total: i64,
        reserved: i64,
    },

    #[error("{op} deadline exceeded after {timeout:?}")]
    DeadlineExceeded {
        op: String,
        timeout: Duration,
        retryable: bool,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{op} failed: {source}")]
    OperationFailed {
        op: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("{op} failed after {attempts} attempts")]
    RetriesExhausted { op: String, attempts: u32 },
}

impl StoreError {
    /// Classifies the error for retry and compensation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InsufficientFunds { .. }
            | StoreError::InsufficientStock { .. }
            | StoreError::WalletNotFound(_)
            | StoreError::ProductNotFound(_)
            | StoreError::InvalidAmount(_) => ErrorKind::Business,
            StoreError::CommitExceedsReservation { .. } | StoreError::RetriesExhausted { .. } => {
                ErrorKind::Permanent
            }
            StoreError::DeadlineExceeded { retryable, .. } => {
                if *retryable {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            StoreError::Database(e) => classify_database_error(e),
            StoreError::OperationFailed { source, .. } => source.kind(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_business(&self) -> bool {
        self.kind() == ErrorKind::Business
    }

    /// True when the operation may have been applied even though it failed:
    /// a call that must not be retried ran out of time.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            StoreError::DeadlineExceeded { retryable, .. } => !retryable,
            StoreError::OperationFailed { source, .. } => source.outcome_unknown(),
            _ => false,
        }
    }
}

// 40001 serialization_failure, 40P01 deadlock_detected
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01"];

fn classify_database_error(err: &sqlx::Error) -> ErrorKind {
    if let sqlx::Error::Database(db_err) = err
        && let Some(code) = db_err.code()
        && TRANSIENT_SQLSTATES.contains(&&*code)
    {
        return ErrorKind::Transient;
    }

    if is_transient_message(&err.to_string()) {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
