//! Saga error types.

use common::{OrderId, OrderStatus, OrderValidationError};
use ledger::{ErrorKind, StoreError};
use outbox::OutboxError;
use thiserror::Error;

use crate::steps::SagaStep;

/// Errors returned by a saga participant.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// The participant refused the request on business grounds.
    #[error("{0}")]
    Rejected(String),

    /// The participant could not be reached or failed internally.
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl ParticipantError {
    pub fn is_business(&self) -> bool {
        match self {
            ParticipantError::Rejected(_) => true,
            ParticipantError::Store(e) => e.kind() == ErrorKind::Business,
            ParticipantError::Unavailable(_) | ParticipantError::Outbox(_) => false,
        }
    }

    /// True when the failed call may have been applied anyway.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            ParticipantError::Store(e) => e.outcome_unknown(),
            _ => false,
        }
    }
}

/// Errors that can occur while executing a checkout saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The order failed validation; nothing was reserved.
    #[error("invalid order: {0}")]
    Validation(#[from] OrderValidationError),

    /// The order has already been through the saga.
    #[error("order {order_id} is already {status}")]
    AlreadyFinished {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// A forward step failed. Compensation has run by the time this is
    /// returned.
    #[error("{step} failed: {source}")]
    StepFailed {
        step: SagaStep,
        #[source]
        source: ParticipantError,
    },
}

impl SagaError {
    /// True when the checkout was rejected by a business rule (insufficient
    /// funds or stock) rather than an infrastructure failure.
    pub fn is_business(&self) -> bool {
        match self {
            SagaError::StepFailed { source, .. } => source.is_business(),
            SagaError::Validation(_) | SagaError::AlreadyFinished { .. } => false,
        }
    }

    /// True when the failure may have left funds deducted that the
    /// compensating releases cannot return.
    pub fn requires_reconciliation(&self) -> bool {
        match self {
            SagaError::StepFailed { step, source } => {
                step.needs_reconciliation(source.outcome_unknown())
            }
            _ => false,
        }
    }

    /// The step that failed, if any step ran.
    pub fn failed_step(&self) -> Option<SagaStep> {
        match self {
            SagaError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
