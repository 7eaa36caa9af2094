//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a checkout saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Init ──► FundsReserved ──► ProductsReserved ──► FundsCommitted ──► ProductsCommitted ──► Completed
///   │            │                  │                   │                    │
///   └────────────┴──────────────────┴───────────────────┴────────────────────┴──► RollingBack ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// No step has run yet.
    #[default]
    Init,

    /// The order total is held in the wallet.
    FundsReserved,

    /// Every line item is held in the product ledger.
    ProductsReserved,

    /// The wallet balance has been deducted.
    FundsCommitted,

    /// Product stock has been deducted.
    ProductsCommitted,

    /// The completion event is in the outbox (terminal state).
    Completed,

    /// A step failed and compensating actions are in progress.
    RollingBack,

    /// Compensation finished after a failure (terminal state).
    Failed,
}

impl SagaState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Init => "Init",
            SagaState::FundsReserved => "FundsReserved",
            SagaState::ProductsReserved => "ProductsReserved",
            SagaState::FundsCommitted => "FundsCommitted",
            SagaState::ProductsCommitted => "ProductsCommitted",
            SagaState::Completed => "Completed",
            SagaState::RollingBack => "RollingBack",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_init() {
        assert_eq!(SagaState::default(), SagaState::Init);
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaState::Init.to_string(), "Init");
        assert_eq!(SagaState::ProductsReserved.to_string(), "ProductsReserved");
        assert_eq!(SagaState::RollingBack.to_string(), "RollingBack");
    }

    #[test]
    fn test_serialization() {
        let state = SagaState::FundsCommitted;
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: SagaState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
