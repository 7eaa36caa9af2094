//! The checkout step sequence and its compensation table.

use crate::state::SagaState;

/// One forward step of the checkout saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaStep {
    ReserveFunds,
    ReserveProducts,
    CommitFunds,
    CommitProducts,
    SaveEvent,
}

impl SagaStep {
    /// Every step, in the order the saga runs them.
    pub const SEQUENCE: [SagaStep; 5] = [
        SagaStep::ReserveFunds,
        SagaStep::ReserveProducts,
        SagaStep::CommitFunds,
        SagaStep::CommitProducts,
        SagaStep::SaveEvent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SagaStep::ReserveFunds => "funds reservation",
            SagaStep::ReserveProducts => "products reservation",
            SagaStep::CommitFunds => "funds commit",
            SagaStep::CommitProducts => "products commit",
            SagaStep::SaveEvent => "outbox save",
        }
    }

    /// State reached once this step succeeds.
    pub fn completed_state(&self) -> SagaState {
        match self {
            SagaStep::ReserveFunds => SagaState::FundsReserved,
            SagaStep::ReserveProducts => SagaState::ProductsReserved,
            SagaStep::CommitFunds => SagaState::FundsCommitted,
            SagaStep::CommitProducts => SagaState::ProductsCommitted,
            SagaStep::SaveEvent => SagaState::Completed,
        }
    }

    /// What is held when this step fails, or `None` if nothing is.
    pub fn compensation(&self) -> Option<CompensationPoint> {
        match self {
            SagaStep::ReserveFunds => None,
            SagaStep::ReserveProducts => Some(CompensationPoint::ReservedFunds),
            SagaStep::CommitFunds | SagaStep::CommitProducts | SagaStep::SaveEvent => {
                Some(CompensationPoint::ReservedProducts)
            }
        }
    }

    /// True once the wallet balance has been deducted, which releases
    /// cannot undo.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, SagaStep::CommitProducts | SagaStep::SaveEvent)
    }

    /// Like [`requires_reconciliation`](Self::requires_reconciliation), but
    /// also true for a funds commit whose outcome is unknown, since it may
    /// have deducted the balance before failing.
    pub fn needs_reconciliation(&self, outcome_unknown: bool) -> bool {
        self.requires_reconciliation() || (outcome_unknown && *self == SagaStep::CommitFunds)
    }

    /// Whether running out of time in this step leaves nothing applied.
    pub fn safe_on_timeout(&self) -> bool {
        matches!(self, SagaStep::ReserveFunds | SagaStep::ReserveProducts)
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How far the saga got before failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompensationPoint {
    ReservedFunds,
    ReservedProducts,
}

impl CompensationPoint {
    /// Compensating actions to issue, in order.
    pub fn actions(&self) -> &'static [CompensatingAction] {
        match self {
            CompensationPoint::ReservedFunds => &[CompensatingAction::ReleaseFunds],
            CompensationPoint::ReservedProducts => &[
                CompensatingAction::ReleaseProducts,
                CompensatingAction::ReleaseFunds,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompensatingAction {
    ReleaseProducts,
    ReleaseFunds,
}

impl CompensatingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensatingAction::ReleaseProducts => "release products",
            CompensatingAction::ReleaseFunds => "release funds",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ends_in_completed() {
        let last = SagaStep::SEQUENCE.last().unwrap();
        assert_eq!(last.completed_state(), SagaState::Completed);
    }

    #[test]
    fn test_compensation_table() {
        assert_eq!(SagaStep::ReserveFunds.compensation(), None);
        assert_eq!(
            SagaStep::ReserveProducts.compensation().map(|p| p.actions()),
            Some(&[CompensatingAction::ReleaseFunds][..])
        );
        for step in [
            SagaStep::CommitFunds,
            SagaStep::CommitProducts,
            SagaStep::SaveEvent,
        ] {
            assert_eq!(
                step.compensation().map(|p| p.actions()),
                Some(
                    &[
                        CompensatingAction::ReleaseProducts,
                        CompensatingAction::ReleaseFunds
                    ][..]
                )
            );
        }
    }

    #[test]
    fn test_reconciliation_only_after_funds_commit() {
        assert!(!SagaStep::ReserveFunds.requires_reconciliation());
        assert!(!SagaStep::ReserveProducts.requires_reconciliation());
        assert!(!SagaStep::CommitFunds.requires_reconciliation());
        assert!(SagaStep::CommitProducts.requires_reconciliation());
        assert!(SagaStep::SaveEvent.requires_reconciliation());
    }

    #[test]
    fn test_unknown_funds_commit_needs_reconciliation() {
        assert!(SagaStep::CommitFunds.needs_reconciliation(true));
        assert!(!SagaStep::CommitFunds.needs_reconciliation(false));
        assert!(!SagaStep::ReserveProducts.needs_reconciliation(true));
        assert!(SagaStep::CommitProducts.needs_reconciliation(false));
    }

    #[test]
    fn test_step_names() {
        assert_eq!(SagaStep::CommitProducts.to_string(), "products commit");
        assert_eq!(SagaStep::SaveEvent.to_string(), "outbox save");
    }
}
