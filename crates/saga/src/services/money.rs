//! Funds participant trait and in-memory implementation.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{Money, UserId};

use super::ParticipantOp;
use crate::error::ParticipantError;

/// Acknowledgement of a funds operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationToken {
    /// Participant-assigned reference for the operation.
    pub reference: String,
    pub user_id: UserId,
    pub amount: Money,
}

/// Trait for the funds side of the reservation protocol.
#[async_trait]
pub trait MoneyReserver: Send + Sync {
    /// Holds `amount` against the user's balance.
    async fn reserve(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError>;

    /// Deducts a previously reserved `amount` from the balance.
    async fn commit(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError>;

    /// Drops a hold. Releasing more than is held clears the hold.
    async fn release(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError>;
}

#[derive(Debug, Default)]
struct InMemoryMoneyState {
    calls: Vec<(ParticipantOp, UserId, Money)>,
    fail_on: HashSet<ParticipantOp>,
    reject_on: HashSet<ParticipantOp>,
    next_id: u32,
}

/// In-memory funds participant for testing.
///
/// Records every call and succeeds unless told to fail.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMoneyReserver {
    state: Arc<RwLock<InMemoryMoneyState>>,
}

impl InMemoryMoneyReserver {
    /// Creates a new in-memory money reserver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `op` fail as if the participant were unreachable.
    pub fn set_fail_on(&self, op: ParticipantOp, fail: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if fail {
            state.fail_on.insert(op);
        } else {
            state.fail_on.remove(&op);
        }
    }

    /// Makes `op` fail with an insufficient-funds rejection.
    pub fn set_reject_on(&self, op: ParticipantOp, reject: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if reject {
            state.reject_on.insert(op);
        } else {
            state.reject_on.remove(&op);
        }
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<(ParticipantOp, UserId, Money)> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    /// Number of calls received for `op`.
    pub fn call_count(&self, op: ParticipantOp) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .iter()
            .filter(|(called, _, _)| *called == op)
            .count()
    }

    fn handle(
        &self,
        op: ParticipantOp,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.calls.push((op, user_id, amount));

        if state.fail_on.contains(&op) {
            return Err(ParticipantError::Unavailable(format!(
                "wallet {op} unavailable"
            )));
        }
        if state.reject_on.contains(&op) {
            return Err(ParticipantError::Rejected(format!(
                "insufficient funds for user {user_id}"
            )));
        }

        state.next_id += 1;
        Ok(ReservationToken {
            reference: format!("MR-{:04}", state.next_id),
            user_id,
            amount,
        })
    }
}

#[async_trait]
impl MoneyReserver for InMemoryMoneyReserver {
    async fn reserve(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError> {
        self.handle(ParticipantOp::Reserve, user_id, amount)
    }

    async fn commit(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError> {
        self.handle(ParticipantOp::Commit, user_id, amount)
    }

    async fn release(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<ReservationToken, ParticipantError> {
        self.handle(ParticipantOp::Release, user_id, amount)
    }
}
