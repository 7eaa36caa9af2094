//! Product participant trait and in-memory implementation.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::LineItem;

use super::ParticipantOp;
use crate::error::ParticipantError;

/// Trait for the stock side of the reservation protocol.
///
/// Each call covers the whole batch: it either applies to every item or to
/// none. Items arrive sorted by product ID. `Ok(false)` means the
/// participant declined the batch.
#[async_trait]
pub trait ProductsReserver: Send + Sync {
    async fn reserve(&self, items: &[LineItem]) -> Result<bool, ParticipantError>;

    async fn commit(&self, items: &[LineItem]) -> Result<bool, ParticipantError>;

    async fn release(&self, items: &[LineItem]) -> Result<bool, ParticipantError>;
}

#[derive(Debug, Default)]
struct InMemoryProductsState {
    calls: Vec<(ParticipantOp, Vec<LineItem>)>,
    fail_on: HashSet<ParticipantOp>,
    decline_on: HashSet<ParticipantOp>,
}

/// In-memory product participant for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductsReserver {
    state: Arc<RwLock<InMemoryProductsState>>,
}

impl InMemoryProductsReserver {
    /// Creates a new in-memory products reserver.
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

    /// Makes `op` answer `Ok(false)`.
    pub fn set_decline_on(&self, op: ParticipantOp, decline: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if decline {
            state.decline_on.insert(op);
        } else {
            state.decline_on.remove(&op);
        }
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<(ParticipantOp, Vec<LineItem>)> {
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
            .filter(|(called, _)| *called == op)
            .count()
    }

    fn handle(&self, op: ParticipantOp, items: &[LineItem]) -> Result<bool, ParticipantError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.calls.push((op, items.to_vec()));

        if state.fail_on.contains(&op) {
            return Err(ParticipantError::Unavailable(format!(
                "inventory {op} unavailable"
            )));
        }
        Ok(!state.decline_on.contains(&op))
    }
}

#[async_trait]
impl ProductsReserver for InMemoryProductsReserver {
    async fn reserve(&self, items: &[LineItem]) -> Result<bool, ParticipantError> {
        self.handle(ParticipantOp::Reserve, items)
    }

    async fn commit(&self, items: &[LineItem]) -> Result<bool, ParticipantError> {
        self.handle(ParticipantOp::Commit, items)
    }

    async fn release(&self, items: &[LineItem]) -> Result<bool, ParticipantError> {
        self.handle(ParticipantOp::Release, items)
    }
}

#[cfg(test)]
mod tests {
    use common::ProductId;

    use super::*;

    #[tokio::test]
    async fn test_records_batches() {
        let reserver = InMemoryProductsReserver::new();
        let items = vec![LineItem::new(ProductId::new(1), 2)];

        assert!(reserver.reserve(&items).await.unwrap());
        assert_eq!(reserver.calls(), vec![(ParticipantOp::Reserve, items)]);
    }

    #[tokio::test]
    async fn test_decline_returns_false() {
        let reserver = InMemoryProductsReserver::new();
        reserver.set_decline_on(ParticipantOp::Reserve, true);

        let items = vec![LineItem::new(ProductId::new(1), 2)];
        assert!(!reserver.reserve(&items).await.unwrap());
        assert_eq!(reserver.call_count(ParticipantOp::Reserve), 1);
    }

    #[tokio::test]
    async fn test_fail_on_commit() {
        let reserver = InMemoryProductsReserver::new();
        reserver.set_fail_on(ParticipantOp::Commit, true);

        let items = vec![LineItem::new(ProductId::new(1), 1)];
        let err = reserver.commit(&items).await.unwrap_err();
        assert!(matches!(err, ParticipantError::Unavailable(_)));
    }
}
