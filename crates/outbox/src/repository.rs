use async_trait::async_trait;
use common::CheckoutOrder;
use uuid::Uuid;

use crate::{NewOutboxEvent, OutboxEvent, Result};

/// Write side used by the saga's final step.
#[async_trait]
pub trait OutboxWriter: Send + Sync {
    /// Records a `CheckoutCompleted` event for the order.
    async fn save_event(&self, order: &CheckoutOrder) -> Result<()>;
}

/// Storage for outbox rows.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Inserts a new pending row.
    async fn insert(&self, event: NewOutboxEvent) -> Result<OutboxEvent>;

    /// Claims up to `limit` pending rows, oldest first.
    ///
    /// Rows claimed by another live batch are skipped rather than waited on.
    /// The claim is held until the batch is committed or dropped; a dropped
    /// batch leaves its rows pending.
    async fn claim_pending(&self, limit: usize) -> Result<Box<dyn OutboxBatch>>;

    /// All rows for one aggregate, oldest first.
    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>>;

    /// Moves up to `limit` failed rows back to pending. Returns the count.
    async fn requeue_failed(&self, limit: usize) -> Result<u64>;
}

/// A set of claimed rows and the status changes recorded against them.
#[async_trait]
pub trait OutboxBatch: Send {
    fn events(&self) -> &[OutboxEvent];

    async fn mark_processed(&mut self, id: Uuid) -> Result<()>;

    async fn mark_failed(&mut self, id: Uuid) -> Result<()>;

    /// Persists the recorded status changes and releases the claim.
    async fn commit(self: Box<Self>) -> Result<()>;
}
