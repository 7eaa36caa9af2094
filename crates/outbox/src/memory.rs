use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use common::CheckoutOrder;
use uuid::Uuid;

use crate::{
    NewOutboxEvent, OutboxBatch, OutboxError, OutboxEvent, OutboxRepository, OutboxStatus,
    OutboxWriter, Result,
};

#[derive(Default)]
struct State {
    rows: Vec<OutboxEvent>,
    claimed: HashSet<Uuid>,
}

/// In-memory outbox for tests and local runs.
///
/// Claims emulate `SKIP LOCKED`: a row held by a live batch is invisible to
/// other claims until that batch commits or is dropped.
#[derive(Clone, Default)]
pub struct InMemoryOutboxRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row in insertion order.
    pub fn events(&self) -> Vec<OutboxEvent> {
        lock(&self.state).rows.clone()
    }

    pub fn count_with_status(&self, status: OutboxStatus) -> usize {
        lock(&self.state)
            .rows
            .iter()
            .filter(|e| e.status == status)
            .count()
    }
}

// Status updates never leave the state half-written, so a poisoned lock is
// still consistent.
fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn insert(&self, event: NewOutboxEvent) -> Result<OutboxEvent> {
        let event = event.into_pending();
        lock(&self.state).rows.push(event.clone());
        Ok(event)
    }

    async fn claim_pending(&self, limit: usize) -> Result<Box<dyn OutboxBatch>> {
        let mut state = lock(&self.state);

        let mut pending: Vec<OutboxEvent> = state
            .rows
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending && !state.claimed.contains(&e.id))
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit);

        state.claimed.extend(pending.iter().map(|e| e.id));

        Ok(Box::new(InMemoryBatch {
            state: self.state.clone(),
            events: pending,
            updates: HashMap::new(),
        }))
    }

    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>> {
        Ok(lock(&self.state)
            .rows
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn requeue_failed(&self, limit: usize) -> Result<u64> {
        let mut state = lock(&self.state);
        let State { rows, claimed } = &mut *state;

        let mut requeued = 0;
        for row in rows
            .iter_mut()
            .filter(|e| e.status == OutboxStatus::Failed && !claimed.contains(&e.id))
            .take(limit)
        {
            row.status = OutboxStatus::Pending;
            requeued += 1;
        }
        Ok(requeued)
    }
}

#[async_trait]
impl OutboxWriter for InMemoryOutboxRepository {
    async fn save_event(&self, order: &CheckoutOrder) -> Result<()> {
        let event = self.insert(NewOutboxEvent::checkout_completed(order)?).await?;
        metrics::counter!("outbox_events_saved").increment(1);
        tracing::debug!(event_id = %event.id, aggregate_id = %event.aggregate_id, "Event saved");
        Ok(())
    }
}

struct InMemoryBatch {
    state: Arc<Mutex<State>>,
    events: Vec<OutboxEvent>,
    updates: HashMap<Uuid, OutboxStatus>,
}

impl InMemoryBatch {
    fn record(&mut self, id: Uuid, status: OutboxStatus) -> Result<()> {
        if !self.events.iter().any(|e| e.id == id) {
            return Err(OutboxError::NotClaimed(id));
        }
        self.updates.insert(id, status);
        Ok(())
    }
}

#[async_trait]
impl OutboxBatch for InMemoryBatch {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_processed(&mut self, id: Uuid) -> Result<()> {
        self.record(id, OutboxStatus::Processed)
    }

    async fn mark_failed(&mut self, id: Uuid) -> Result<()> {
        self.record(id, OutboxStatus::Failed)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let updates = std::mem::take(&mut self.updates);
        let mut state = lock(&self.state);
        let now = Utc::now();
        for row in state.rows.iter_mut() {
            if let Some(status) = updates.get(&row.id) {
                row.status = *status;
                if *status == OutboxStatus::Processed {
                    row.processed_at = Some(now);
                }
            }
        }
        // Claims are released by Drop.
        Ok(())
    }
}

impl Drop for InMemoryBatch {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        for event in &self.events {
            state.claimed.remove(&event.id);
        }
    }
}
