use async_trait::async_trait;
use common::CheckoutOrder;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    NewOutboxEvent, OutboxBatch, OutboxError, OutboxEvent, OutboxRepository, OutboxStatus,
    OutboxWriter, Result,
};

const COLUMNS: &str = "id, aggregate_id, aggregate_type, event_type, payload, status, \
                       created_at, processed_at";

/// PostgreSQL-backed outbox.
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: &PgRow) -> Result<OutboxEvent> {
        Ok(OutboxEvent {
            id: row.try_get("id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn insert(&self, event: NewOutboxEvent) -> Result<OutboxEvent> {
        let event = event.into_pending();

        sqlx::query(
            r#"
            INSERT INTO outbox
                (id, aggregate_id, aggregate_type, event_type, payload, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn claim_pending(&self, limit: usize) -> Result<Box<dyn OutboxBatch>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM outbox WHERE status = 'pending' \
             ORDER BY created_at ASC LIMIT $1 FOR UPDATE SKIP LOCKED"
        ))
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let events = rows
            .iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;

        Ok(Box::new(PostgresOutboxBatch { tx, events }))
    }

    async fn find_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM outbox WHERE aggregate_id = $1 ORDER BY created_at ASC"
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn requeue_failed(&self, limit: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox SET status = 'pending'
            WHERE id IN (
                SELECT id FROM outbox WHERE status = 'failed'
                ORDER BY created_at ASC LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(limit as i64)
        .execute(&self.pool)
        .await?;

        tracing::info!(requeued = result.rows_affected(), "Requeued failed outbox events");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OutboxWriter for PostgresOutboxRepository {
    async fn save_event(&self, order: &CheckoutOrder) -> Result<()> {
        let event = self.insert(NewOutboxEvent::checkout_completed(order)?).await?;
        metrics::counter!("outbox_events_saved").increment(1);
        tracing::debug!(event_id = %event.id, aggregate_id = %event.aggregate_id, "Event saved");
        Ok(())
    }
}

/// Claimed rows plus the transaction holding their locks.
struct PostgresOutboxBatch {
    tx: Transaction<'static, Postgres>,
    events: Vec<OutboxEvent>,
}

impl PostgresOutboxBatch {
    async fn set_status(&mut self, id: Uuid, status: OutboxStatus) -> Result<()> {
        if !self.events.iter().any(|e| e.id == id) {
            return Err(OutboxError::NotClaimed(id));
        }

        sqlx::query(
            r#"
            UPDATE outbox
            SET status = $1,
                processed_at = CASE WHEN $1 = 'processed'::outbox_status THEN NOW() END
            WHERE id = $2
            "#,
        )
        .bind(status)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OutboxBatch for PostgresOutboxBatch {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_processed(&mut self, id: Uuid) -> Result<()> {
        self.set_status(id, OutboxStatus::Processed).await
    }

    async fn mark_failed(&mut self, id: Uuid) -> Result<()> {
        self.set_status(id, OutboxStatus::Failed).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
