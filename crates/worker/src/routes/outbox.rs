//! Outbox audit and operator endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use outbox::{OutboxEvent, OutboxRepository};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Shared state for the outbox endpoints.
pub struct OutboxState<R: OutboxRepository> {
    pub repository: R,
}

/// Largest batch an operator may requeue in one request.
pub const MAX_REQUEUE: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct RequeueParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequeueResponse {
    pub requeued: u64,
}

#[derive(Debug, Serialize)]
pub struct OutboxEventResponse {
    pub id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<OutboxEvent> for OutboxEventResponse {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type,
            event_type: event.event_type,
            status: event.status.to_string(),
            created_at: event.created_at,
            processed_at: event.processed_at,
        }
    }
}

/// GET /outbox/events/{aggregate_id}: delivery history for one order.
#[tracing::instrument(skip(state))]
pub async fn events<R: OutboxRepository + 'static>(
    State(state): State<Arc<OutboxState<R>>>,
    Path(aggregate_id): Path<String>,
) -> Result<Json<Vec<OutboxEventResponse>>, ApiError> {
    let events = state.repository.find_by_aggregate(&aggregate_id).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

/// POST /outbox/requeue?limit=N: moves failed rows back to pending.
#[tracing::instrument(skip(state))]
pub async fn requeue<R: OutboxRepository + 'static>(
    State(state): State<Arc<OutboxState<R>>>,
    Query(params): Query<RequeueParams>,
) -> Result<Json<RequeueResponse>, ApiError> {
    let limit = params.limit.unwrap_or(100);
    if limit == 0 || limit > MAX_REQUEUE {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_REQUEUE}"
        )));
    }

    let requeued = state.repository.requeue_failed(limit).await?;
    metrics::counter!("outbox_events_requeued").increment(requeued);
    tracing::info!(requeued, "operator requeued failed outbox events");
    Ok(Json(RequeueResponse { requeued }))
}
