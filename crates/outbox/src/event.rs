use chrono::{DateTime, Utc};
use common::CheckoutOrder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Aggregate type recorded on checkout events.
pub const AGGREGATE_TYPE: &str = "Order";

/// Event type, also used as the broker topic, for a completed checkout.
pub const CHECKOUT_COMPLETED: &str = "CheckoutCompleted";

/// Delivery status of an outbox row.
///
/// ```text
/// pending ──┬──► processed
///           └──► failed ──(operator requeue)──► pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event waiting to be written to the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Vec<u8>,
}

impl NewOutboxEvent {
    /// Builds the completion event for a checkout, with the serialized
    /// order as payload.
    pub fn checkout_completed(order: &CheckoutOrder) -> Result<Self> {
        Ok(Self {
            aggregate_id: order.order_id.to_string(),
            aggregate_type: AGGREGATE_TYPE.to_string(),
            event_type: CHECKOUT_COMPLETED.to_string(),
            payload: serde_json::to_vec(order)?,
        })
    }

    /// Assigns an ID and creation time, producing a pending row.
    pub(crate) fn into_pending(self) -> OutboxEvent {
        OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            event_type: self.event_type,
            payload: self.payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// A stored outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Deserializes the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
