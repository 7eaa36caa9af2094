use thiserror::Error;
use uuid::Uuid;

/// Errors raised by outbox storage.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The outbox store cannot be reached.
    #[error("Outbox unavailable: {0}")]
    Unavailable(String),

    /// The event is not part of the claimed batch.
    #[error("Event {0} is not claimed by this batch")]
    NotClaimed(Uuid),
}

/// Errors raised by a broker producer.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Delivery timed out for topic {topic}")]
    Timeout { topic: String },
}

/// Result type for outbox storage operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
