//! Transactional outbox for checkout completion events.
//!
//! The saga writes one [`OutboxEvent`] per completed checkout through the
//! [`OutboxWriter`] seam. An [`OutboxPublisher`] polls for pending rows,
//! relays them to a broker [`Producer`] and records the outcome on each
//! row. Rows are never deleted: the table doubles as the delivery audit log.
//!
//! Pending rows are claimed with `FOR UPDATE SKIP LOCKED`, so any number of
//! publisher instances can share the table without handling a row twice.
//! Rows marked `failed` stay failed until an operator calls
//! [`OutboxRepository::requeue_failed`].

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod producer;
pub mod publisher;
pub mod repository;

pub use error::{OutboxError, PublishError, Result};
pub use event::{AGGREGATE_TYPE, CHECKOUT_COMPLETED, NewOutboxEvent, OutboxEvent, OutboxStatus};
pub use memory::InMemoryOutboxRepository;
pub use postgres::PostgresOutboxRepository;
#[cfg(feature = "kafka")]
pub use producer::KafkaProducer;
pub use producer::{DeliveryAck, InMemoryProducer, LogProducer, Producer, PublishedMessage};
pub use publisher::{OutboxConfig, OutboxPublisher, PublishReport, PublisherHandle, spawn_publisher};
pub use repository::{OutboxBatch, OutboxRepository, OutboxWriter};
