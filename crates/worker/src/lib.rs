//! Checkout worker: wiring for the saga coordinator, the outbox publisher
//! and the ops HTTP endpoints.
//!
//! The binary connects to PostgreSQL, starts an outbox publisher on a
//! background task and serves `/health`, `/metrics` and the outbox
//! operator endpoints until it receives SIGINT or SIGTERM.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ledger::{PostgresProductStore, PostgresWalletStore};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{LogProducer, OutboxRepository, PostgresOutboxRepository, Producer};
use saga::{ProductsParticipant, SagaCoordinator, WalletParticipant};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use config::Config;
use error::WorkerError;
use routes::outbox::OutboxState;

/// Coordinator backed by the PostgreSQL stores and outbox table.
pub type PostgresCoordinator = SagaCoordinator<
    WalletParticipant<PostgresWalletStore>,
    ProductsParticipant<PostgresProductStore>,
    PostgresOutboxRepository,
>;

/// Creates the ops router with all routes and shared state.
pub fn create_ops_app<R: OutboxRepository + 'static>(
    state: Arc<OutboxState<R>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/outbox/requeue", post(routes::outbox::requeue::<R>))
        .route("/outbox/events/{aggregate_id}", get(routes::outbox::events::<R>))
        .with_state(state)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}

/// Builds a coordinator whose participant calls share the configured
/// retry policy and per-call timeout.
pub fn build_coordinator(pool: &PgPool, config: &Config) -> PostgresCoordinator {
    let wallet = WalletParticipant::with_policy(
        PostgresWalletStore::new(pool.clone()),
        config.retry,
        config.participant_timeout,
    );
    let products = ProductsParticipant::with_policy(
        PostgresProductStore::new(pool.clone()),
        config.retry,
        config.participant_timeout,
    );

    SagaCoordinator::new(wallet, products, PostgresOutboxRepository::new(pool.clone()))
}

/// Picks the broker producer: Kafka when brokers are configured and the
/// `kafka` feature is built in, the log otherwise.
pub fn build_producer(config: &Config) -> Result<Box<dyn Producer>, WorkerError> {
    match config.kafka_brokers.as_deref() {
        #[cfg(feature = "kafka")]
        Some(brokers) => {
            let producer = outbox::KafkaProducer::new(brokers, config.kafka_delivery_timeout)?;
            tracing::info!(brokers, "publishing outbox events to Kafka");
            Ok(Box::new(producer))
        }
        #[cfg(not(feature = "kafka"))]
        Some(brokers) => {
            tracing::warn!(
                brokers,
                "KAFKA_BROKERS is set but the worker was built without the kafka feature"
            );
            Ok(Box::new(LogProducer))
        }
        None => {
            tracing::info!("no broker configured; outbox events go to the log");
            Ok(Box::new(LogProducer))
        }
    }
}
