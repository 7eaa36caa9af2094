//! Checkout worker entry point.

use std::sync::Arc;

use outbox::{OutboxPublisher, PostgresOutboxRepository, spawn_publisher};
use tokio::signal;
use worker::config::Config;
use worker::error::WorkerError;
use worker::routes::outbox::OutboxState;
use worker::{db, telemetry};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn run(config: Config) -> Result<(), WorkerError> {
    let metrics_handle = telemetry::install_metrics()?;
    let pool = db::connect(&config).await?;

    let repository = PostgresOutboxRepository::new(pool.clone());
    let producer = worker::build_producer(&config)?;
    let publisher = spawn_publisher(OutboxPublisher::new(
        repository.clone(),
        producer,
        config.outbox,
    ));

    let app = worker::create_ops_app(Arc::new(OutboxState { repository }), metrics_handle);
    let listener = tokio::net::TcpListener::bind(config.ops_addr).await?;
    tracing::info!(addr = %config.ops_addr, "serving ops endpoints");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    publisher.stop().await;
    pool.close().await;
    served?;

    tracing::info!("worker shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("checkout-worker: {e}");
            std::process::exit(2);
        }
    };

    telemetry::init_tracing(config.log_format);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "worker stopped with an error");
        std::process::exit(1);
    }
}
