//! PostgreSQL pool and schema migrations.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;
use crate::error::WorkerError;

/// Connects to PostgreSQL and brings the schema up to date.
#[tracing::instrument(skip(config), fields(max_connections = config.db_max_connections))]
pub async fn connect(config: &Config) -> Result<PgPool, WorkerError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    run_migrations(&pool).await?;
    tracing::info!("database ready");

    Ok(pool)
}

/// Runs the migrations embedded from `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), WorkerError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
