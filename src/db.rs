use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::Config;

/// Build the shared pool and fail fast if the database is unreachable.
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_conns)
        .min_connections(config.db_min_conns)
        .idle_timeout(config.db_max_conn_idle_time.duration())
        .max_lifetime(config.db_max_conn_lifetime.duration())
        .acquire_timeout(config.db_connect_timeout.duration())
        .test_before_acquire(true)
        .connect_lazy(&config.database_url)?;

    // startup ping, bounded by the connect timeout
    tokio::time::timeout(
        config.db_connect_timeout.duration(),
        sqlx::query("SELECT 1").execute(&pool),
    )
    .await
    .map_err(|_| sqlx::Error::PoolTimedOut)??;

    Ok(pool)
}

/// Periodic pool ping; sqlx has no background health check of its own, so
/// this stands in for it and surfaces connectivity loss in the log.
pub fn spawn_healthcheck(pool: PgPool, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // the first tick completes immediately
        loop {
            interval.tick().await;
            if let Err(error) = sqlx::query("SELECT 1").execute(&pool).await {
                warn!(component = "db_healthcheck", error = %error, "database ping failed");
            }
        }
    })
}
