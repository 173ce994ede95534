pub mod bot_repository;
pub mod error;
pub mod gateway_repository;
pub mod payment_repository;
pub mod pool_repository;

pub use bot_repository::{Bot, BotPlan, BotRepository, BotUser, Downsell, OrderBump};
pub use error::{DatabaseError, DatabaseResult};
pub use gateway_repository::{GatewayRecord, GatewayRepository};
pub use payment_repository::{NewPayment, Payment, PaymentRepository};
pub use pool_repository::{PoolRepository, RedirectPool};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error as log_error, info, warn};

use crate::config::DatabaseConfig;

pub async fn init_pool(config: &DatabaseConfig) -> DatabaseResult<PgPool> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(config.idle_timeout.map(Duration::from_secs))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await
        .map_err(|e| {
            log_error!("failed to initialize database pool: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
    info!("database pool ready");
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> DatabaseResult<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!("database health check failed: {}", e);
        DatabaseError::from_sqlx(e)
    })?;
    Ok(())
}
