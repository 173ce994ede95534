//! Health checks for the process and its dependencies: database, redis, and
//! a summary of the bot fleet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::error;

use crate::bots::BotStatus;
use crate::cache::CacheService;
use crate::database;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub up: bool,
    pub response_time_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ComponentHealth {
    fn up(elapsed: Duration) -> Self {
        Self {
            up: true,
            response_time_ms: Some(elapsed.as_millis()),
            details: None,
        }
    }

    fn down(details: String) -> Self {
        Self {
            up: false,
            response_time_ms: None,
            details: Some(details),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct BotFleetHealth {
    pub active: usize,
    pub failed: usize,
    pub dead: usize,
    pub total: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub bots: BotFleetHealth,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthStatus {
    /// Degraded still answers 200; only a hard dependency failure flips the
    /// probe.
    pub fn is_healthy(&self) -> bool {
        self.status != HealthState::Unhealthy
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    db_pool: sqlx::PgPool,
    cache: CacheService,
    bot_statuses: Arc<RwLock<HashMap<i64, BotStatus>>>,
}

impl HealthChecker {
    pub fn new(
        db_pool: sqlx::PgPool,
        cache: CacheService,
        bot_statuses: Arc<RwLock<HashMap<i64, BotStatus>>>,
    ) -> Self {
        Self {
            db_pool,
            cache,
            bot_statuses,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        let mut healthy = true;

        let started = Instant::now();
        match timeout(CHECK_TIMEOUT, database::health_check(&self.db_pool)).await {
            Ok(Ok(())) => {
                checks.insert("database".to_string(), ComponentHealth::up(started.elapsed()));
            }
            Ok(Err(e)) => {
                healthy = false;
                error!(error = %e, "database health check failed");
                checks.insert("database".to_string(), ComponentHealth::down(e.to_string()));
            }
            Err(_) => {
                healthy = false;
                checks.insert(
                    "database".to_string(),
                    ComponentHealth::down("timeout".to_string()),
                );
            }
        }

        let started = Instant::now();
        match timeout(CHECK_TIMEOUT, self.cache.health_check()).await {
            Ok(true) => {
                checks.insert("redis".to_string(), ComponentHealth::up(started.elapsed()));
            }
            Ok(false) => {
                healthy = false;
                checks.insert(
                    "redis".to_string(),
                    ComponentHealth::down("ping failed".to_string()),
                );
            }
            Err(_) => {
                healthy = false;
                checks.insert(
                    "redis".to_string(),
                    ComponentHealth::down("timeout".to_string()),
                );
            }
        }

        let bots = self.fleet_summary().await;
        // Dead bots degrade the report without failing the probe; the process
        // itself is still serving webhooks.
        let status = if !healthy {
            HealthState::Unhealthy
        } else if bots.dead > 0 || bots.failed > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthStatus {
            status,
            checks,
            bots,
            timestamp: chrono::Utc::now(),
        }
    }

    pub async fn check_readiness(&self) -> bool {
        database::health_check(&self.db_pool).await.is_ok() && self.cache.health_check().await
    }

    async fn fleet_summary(&self) -> BotFleetHealth {
        let statuses = self.bot_statuses.read().await;
        let mut summary = BotFleetHealth {
            active: 0,
            failed: 0,
            dead: 0,
            total: statuses.len(),
        };
        for status in statuses.values() {
            match status {
                BotStatus::Active => summary.active += 1,
                BotStatus::Failed => summary.failed += 1,
                BotStatus::Dead => summary.dead += 1,
                BotStatus::Initializing | BotStatus::Shutdown => {}
            }
        }
        summary
    }
}
