//! Redis access layer. One `ConnectionManager` is shared by the tracking
//! store, the job queue, and ad-hoc caching; it reconnects on its own, so
//! callers just clone the service.

pub mod error;

pub use error::{CacheError, CacheResult};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CacheService {
    manager: ConnectionManager,
}

impl CacheService {
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    /// Raw connection handle for modules that need commands beyond the typed
    /// helpers (the job queue's lists and sorted sets).
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> CacheResult<()> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, serialized, ttl_seconds).await?;
        debug!(key, ttl_seconds, "cache set");
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.manager.clone();
        let deleted: i32 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    pub async fn health_check(&self) -> bool {
        let mut conn = self.manager.clone();
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(response) => response == "PONG",
            Err(e) => {
                warn!(error = %e, "redis health check failed");
                false
            }
        }
    }
}
