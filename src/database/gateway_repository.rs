use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::warn;

use crate::database::error::{DatabaseError, DatabaseResult};

/// A seller's configured gateway. `credentials` holds the encrypted secret
/// map; plaintext never touches the database.
#[derive(Debug, Clone, FromRow)]
pub struct GatewayRecord {
    pub id: i64,
    pub seller_id: i64,
    pub gateway_type: String,
    pub credentials: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub split_percentage: i32,
    pub created_at: DateTime<Utc>,
}

const GATEWAY_COLUMNS: &str =
    "id, seller_id, gateway_type, credentials, is_active, is_verified, split_percentage, created_at";

#[derive(Clone)]
pub struct GatewayRepository {
    pool: PgPool,
}

impl GatewayRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gateways eligible for charge routing: active and verified, in stable
    /// order so the round-robin selector cycles deterministically.
    pub async fn list_eligible_for_seller(
        &self,
        seller_id: i64,
    ) -> DatabaseResult<Vec<GatewayRecord>> {
        sqlx::query_as::<_, GatewayRecord>(&format!(
            "SELECT {GATEWAY_COLUMNS} FROM gateways \
             WHERE seller_id = $1 AND is_active = true AND is_verified = true \
             ORDER BY id ASC"
        ))
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<GatewayRecord>> {
        sqlx::query_as::<_, GatewayRecord>(&format!(
            "SELECT {GATEWAY_COLUMNS} FROM gateways WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_for_seller_and_type(
        &self,
        seller_id: i64,
        gateway_type: &str,
    ) -> DatabaseResult<Option<GatewayRecord>> {
        sqlx::query_as::<_, GatewayRecord>(&format!(
            "SELECT {GATEWAY_COLUMNS} FROM gateways \
             WHERE seller_id = $1 AND gateway_type = $2 AND is_active = true \
             ORDER BY id ASC LIMIT 1"
        ))
        .bind(seller_id)
        .bind(gateway_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Flips a gateway to unverified after an upstream 401/403 so the seller
    /// sees the broken credential in their panel.
    pub async fn mark_unverified(&self, id: i64) -> DatabaseResult<()> {
        warn!(gateway_id = id, "marking gateway unverified after auth failure");
        sqlx::query("UPDATE gateways SET is_verified = false WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn mark_verified(&self, id: i64) -> DatabaseResult<()> {
        sqlx::query("UPDATE gateways SET is_verified = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
