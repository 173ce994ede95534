use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::database::error::{DatabaseError, DatabaseResult};

/// A redirect pool: a group of bots sharing one Meta Pixel identity.
/// `access_token` is stored encrypted.
#[derive(Debug, Clone, FromRow)]
pub struct RedirectPool {
    pub id: i64,
    pub seller_id: i64,
    pub name: String,
    pub pixel_id: Option<String>,
    pub access_token: Option<String>,
    pub meta_tracking_enabled: bool,
    pub send_pageview: bool,
    pub send_viewcontent: bool,
    pub send_purchase: bool,
    pub test_event_code: Option<String>,
    pub cloaker_param: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RedirectPool {
    /// A pool may only emit events when tracking is on and both pixel
    /// credentials are present.
    pub fn can_emit_events(&self) -> bool {
        self.meta_tracking_enabled
            && self.pixel_id.as_deref().is_some_and(|p| !p.is_empty())
            && self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

const POOL_COLUMNS: &str = "id, seller_id, name, pixel_id, access_token, meta_tracking_enabled, \
     send_pageview, send_viewcontent, send_purchase, test_event_code, cloaker_param, created_at";

#[derive(Clone)]
pub struct PoolRepository {
    pool: PgPool,
}

impl PoolRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<RedirectPool>> {
        sqlx::query_as::<_, RedirectPool>(&format!(
            "SELECT {POOL_COLUMNS} FROM redirect_pools WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_for_bot(&self, bot_id: i64) -> DatabaseResult<Option<RedirectPool>> {
        sqlx::query_as::<_, RedirectPool>(&format!(
            "SELECT {POOL_COLUMNS} FROM redirect_pools p \
             JOIN pool_bots pb ON pb.pool_id = p.id \
             WHERE pb.bot_id = $1"
        ))
        .bind(bot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn update_pixel_config(
        &self,
        id: i64,
        pixel_id: Option<&str>,
        encrypted_access_token: Option<&str>,
        send_pageview: bool,
        send_viewcontent: bool,
        send_purchase: bool,
        test_event_code: Option<&str>,
    ) -> DatabaseResult<Option<RedirectPool>> {
        sqlx::query_as::<_, RedirectPool>(&format!(
            "UPDATE redirect_pools SET \
                 pixel_id = $2, \
                 access_token = COALESCE($3, access_token), \
                 send_pageview = $4, send_viewcontent = $5, send_purchase = $6, \
                 test_event_code = $7, \
                 meta_tracking_enabled = ($2 IS NOT NULL AND COALESCE($3, access_token) IS NOT NULL) \
             WHERE id = $1 \
             RETURNING {POOL_COLUMNS}"
        ))
        .bind(id)
        .bind(pixel_id)
        .bind(encrypted_access_token)
        .bind(send_pageview)
        .bind(send_viewcontent)
        .bind(send_purchase)
        .bind(test_event_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(pixel: Option<&str>, token: Option<&str>, enabled: bool) -> RedirectPool {
        RedirectPool {
            id: 1,
            seller_id: 1,
            name: "pool".to_string(),
            pixel_id: pixel.map(String::from),
            access_token: token.map(String::from),
            meta_tracking_enabled: enabled,
            send_pageview: true,
            send_viewcontent: true,
            send_purchase: true,
            test_event_code: None,
            cloaker_param: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn emission_requires_pixel_and_token() {
        assert!(pool_with(Some("123"), Some("tok"), true).can_emit_events());
        assert!(!pool_with(None, Some("tok"), true).can_emit_events());
        assert!(!pool_with(Some("123"), Some(""), true).can_emit_events());
        assert!(!pool_with(Some("123"), Some("tok"), false).can_emit_events());
    }
}
