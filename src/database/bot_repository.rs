use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::database::error::{DatabaseError, DatabaseResult};

/// One product button in a bot's storefront, configured from the seller
/// panel and stored as JSON on the bot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotPlan {
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order_bump: Option<OrderBump>,
    #[serde(default)]
    pub downsell: Option<Downsell>,
}

/// Optional add-on offered between plan choice and charge creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBump {
    pub name: String,
    pub value: Decimal,
}

/// Cheaper fallback offered when the buyer declines the main plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Downsell {
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, FromRow)]
pub struct Bot {
    pub id: i64,
    pub seller_id: i64,
    pub token: String,
    pub display_name: String,
    pub welcome_message: Option<String>,
    pub welcome_media_url: Option<String>,
    pub access_link: Option<String>,
    pub plans: Json<Vec<BotPlan>>,
    pub is_active: bool,
    pub total_sales: i64,
    pub total_revenue: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Last-known attribution per (bot, telegram user). A read cache for message
/// handling; the tracking store remains the source of truth.
#[derive(Debug, Clone, FromRow)]
pub struct BotUser {
    pub bot_id: i64,
    pub telegram_user_id: String,
    pub fbclid: Option<String>,
    pub fbp: Option<String>,
    pub fbc: Option<String>,
    pub external_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub tracking_session_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

const BOT_COLUMNS: &str = "id, seller_id, token, display_name, welcome_message, \
     welcome_media_url, access_link, plans, is_active, total_sales, total_revenue, created_at";

const BOT_USER_COLUMNS: &str = "bot_id, telegram_user_id, fbclid, fbp, fbc, external_id, \
     ip_address, user_agent, tracking_session_id, updated_at";

#[derive(Clone)]
pub struct BotRepository {
    pool: PgPool,
}

impl BotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, bot_id: i64) -> DatabaseResult<Option<Bot>> {
        sqlx::query_as::<_, Bot>(&format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = $1"))
            .bind(bot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list_active(&self) -> DatabaseResult<Vec<Bot>> {
        sqlx::query_as::<_, Bot>(&format!(
            "SELECT {BOT_COLUMNS} FROM bots WHERE is_active = true ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_bot_user(
        &self,
        bot_id: i64,
        telegram_user_id: &str,
    ) -> DatabaseResult<Option<BotUser>> {
        sqlx::query_as::<_, BotUser>(&format!(
            "SELECT {BOT_USER_COLUMNS} FROM bot_users \
             WHERE bot_id = $1 AND telegram_user_id = $2"
        ))
        .bind(bot_id)
        .bind(telegram_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn set_tracking_session(
        &self,
        bot_id: i64,
        telegram_user_id: &str,
        tracking_token: &str,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT INTO bot_users (bot_id, telegram_user_id, tracking_session_id, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (bot_id, telegram_user_id) DO UPDATE SET \
                 tracking_session_id = EXCLUDED.tracking_session_id, updated_at = NOW()",
        )
        .bind(bot_id)
        .bind(telegram_user_id)
        .bind(tracking_token)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
