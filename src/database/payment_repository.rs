use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::database::error::{DatabaseError, DatabaseResult};

/// A single PIX charge. The attribution snapshot is copied in at creation so
/// it survives the tracking store's TTL.
#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub payment_id: String,
    pub bot_id: i64,
    pub amount: Decimal,
    pub product_name: String,
    pub product_description: Option<String>,
    pub customer_user_id: String,
    pub gateway_type: String,
    pub gateway_transaction_id: Option<String>,
    pub gateway_transaction_hash: Option<String>,
    pub tracking_token: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub meta_purchase_sent: bool,
    pub meta_purchase_sent_at: Option<DateTime<Utc>>,
    pub meta_event_id: Option<String>,
    pub is_downsell: bool,
    pub is_upsell: bool,
    pub is_remarketing: bool,
    pub order_bump_accepted: bool,
    pub order_bump_value: Option<Decimal>,
    pub fbclid: Option<String>,
    pub fbp: Option<String>,
    pub fbc: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub campaign_code: Option<String>,
    pub pageview_event_id: Option<String>,
    pub client_ip: Option<String>,
    pub client_user_agent: Option<String>,
}

const PAYMENT_COLUMNS: &str = "payment_id, bot_id, amount, product_name, product_description, \
     customer_user_id, gateway_type, gateway_transaction_id, gateway_transaction_hash, \
     tracking_token, status, created_at, paid_at, meta_purchase_sent, meta_purchase_sent_at, \
     meta_event_id, is_downsell, is_upsell, is_remarketing, order_bump_accepted, \
     order_bump_value, fbclid, fbp, fbc, utm_source, utm_medium, utm_campaign, campaign_code, \
     pageview_event_id, client_ip, client_user_agent";

/// Everything needed to insert a fresh pending payment.
#[derive(Debug, Clone, Default)]
pub struct NewPayment {
    pub payment_id: String,
    pub bot_id: i64,
    pub amount: Decimal,
    pub product_name: String,
    pub product_description: Option<String>,
    pub customer_user_id: String,
    pub gateway_type: String,
    pub gateway_transaction_id: Option<String>,
    pub gateway_transaction_hash: Option<String>,
    pub tracking_token: Option<String>,
    pub is_downsell: bool,
    pub is_upsell: bool,
    pub is_remarketing: bool,
    pub order_bump_accepted: bool,
    pub order_bump_value: Option<Decimal>,
    pub fbclid: Option<String>,
    pub fbp: Option<String>,
    pub fbc: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub campaign_code: Option<String>,
    pub pageview_event_id: Option<String>,
    pub client_ip: Option<String>,
    pub client_user_agent: Option<String>,
}

#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: &NewPayment) -> DatabaseResult<Payment> {
        sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments (payment_id, bot_id, amount, product_name, product_description, \
                 customer_user_id, gateway_type, gateway_transaction_id, gateway_transaction_hash, \
                 tracking_token, status, is_downsell, is_upsell, is_remarketing, \
                 order_bump_accepted, order_bump_value, fbclid, fbp, fbc, utm_source, utm_medium, \
                 utm_campaign, campaign_code, pageview_event_id, client_ip, client_user_agent) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, $12, $13, $14, $15, \
                 $16, $17, $18, $19, $20, $21, $22, $23, $24, $25) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(&new.payment_id)
        .bind(new.bot_id)
        .bind(new.amount)
        .bind(&new.product_name)
        .bind(&new.product_description)
        .bind(&new.customer_user_id)
        .bind(&new.gateway_type)
        .bind(&new.gateway_transaction_id)
        .bind(&new.gateway_transaction_hash)
        .bind(&new.tracking_token)
        .bind(new.is_downsell)
        .bind(new.is_upsell)
        .bind(new.is_remarketing)
        .bind(new.order_bump_accepted)
        .bind(new.order_bump_value)
        .bind(&new.fbclid)
        .bind(&new.fbp)
        .bind(&new.fbc)
        .bind(&new.utm_source)
        .bind(&new.utm_medium)
        .bind(&new.utm_campaign)
        .bind(&new.campaign_code)
        .bind(&new.pageview_event_id)
        .bind(&new.client_ip)
        .bind(&new.client_user_agent)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_payment_id(&self, payment_id: &str) -> DatabaseResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_gateway_transaction_id(
        &self,
        gateway_type: &str,
        transaction_id: &str,
    ) -> DatabaseResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE gateway_type = $1 AND gateway_transaction_id = $2"
        ))
        .bind(gateway_type)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_gateway_transaction_hash(
        &self,
        gateway_type: &str,
        transaction_hash: &str,
    ) -> DatabaseResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE gateway_type = $1 AND gateway_transaction_hash = $2"
        ))
        .bind(gateway_type)
        .bind(transaction_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Pending payments inside the reconciliation window, oldest first.
    pub async fn find_pending_within(
        &self,
        window_hours: i64,
        limit: i64,
    ) -> DatabaseResult<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status = 'pending' AND created_at > NOW() - ($1 * INTERVAL '1 hour') \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(window_hours)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Promotes a pending payment to paid. The WHERE clause is the
    /// compare-and-set: when webhook, reconciler, and a user-triggered verify
    /// race, exactly one caller gets the row back and the rest get None. Bot
    /// sales counters move in the same transaction so they can never drift
    /// from the payment table.
    pub async fn mark_paid(&self, payment_id: &str) -> DatabaseResult<Option<Payment>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let promoted = sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments SET status = 'paid', paid_at = NOW() \
             WHERE payment_id = $1 AND status = 'pending' \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(payment) = &promoted {
            sqlx::query(
                "UPDATE bots SET total_sales = total_sales + 1, \
                     total_revenue = total_revenue + $2 \
                 WHERE id = $1",
            )
            .bind(payment.bot_id)
            .bind(payment.amount)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            sqlx::query(
                "UPDATE sellers SET total_sales = total_sales + 1, \
                     total_revenue = total_revenue + $2 \
                 WHERE id = (SELECT seller_id FROM bots WHERE id = $1)",
            )
            .bind(payment.bot_id)
            .bind(payment.amount)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        if let Some(payment) = &promoted {
            info!(
                payment_id = %payment.payment_id,
                bot_id = payment.bot_id,
                amount = %payment.amount,
                "payment promoted to paid"
            );
        }
        Ok(promoted)
    }

    /// Fails a pending payment. Same CAS shape as `mark_paid`, no counters.
    pub async fn mark_failed(&self, payment_id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'failed' \
             WHERE payment_id = $1 AND status = 'pending'",
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Expires stale pendings past the reconciliation window.
    pub async fn expire_older_than(&self, window_hours: i64) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'expired' \
             WHERE status = 'pending' AND created_at <= NOW() - ($1 * INTERVAL '1 hour')",
        )
        .bind(window_hours)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    /// Records a Meta Purchase emission. Guarded on `meta_purchase_sent =
    /// false` so the event id is written at most once.
    pub async fn record_meta_purchase(
        &self,
        payment_id: &str,
        event_id: &str,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET meta_purchase_sent = true, \
                 meta_purchase_sent_at = NOW(), meta_event_id = $2 \
             WHERE payment_id = $1 AND status = 'paid' AND meta_purchase_sent = false",
        )
        .bind(payment_id)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_gateway_identifiers(
        &self,
        payment_id: &str,
        transaction_id: Option<&str>,
        transaction_hash: Option<&str>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE payments SET \
                 gateway_transaction_id = COALESCE($2, gateway_transaction_id), \
                 gateway_transaction_hash = COALESCE($3, gateway_transaction_hash) \
             WHERE payment_id = $1",
        )
        .bind(payment_id)
        .bind(transaction_id)
        .bind(transaction_hash)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
