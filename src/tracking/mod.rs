//! Attribution bundle storage. The same record is written under every
//! applicable index key so recovery succeeds from whichever clue survives:
//! the token itself, the click id, the hashed user, the chat pair, or the
//! payment id.

pub mod identity;
pub mod keys;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheResult, CacheService};

use keys::{ChatKey, FbclidKey, PaymentKey, TokenKey, UserHashKey};

pub const TRACKING_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Short-lived attribution bundle. Written by the redirect frontend under the
/// same keys; refreshed here on `/start` and at payment creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub tracking_token: String,
    pub bot_id: Option<i64>,
    pub customer_user_id: Option<String>,
    pub pool_id: Option<i64>,
    pub pixel_id: Option<String>,
    pub pageview_event_id: Option<String>,
    pub fbclid: Option<String>,
    pub fbp: Option<String>,
    pub fbc: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub campaign_code: Option<String>,
    pub client_ip: Option<String>,
    pub client_user_agent: Option<String>,
}

#[derive(Clone)]
pub struct TrackingStore {
    cache: CacheService,
}

impl TrackingStore {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    /// Writes the record under every index key that applies. Write-once per
    /// key with TTL refresh allowed.
    pub async fn store(&self, record: &TrackingRecord) -> CacheResult<()> {
        self.cache
            .set_json(
                &TokenKey(&record.tracking_token).to_string(),
                record,
                TRACKING_TTL_SECS,
            )
            .await?;

        if let Some(fbclid) = record.fbclid.as_deref().filter(|v| !v.is_empty()) {
            self.cache
                .set_json(&FbclidKey(fbclid).to_string(), record, TRACKING_TTL_SECS)
                .await?;
        }
        if let Some(user_id) = record.customer_user_id.as_deref() {
            self.cache
                .set_json(
                    &UserHashKey::new(user_id).to_string(),
                    record,
                    TRACKING_TTL_SECS,
                )
                .await?;
            if let Some(bot_id) = record.bot_id {
                self.cache
                    .set_json(
                        &ChatKey {
                            bot_id,
                            telegram_user_id: user_id,
                        }
                        .to_string(),
                        record,
                        TRACKING_TTL_SECS,
                    )
                    .await?;
            }
        }

        debug!(token = %record.tracking_token, "tracking record stored");
        Ok(())
    }

    /// Mirrors the record under the payment key once a charge exists.
    pub async fn index_by_payment(
        &self,
        payment_id: &str,
        record: &TrackingRecord,
    ) -> CacheResult<()> {
        self.cache
            .set_json(&PaymentKey(payment_id).to_string(), record, TRACKING_TTL_SECS)
            .await
    }

    pub async fn find_by_token(&self, token: &str) -> CacheResult<Option<TrackingRecord>> {
        self.cache.get_json(&TokenKey(token).to_string()).await
    }

    pub async fn find_by_payment(&self, payment_id: &str) -> CacheResult<Option<TrackingRecord>> {
        self.cache.get_json(&PaymentKey(payment_id).to_string()).await
    }

    pub async fn find_by_chat(
        &self,
        bot_id: i64,
        telegram_user_id: &str,
    ) -> CacheResult<Option<TrackingRecord>> {
        self.cache
            .get_json(
                &ChatKey {
                    bot_id,
                    telegram_user_id,
                }
                .to_string(),
            )
            .await
    }

    /// Tries every clue in priority order and returns the first hit: token,
    /// fbclid, hashed user, chat pair, payment id.
    pub async fn recover(
        &self,
        token: Option<&str>,
        fbclid: Option<&str>,
        telegram_user_id: Option<&str>,
        bot_id: Option<i64>,
        payment_id: Option<&str>,
    ) -> CacheResult<Option<TrackingRecord>> {
        if let Some(token) = token.filter(|v| !v.is_empty()) {
            if let Some(record) = self.find_by_token(token).await? {
                return Ok(Some(record));
            }
        }
        if let Some(fbclid) = fbclid.filter(|v| !v.is_empty()) {
            if let Some(record) = self
                .cache
                .get_json(&FbclidKey(fbclid).to_string())
                .await?
            {
                return Ok(Some(record));
            }
        }
        if let Some(user_id) = telegram_user_id.filter(|v| !v.is_empty()) {
            if let Some(record) = self
                .cache
                .get_json(&UserHashKey::new(user_id).to_string())
                .await?
            {
                return Ok(Some(record));
            }
            if let Some(bot_id) = bot_id {
                if let Some(record) = self.find_by_chat(bot_id, user_id).await? {
                    return Ok(Some(record));
                }
            }
        }
        if let Some(payment_id) = payment_id.filter(|v| !v.is_empty()) {
            if let Some(record) = self.find_by_payment(payment_id).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}
