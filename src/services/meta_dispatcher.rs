//! Meta Conversions API dispatcher. Purchase events carry the attribution
//! snapshot frozen on the payment row; PageView and ViewContent are sent live
//! from the bot when the pool opts in. Emission is at-most-once per payment,
//! enforced by the `meta_purchase_sent` guard column.

use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::database::{BotRepository, Payment, PaymentRepository, PoolRepository, RedirectPool};
use crate::error::{AppError, AppResult};
use crate::services::crypto::CredentialCipher;
use crate::tracking::identity;

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseDisposition {
    Sent,
    AlreadySent,
    /// Pool has tracking off or purchase events disabled.
    Skipped,
}

#[derive(Clone)]
pub struct MetaDispatcher {
    http: reqwest::Client,
    payments: PaymentRepository,
    bots: BotRepository,
    pools: PoolRepository,
    cipher: CredentialCipher,
}

impl MetaDispatcher {
    pub fn new(
        payments: PaymentRepository,
        bots: BotRepository,
        pools: PoolRepository,
        cipher: CredentialCipher,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Internal(format!("meta http client: {}", e)))?;
        Ok(Self {
            http,
            payments,
            bots,
            pools,
            cipher,
        })
    }

    /// Emits the Purchase event for a paid payment. Safe to call repeatedly;
    /// only the first successful emission records.
    pub async fn send_purchase(&self, payment_id: &str) -> AppResult<PurchaseDisposition> {
        let payment = self
            .payments
            .find_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("payment".to_string()))?;

        if payment.meta_purchase_sent {
            return Ok(PurchaseDisposition::AlreadySent);
        }
        if payment.status != "paid" {
            return Err(AppError::BadRequest(format!(
                "payment {} is not paid",
                payment_id
            )));
        }

        let Some(pool) = self.pools.find_for_bot(payment.bot_id).await? else {
            return Ok(PurchaseDisposition::Skipped);
        };
        if !pool.can_emit_events() || !pool.send_purchase {
            return Ok(PurchaseDisposition::Skipped);
        }

        let bot_user_external = self
            .bots
            .find_bot_user(payment.bot_id, &payment.customer_user_id)
            .await?
            .and_then(|u| u.external_id);

        let event_id = purchase_event_id(&payment.payment_id);
        let event = build_purchase_event(&payment, &pool, bot_user_external.as_deref(), &event_id);

        self.post_events(&pool, &[event]).await?;

        if self
            .payments
            .record_meta_purchase(&payment.payment_id, &event_id)
            .await?
        {
            info!(payment_id = %payment.payment_id, event_id = %event_id, "meta purchase sent");
            Ok(PurchaseDisposition::Sent)
        } else {
            // Another worker recorded between our read and the guard update.
            Ok(PurchaseDisposition::AlreadySent)
        }
    }

    /// PageView/ViewContent from the bot, fire-and-forget semantics aside
    /// from the retry envelope.
    pub async fn send_engagement(
        &self,
        pool: &RedirectPool,
        event_name: &str,
        event_id: &str,
        telegram_user_id: &str,
        fbp: Option<&str>,
        fbc: Option<&str>,
    ) -> AppResult<()> {
        let event = json!({
            "event_name": event_name,
            "event_time": chrono::Utc::now().timestamp(),
            "event_id": event_id,
            "action_source": "website",
            "user_data": {
                "external_id": [sha256_hex(telegram_user_id)],
                "fbp": fbp,
                "fbc": fbc,
            },
        });
        self.post_events(pool, &[event]).await
    }

    async fn post_events(&self, pool: &RedirectPool, events: &[JsonValue]) -> AppResult<()> {
        let pixel_id = pool
            .pixel_id
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("pool has no pixel".to_string()))?;
        let access_token = match pool.access_token.as_deref() {
            Some(encrypted) => self.cipher.decrypt(encrypted)?,
            None => return Err(AppError::BadRequest("pool has no access token".to_string())),
        };

        let mut body = json!({
            "data": events,
            "access_token": access_token,
        });
        if let Some(code) = pool.test_event_code.as_deref() {
            body["test_event_code"] = json!(code);
        }

        let url = format!("{}/{}/events", GRAPH_BASE, pixel_id);
        let mut zero_received_retried = false;

        for attempt in 0..=RETRY_DELAYS.len() {
            let response = self.http.post(&url).json(&body).send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(AppError::BadRequest(
                            "meta access token rejected".to_string(),
                        ));
                    }
                    if status.is_success() {
                        let parsed: JsonValue = resp.json().await.unwrap_or_default();
                        let received = parsed
                            .get("events_received")
                            .and_then(JsonValue::as_i64)
                            .unwrap_or(0);
                        if received > 0 {
                            return Ok(());
                        }
                        // Meta acknowledged with zero events once in a while;
                        // retry a single time, then take the 200 at its word.
                        if zero_received_retried {
                            warn!(pixel_id, "meta reported zero events_received twice, accepting");
                            return Ok(());
                        }
                        zero_received_retried = true;
                    } else {
                        warn!(pixel_id, status = %status, "meta api returned error status");
                    }
                }
                Err(err) => {
                    warn!(pixel_id, error = %err, "meta api request failed");
                }
            }
            if attempt < RETRY_DELAYS.len() {
                tokio::time::sleep(RETRY_DELAYS[attempt]).await;
            }
        }
        Err(AppError::Internal("meta api unavailable".to_string()))
    }
}

/// Every emission gets a fresh id, so a reconciler-driven promotion after a
/// lost first attempt is not deduplicated away by Meta.
pub fn purchase_event_id(payment_id: &str) -> String {
    let suffix: u32 = rand::random();
    format!(
        "purchase_{}_{}_{:08x}",
        payment_id,
        chrono::Utc::now().timestamp_millis(),
        suffix
    )
}

fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.trim().to_lowercase().as_bytes()))
}

/// A stored external id is useless to Meta when it is the raw Telegram id or
/// one of our own synthetic artifacts (a click id, a cookie, a tracking
/// token) that leaked into the column.
fn is_synthetic_external_id(value: &str, telegram_user_id: &str) -> bool {
    let v = value.trim();
    v.is_empty()
        || v == telegram_user_id
        || v.starts_with("IwAR")
        || v.starts_with("fb.1.")
        || v.starts_with("fb.2.")
        || v.starts_with("tracking_")
}

/// The Purchase `content_category`, derived from the payment's
/// classification flags.
pub fn content_category(payment: &Payment) -> &'static str {
    if payment.is_remarketing {
        "remarketing"
    } else if payment.is_upsell {
        "upsell"
    } else if payment.is_downsell {
        "downsell"
    } else {
        "initial"
    }
}

/// The primary external id, in preference order: the pool's cloaker value,
/// the campaign code frozen on the payment at click time, the bot-user's
/// stored external id unless it is synthetic, then the hashed Telegram id.
pub fn choose_primary_external_id(
    cloaker_value: Option<&str>,
    campaign_code: Option<&str>,
    bot_user_external_id: Option<&str>,
    telegram_user_id: &str,
) -> String {
    if let Some(value) = cloaker_value.filter(|v| !v.trim().is_empty()) {
        return sha256_hex(value);
    }
    if let Some(code) = campaign_code.filter(|v| !v.trim().is_empty()) {
        return sha256_hex(code);
    }
    if let Some(external) =
        bot_user_external_id.filter(|v| !is_synthetic_external_id(v, telegram_user_id))
    {
        return sha256_hex(external);
    }
    sha256_hex(telegram_user_id)
}

pub fn build_purchase_event(
    payment: &Payment,
    pool: &RedirectPool,
    bot_user_external_id: Option<&str>,
    event_id: &str,
) -> JsonValue {
    let primary = choose_primary_external_id(
        pool.cloaker_param.as_deref(),
        payment.campaign_code.as_deref(),
        bot_user_external_id,
        &payment.customer_user_id,
    );
    let mut external_ids = vec![primary];
    for id in identity::build_external_ids(
        payment.fbclid.as_deref(),
        Some(&payment.customer_user_id),
        None,
        None,
    ) {
        if !external_ids.contains(&id) {
            external_ids.push(id);
        }
    }

    let order_bump_value = payment.order_bump_value.unwrap_or(Decimal::ZERO);
    let value = payment.amount + order_bump_value;

    let mut custom_data = json!({
        "currency": "BRL",
        "value": value,
        "content_id": pool.id.to_string(),
        "content_name": payment.product_name,
        "content_category": content_category(payment),
    });
    if order_bump_value > Decimal::ZERO {
        custom_data["order_bump_value"] = json!(order_bump_value);
    }
    if let Some(utm) = payment.utm_source.as_deref() {
        custom_data["utm_source"] = json!(utm);
    }
    if let Some(utm) = payment.utm_medium.as_deref() {
        custom_data["utm_medium"] = json!(utm);
    }
    if let Some(utm) = payment.utm_campaign.as_deref() {
        custom_data["utm_campaign"] = json!(utm);
    }

    let event_time = payment
        .paid_at
        .unwrap_or_else(chrono::Utc::now)
        .timestamp();

    json!({
        "event_name": "Purchase",
        "event_time": event_time,
        "event_id": event_id,
        "action_source": "website",
        "user_data": {
            "external_id": external_ids,
            "fbp": payment.fbp,
            "fbc": payment.fbc,
            "client_ip_address": payment.client_ip,
            "client_user_agent": payment.client_user_agent,
        },
        "custom_data": custom_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn payment() -> Payment {
        Payment {
            payment_id: "BOT7_1700000000_deadbeef".to_string(),
            bot_id: 7,
            amount: "49.90".parse().unwrap(),
            product_name: "Acesso VIP".to_string(),
            product_description: None,
            customer_user_id: "123456789".to_string(),
            gateway_type: "paradise".to_string(),
            gateway_transaction_id: Some("tx_1".to_string()),
            gateway_transaction_hash: None,
            tracking_token: None,
            status: "paid".to_string(),
            created_at: Utc::now(),
            paid_at: Some(Utc::now()),
            meta_purchase_sent: false,
            meta_purchase_sent_at: None,
            meta_event_id: None,
            is_downsell: false,
            is_upsell: false,
            is_remarketing: false,
            order_bump_accepted: true,
            order_bump_value: Some("9.90".parse().unwrap()),
            fbclid: Some("IwAR123".to_string()),
            fbp: Some("fb.1.1700000000000.42".to_string()),
            fbc: Some("fb.1.1700000000000.IwAR123".to_string()),
            utm_source: Some("facebook".to_string()),
            utm_medium: None,
            utm_campaign: Some("blackfriday".to_string()),
            campaign_code: None,
            pageview_event_id: None,
            client_ip: Some("200.1.2.3".to_string()),
            client_user_agent: Some("Mozilla/5.0".to_string()),
        }
    }

    fn pool() -> RedirectPool {
        RedirectPool {
            id: 31,
            seller_id: 1,
            name: "pool".to_string(),
            pixel_id: Some("987654".to_string()),
            access_token: Some("enc".to_string()),
            meta_tracking_enabled: true,
            send_pageview: true,
            send_viewcontent: true,
            send_purchase: true,
            test_event_code: None,
            cloaker_param: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn external_id_prefers_cloaker_then_campaign_code() {
        let chosen =
            choose_primary_external_id(Some("grim_pool"), Some("grim_click"), Some("ext_1"), "123");
        assert_eq!(chosen, sha256_hex("grim_pool"));
        let chosen = choose_primary_external_id(None, Some("grim_click"), Some("ext_1"), "123");
        assert_eq!(chosen, sha256_hex("grim_click"));
    }

    #[test]
    fn external_id_skips_synthetic_stored_values() {
        // Raw Telegram id, click ids, cookies, and tracking tokens all fall
        // through to the hashed Telegram id.
        for stored in [
            "123456789",
            "IwAR2xKabc",
            "fb.1.1700000000000.IwAR2xKabc",
            "tracking_aabbccdd",
            "  ",
        ] {
            let chosen = choose_primary_external_id(None, None, Some(stored), "123456789");
            assert_eq!(chosen, sha256_hex("123456789"), "stored {:?}", stored);
        }
        let chosen = choose_primary_external_id(None, None, Some("redirect_ext_1"), "123456789");
        assert_eq!(chosen, sha256_hex("redirect_ext_1"));
    }

    #[test]
    fn content_category_follows_classification_flags() {
        let mut p = payment();
        assert_eq!(content_category(&p), "initial");
        p.is_downsell = true;
        assert_eq!(content_category(&p), "downsell");
        p.is_downsell = false;
        p.is_upsell = true;
        assert_eq!(content_category(&p), "upsell");
        p.is_upsell = false;
        p.is_remarketing = true;
        assert_eq!(content_category(&p), "remarketing");
    }

    #[test]
    fn purchase_custom_data_matches_contract() {
        let event = build_purchase_event(&payment(), &pool(), None, "purchase_x");
        assert_eq!(event["custom_data"]["currency"], "BRL");
        assert_eq!(
            event["custom_data"]["value"],
            serde_json::json!("59.80".parse::<Decimal>().unwrap())
        );
        assert_eq!(event["custom_data"]["content_id"], "31");
        assert_eq!(event["custom_data"]["content_category"], "initial");
        assert_eq!(
            event["custom_data"]["order_bump_value"],
            serde_json::json!("9.90".parse::<Decimal>().unwrap())
        );
        assert_eq!(event["event_name"], "Purchase");
        assert_eq!(event["event_id"], "purchase_x");
    }

    #[test]
    fn zero_order_bump_is_omitted() {
        let mut p = payment();
        p.order_bump_accepted = false;
        p.order_bump_value = None;
        let event = build_purchase_event(&p, &pool(), None, "purchase_x");
        assert!(event["custom_data"].get("order_bump_value").is_none());
    }

    #[test]
    fn purchase_event_carries_attribution() {
        let event = build_purchase_event(&payment(), &pool(), None, "purchase_x");
        assert_eq!(event["user_data"]["fbp"], "fb.1.1700000000000.42");
        assert_eq!(event["user_data"]["client_ip_address"], "200.1.2.3");
        let ids = event["user_data"]["external_id"].as_array().unwrap();
        assert!(!ids.is_empty());
        assert_eq!(event["custom_data"]["utm_source"], "facebook");
    }

    #[test]
    fn event_id_carries_a_fresh_suffix() {
        let first = purchase_event_id("BOT7_1700000000_deadbeef");
        let second = purchase_event_id("BOT7_1700000000_deadbeef");
        assert_ne!(first, second);

        let prefix = "purchase_BOT7_1700000000_deadbeef_";
        assert!(first.starts_with(prefix), "got {}", first);
        let tail = &first[prefix.len()..];
        let (millis, rand8) = tail.rsplit_once('_').unwrap();
        assert!(millis.parse::<i64>().unwrap() > 1_700_000_000_000);
        assert_eq!(rand8.len(), 8);
        assert!(rand8.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
