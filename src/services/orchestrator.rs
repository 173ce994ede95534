//! Payment orchestration: charge creation with gateway routing and failover,
//! webhook application, and active status verification. Every paid transition
//! funnels through one compare-and-set path regardless of which signal
//! arrived first.

use std::str::FromStr;

use chrono::Utc;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::cache::CacheService;
use crate::config::WebhookConfig;
use crate::database::{
    BotRepository, GatewayRecord, GatewayRepository, NewPayment, Payment, PaymentRepository,
};
use crate::error::{AppError, AppResult};
use crate::gateways::{
    GatewayAdapter, GatewayError, GatewayFactory, GatewayKind, PixChargeRequest, PixCustomer,
    PixStatus, WebhookOutcome,
};
use crate::jobs::{JobKind, JobQueue};
use crate::services::crypto::CredentialCipher;
use crate::tracking::{identity, TrackingRecord, TrackingStore};

/// Seconds a gateway sits out of the rotation after a transient failure.
const GATEWAY_COOLDOWN_SECS: u64 = 300;
/// Checkout payloads outlive the 48h reconciliation window slightly.
const CHECKOUT_TTL_SECS: u64 = 50 * 60 * 60;

pub fn checkout_key(payment_id: &str) -> String {
    format!("checkout:{}", payment_id)
}

#[derive(Debug, Clone)]
pub struct CreatePixRequest {
    pub bot_id: i64,
    pub telegram_user_id: String,
    pub amount: Decimal,
    pub product_name: String,
    pub product_description: Option<String>,
    pub is_downsell: bool,
    pub is_upsell: bool,
    pub is_remarketing: bool,
    pub order_bump_accepted: bool,
    pub order_bump_value: Option<Decimal>,
}

/// What the bot shows the buyer after a charge is created. Also cached under
/// `checkout:{payment_id}` for the checkout endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PixCheckout {
    pub payment_id: String,
    pub pix_code: String,
    pub qr_code_url: Option<String>,
    pub gateway: GatewayKind,
    pub amount: Decimal,
}

/// How an inbound webhook was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    PaidPromoted { payment_id: String },
    MarkedFailed { payment_id: String },
    StillPending { payment_id: String },
    AlreadyFinal { payment_id: String },
    Unmatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Paid,
    Pending,
    Failed,
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    payments: PaymentRepository,
    bots: BotRepository,
    gateways: GatewayRepository,
    tracking: TrackingStore,
    factory: GatewayFactory,
    cipher: CredentialCipher,
    queue: JobQueue,
    cache: CacheService,
    webhook: WebhookConfig,
}

impl PaymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: PaymentRepository,
        bots: BotRepository,
        gateways: GatewayRepository,
        tracking: TrackingStore,
        factory: GatewayFactory,
        cipher: CredentialCipher,
        queue: JobQueue,
        cache: CacheService,
        webhook: WebhookConfig,
    ) -> Self {
        Self {
            payments,
            bots,
            gateways,
            tracking,
            factory,
            cipher,
            queue,
            cache,
            webhook,
        }
    }

    /// Creates a PIX charge, trying the seller's gateways in round-robin
    /// order. Failover moves to the next gateway only on transport-class
    /// failures; a gateway rejecting the charge is final for this attempt.
    pub async fn create_pix(&self, request: CreatePixRequest) -> AppResult<PixCheckout> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest("amount must be positive".to_string()));
        }

        let bot = self
            .bots
            .find_by_id(request.bot_id)
            .await?
            .ok_or_else(|| AppError::NotFound("bot".to_string()))?;

        let eligible = self.gateways.list_eligible_for_seller(bot.seller_id).await?;
        if eligible.is_empty() {
            return Err(AppError::BadRequest(
                "no verified gateway configured for this bot".to_string(),
            ));
        }

        let candidates = self.routed_candidates(bot.seller_id, eligible).await;
        let payment_id = mint_payment_id(request.bot_id);

        let attribution = self
            .recover_attribution(request.bot_id, &request.telegram_user_id)
            .await?;

        let charge_request = PixChargeRequest {
            amount: request.amount,
            description: request.product_name.clone(),
            payment_id: payment_id.clone(),
            customer: PixCustomer::default(),
            // Filled per candidate below; each gateway posts to its own path.
            webhook_url: String::new(),
        };

        let mut last_error: Option<GatewayError> = None;
        for record in &candidates {
            let adapter = match self.adapter_for(record) {
                Ok(adapter) => adapter,
                Err(err) => {
                    warn!(gateway_id = record.id, error = %err, "gateway construction failed");
                    last_error = Some(err);
                    continue;
                }
            };

            let mut attempt = charge_request.clone();
            attempt.webhook_url = self.webhook.url_for(&adapter.driver().webhook_path());

            match adapter.generate_pix(&attempt).await {
                Ok(charge) => {
                    let record_snapshot = self
                        .persist_payment(
                            &request,
                            &payment_id,
                            record,
                            Some(&charge.transaction_id),
                            charge.transaction_hash.as_deref(),
                            &attribution,
                        )
                        .await?;
                    info!(
                        payment_id = %payment_id,
                        gateway = %record.gateway_type,
                        amount = %request.amount,
                        "pix charge created"
                    );
                    if let Some(tracking) = record_snapshot {
                        if let Err(err) = self.tracking.index_by_payment(&payment_id, &tracking).await
                        {
                            warn!(payment_id = %payment_id, error = %err, "payment tracking index failed");
                        }
                    }
                    let checkout = PixCheckout {
                        payment_id,
                        pix_code: charge.pix_code,
                        qr_code_url: charge.qr_code_url,
                        gateway: GatewayKind::from_str(&record.gateway_type)?,
                        amount: request.amount,
                    };
                    if let Err(err) = self
                        .cache
                        .set_json(
                            &checkout_key(&checkout.payment_id),
                            &checkout,
                            CHECKOUT_TTL_SECS,
                        )
                        .await
                    {
                        warn!(payment_id = %checkout.payment_id, error = %err, "checkout cache write failed");
                    }
                    return Ok(checkout);
                }
                Err(err @ GatewayError::ChargeRefused { .. }) => {
                    // The gateway made a final decision on this charge. The
                    // payment row is kept pending with whatever identifiers
                    // the refusal carried, so a late webhook still correlates
                    // and the buyer can simply try again.
                    let (transaction_id, transaction_hash) = match &err {
                        GatewayError::ChargeRefused {
                            transaction_id,
                            transaction_hash,
                            ..
                        } => (transaction_id.clone(), transaction_hash.clone()),
                        _ => (None, None),
                    };
                    warn!(
                        payment_id = %payment_id,
                        gateway = %record.gateway_type,
                        "charge refused at creation, persisting as pending"
                    );
                    let record_snapshot = self
                        .persist_payment(
                            &request,
                            &payment_id,
                            record,
                            transaction_id.as_deref(),
                            transaction_hash.as_deref(),
                            &attribution,
                        )
                        .await?;
                    if let Some(tracking) = record_snapshot {
                        if let Err(err) =
                            self.tracking.index_by_payment(&payment_id, &tracking).await
                        {
                            warn!(payment_id = %payment_id, error = %err, "payment tracking index failed");
                        }
                    }
                    return Err(err.into());
                }
                Err(err) if err.is_auth_failure() => {
                    warn!(gateway_id = record.id, "credentials rejected upstream");
                    self.gateways.mark_unverified(record.id).await?;
                    last_error = Some(err);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        gateway_id = record.id,
                        gateway = %record.gateway_type,
                        error = %err,
                        "gateway unavailable, failing over"
                    );
                    self.mark_cooldown(record.id).await;
                    last_error = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(last_error
            .map(AppError::from)
            .unwrap_or_else(|| AppError::Internal("no gateway candidate".to_string())))
    }

    /// Applies a parsed webhook. Correlation tries gateway transaction id,
    /// then transaction hash, then our reference as echoed back, then the
    /// Paradise retry-suffix variant of the reference.
    pub async fn apply_webhook(
        &self,
        kind: GatewayKind,
        outcome: &WebhookOutcome,
    ) -> AppResult<WebhookDisposition> {
        let payment = match self.correlate(kind, outcome).await? {
            Some(payment) => payment,
            None => {
                info!(
                    gateway = %kind,
                    transaction_id = outcome.transaction_id.as_deref().unwrap_or("-"),
                    reference = outcome.external_reference.as_deref().unwrap_or("-"),
                    "webhook did not match any payment"
                );
                return Ok(WebhookDisposition::Unmatched);
            }
        };

        self.payments
            .update_gateway_identifiers(
                &payment.payment_id,
                outcome.transaction_id.as_deref(),
                outcome.transaction_hash.as_deref(),
            )
            .await?;

        match outcome.status {
            PixStatus::Paid => {
                if self.promote_paid(&payment.payment_id).await? {
                    Ok(WebhookDisposition::PaidPromoted {
                        payment_id: payment.payment_id,
                    })
                } else {
                    Ok(WebhookDisposition::AlreadyFinal {
                        payment_id: payment.payment_id,
                    })
                }
            }
            PixStatus::Failed => {
                if self.payments.mark_failed(&payment.payment_id).await? {
                    info!(payment_id = %payment.payment_id, raw = %outcome.raw_status, "payment failed");
                    Ok(WebhookDisposition::MarkedFailed {
                        payment_id: payment.payment_id,
                    })
                } else {
                    Ok(WebhookDisposition::AlreadyFinal {
                        payment_id: payment.payment_id,
                    })
                }
            }
            PixStatus::Pending => Ok(WebhookDisposition::StillPending {
                payment_id: payment.payment_id,
            }),
        }
    }

    /// User-triggered "Verify Payment": polls the gateway and routes the
    /// answer through the same transitions a webhook would take.
    pub async fn verify_payment(&self, payment_id: &str) -> AppResult<VerifyOutcome> {
        let payment = self
            .payments
            .find_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("payment".to_string()))?;

        match payment.status.as_str() {
            "paid" => return Ok(VerifyOutcome::Paid),
            "failed" | "expired" => return Ok(VerifyOutcome::Failed),
            _ => {}
        }

        let transaction_id = match payment.gateway_transaction_id.as_deref() {
            Some(id) => id,
            None => return Ok(VerifyOutcome::Pending),
        };

        let adapter = self.adapter_for_payment(&payment).await?;
        let lookup = match adapter.get_payment_status(transaction_id).await {
            Ok(lookup) => lookup,
            // Gateways without a status endpoint, or transient upstream
            // trouble: the payment stays pending and the reconciler retries.
            Err(err) if matches!(err, GatewayError::InvalidInput { .. }) || err.is_retryable() => {
                return Ok(VerifyOutcome::Pending);
            }
            Err(err) => return Err(err.into()),
        };

        match lookup.status {
            PixStatus::Paid => {
                self.promote_paid(&payment.payment_id).await?;
                Ok(VerifyOutcome::Paid)
            }
            PixStatus::Failed => {
                self.payments.mark_failed(&payment.payment_id).await?;
                Ok(VerifyOutcome::Failed)
            }
            PixStatus::Pending => Ok(VerifyOutcome::Pending),
        }
    }

    /// The single paid-transition path. Returns true for the caller that won
    /// the compare-and-set; only that caller enqueues follow-up jobs.
    pub async fn promote_paid(&self, payment_id: &str) -> AppResult<bool> {
        let promoted = self.payments.mark_paid(payment_id).await?;
        let Some(payment) = promoted else {
            return Ok(false);
        };

        // The cached pix code must never be shown for a settled charge.
        if let Err(err) = self.cache.delete(&checkout_key(payment_id)).await {
            warn!(payment_id, error = %err, "checkout cache invalidation failed");
        }

        self.queue
            .enqueue(JobKind::Delivery {
                payment_id: payment.payment_id.clone(),
            })
            .await?;
        self.queue
            .enqueue(JobKind::MetaPurchase {
                payment_id: payment.payment_id.clone(),
            })
            .await?;
        Ok(true)
    }

    /// Cached checkout payload for the payment page.
    pub async fn find_checkout(&self, payment_id: &str) -> AppResult<Option<PixCheckout>> {
        Ok(self.cache.get_json(&checkout_key(payment_id)).await?)
    }

    /// Builds the adapter for an existing payment from its bot's seller.
    pub async fn adapter_for_payment(&self, payment: &Payment) -> AppResult<GatewayAdapter> {
        let bot = self
            .bots
            .find_by_id(payment.bot_id)
            .await?
            .ok_or_else(|| AppError::NotFound("bot".to_string()))?;
        let record = self
            .gateways
            .find_for_seller_and_type(bot.seller_id, &payment.gateway_type)
            .await?
            .ok_or_else(|| AppError::NotFound("gateway".to_string()))?;
        Ok(self.adapter_for(&record)?)
    }

    fn adapter_for(&self, record: &GatewayRecord) -> Result<GatewayAdapter, GatewayError> {
        let kind = GatewayKind::from_str(&record.gateway_type)?;
        let credentials = self
            .cipher
            .decrypt_credentials(&record.credentials)
            .map_err(|e| GatewayError::InvalidInput {
                message: format!("stored credentials unreadable: {}", e),
                field: Some("credentials".to_string()),
            })?;
        self.factory.create(kind, &credentials)
    }

    async fn correlate(
        &self,
        kind: GatewayKind,
        outcome: &WebhookOutcome,
    ) -> AppResult<Option<Payment>> {
        let tag = kind.as_str();

        if let Some(id) = outcome.transaction_id.as_deref() {
            if let Some(payment) = self.payments.find_by_gateway_transaction_id(tag, id).await? {
                return Ok(Some(payment));
            }
        }
        if let Some(hash) = outcome.transaction_hash.as_deref() {
            if let Some(payment) = self
                .payments
                .find_by_gateway_transaction_hash(tag, hash)
                .await?
            {
                return Ok(Some(payment));
            }
        }
        if let Some(reference) = outcome.external_reference.as_deref() {
            if let Some(payment) = self.payments.find_by_payment_id(reference).await? {
                if payment.gateway_type == tag {
                    return Ok(Some(payment));
                }
            }
            if kind == GatewayKind::Paradise {
                let trimmed = crate::gateways::drivers::ParadiseDriver::trim_reference_suffix(
                    reference,
                );
                if trimmed != reference {
                    if let Some(payment) = self.payments.find_by_payment_id(trimmed).await? {
                        if payment.gateway_type == tag {
                            return Ok(Some(payment));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Recovers the buyer's attribution bundle: the bot-user session token
    /// first, then the chat-pair key.
    async fn recover_attribution(
        &self,
        bot_id: i64,
        telegram_user_id: &str,
    ) -> AppResult<Option<TrackingRecord>> {
        let session_token = self
            .bots
            .find_bot_user(bot_id, telegram_user_id)
            .await?
            .and_then(|u| u.tracking_session_id);

        let record = self
            .tracking
            .recover(
                session_token.as_deref(),
                None,
                Some(telegram_user_id),
                Some(bot_id),
                None,
            )
            .await?;
        Ok(record)
    }

    async fn persist_payment(
        &self,
        request: &CreatePixRequest,
        payment_id: &str,
        gateway: &GatewayRecord,
        transaction_id: Option<&str>,
        transaction_hash: Option<&str>,
        attribution: &Option<TrackingRecord>,
    ) -> AppResult<Option<TrackingRecord>> {
        let tracking = attribution.clone().map(|mut record| {
            if record.fbp.is_none() {
                record.fbp = Some(identity::generate_fbp(&request.telegram_user_id));
            }
            if record.fbc.is_none() {
                record.fbc = identity::generate_fbc(record.fbclid.as_deref(), None);
            }
            record
        });

        let snapshot = tracking.clone().unwrap_or_default();
        let new = NewPayment {
            payment_id: payment_id.to_string(),
            bot_id: request.bot_id,
            amount: request.amount,
            product_name: request.product_name.clone(),
            product_description: request.product_description.clone(),
            customer_user_id: request.telegram_user_id.clone(),
            gateway_type: gateway.gateway_type.clone(),
            gateway_transaction_id: transaction_id.map(String::from),
            gateway_transaction_hash: transaction_hash.map(String::from),
            tracking_token: tracking
                .as_ref()
                .map(|r| r.tracking_token.clone())
                .filter(|t| !t.is_empty()),
            is_downsell: request.is_downsell,
            is_upsell: request.is_upsell,
            is_remarketing: request.is_remarketing,
            order_bump_accepted: request.order_bump_accepted,
            order_bump_value: request.order_bump_value,
            fbclid: snapshot.fbclid,
            fbp: snapshot.fbp,
            fbc: snapshot.fbc,
            utm_source: snapshot.utm_source,
            utm_medium: snapshot.utm_medium,
            utm_campaign: snapshot.utm_campaign,
            campaign_code: snapshot.campaign_code,
            pageview_event_id: snapshot.pageview_event_id,
            client_ip: snapshot.client_ip,
            client_user_agent: snapshot.client_user_agent,
        };
        self.payments.insert(&new).await?;
        Ok(tracking)
    }

    /// Eligible gateways rotated by a per-seller cursor, with cooled-down
    /// gateways pushed to the back. On a fully cooled rotation everything is
    /// tried anyway.
    async fn routed_candidates(
        &self,
        seller_id: i64,
        eligible: Vec<GatewayRecord>,
    ) -> Vec<GatewayRecord> {
        let cursor = self.next_cursor(seller_id).await;
        let rotated = rotate_by_cursor(eligible, cursor);

        let mut available = Vec::with_capacity(rotated.len());
        let mut cooled = Vec::new();
        for record in rotated {
            if self.in_cooldown(record.id).await {
                cooled.push(record);
            } else {
                available.push(record);
            }
        }
        available.extend(cooled);
        available
    }

    async fn next_cursor(&self, seller_id: i64) -> u64 {
        let mut conn = self.cache.connection();
        let key = format!("routing:cursor:{}", seller_id);
        match conn.incr::<_, _, u64>(&key, 1u64).await {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "routing cursor unavailable, defaulting to first gateway");
                0
            }
        }
    }

    async fn in_cooldown(&self, gateway_id: i64) -> bool {
        let key = format!("routing:cooldown:{}", gateway_id);
        matches!(self.cache.get_json::<i64>(&key).await, Ok(Some(_)))
    }

    async fn mark_cooldown(&self, gateway_id: i64) {
        let key = format!("routing:cooldown:{}", gateway_id);
        if let Err(err) = self
            .cache
            .set_json(&key, &Utc::now().timestamp(), GATEWAY_COOLDOWN_SECS)
            .await
        {
            warn!(gateway_id, error = %err, "gateway cooldown mark failed");
        }
    }
}

/// `BOT{bot}_{unix_ts}_{rand8hex}`. Sortable per bot and unguessable enough
/// that references cannot be enumerated.
pub fn mint_payment_id(bot_id: i64) -> String {
    let suffix: u32 = rand::random();
    format!("BOT{}_{}_{:08x}", bot_id, Utc::now().timestamp(), suffix)
}

fn rotate_by_cursor<T>(mut items: Vec<T>, cursor: u64) -> Vec<T> {
    if items.is_empty() {
        return items;
    }
    let offset = (cursor as usize) % items.len();
    items.rotate_left(offset);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_ids_carry_bot_and_are_unique() {
        let a = mint_payment_id(42);
        let b = mint_payment_id(42);
        assert!(a.starts_with("BOT42_"));
        assert_ne!(a, b);
        let parts: Vec<&str> = a.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 8);
        assert!(parts[1].parse::<i64>().is_ok());
    }

    #[test]
    fn rotation_cycles_through_candidates() {
        assert_eq!(rotate_by_cursor(vec![1, 2, 3], 0), vec![1, 2, 3]);
        assert_eq!(rotate_by_cursor(vec![1, 2, 3], 1), vec![2, 3, 1]);
        assert_eq!(rotate_by_cursor(vec![1, 2, 3], 2), vec![3, 1, 2]);
        assert_eq!(rotate_by_cursor(vec![1, 2, 3], 3), vec![1, 2, 3]);
        assert_eq!(rotate_by_cursor(Vec::<i32>::new(), 7), Vec::<i32>::new());
    }
}
