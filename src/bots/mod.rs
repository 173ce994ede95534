//! Telegram bot fleet. One dispatcher task per active bot, supervised with a
//! bounded restart budget and a `get_me` heartbeat.

pub mod handlers;
pub mod supervisor;

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::database::{BotRepository, PoolRepository};
use crate::services::{MetaDispatcher, PaymentOrchestrator};
use crate::tracking::{TrackingRecord, TrackingStore};

pub use supervisor::{BotStatus, BotSupervisor, SupervisorConfig};

/// Services shared by every bot task.
pub struct BotServices {
    pub orchestrator: PaymentOrchestrator,
    pub bots: BotRepository,
    pub pools: PoolRepository,
    pub tracking: TrackingStore,
    pub meta: MetaDispatcher,
}

/// Per-bot handler context injected into the dispatcher.
pub struct BotContext {
    pub bot_id: i64,
    pub services: Arc<BotServices>,
}

impl BotContext {
    /// Fires a PageView off the /start interaction when the bot's pool opts
    /// in. Detached: a Meta hiccup never delays the welcome message.
    pub fn spawn_pageview(self: &Arc<Self>, record: TrackingRecord) {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            let pool = match ctx.services.pools.find_for_bot(ctx.bot_id).await {
                Ok(Some(pool)) if pool.can_emit_events() && pool.send_pageview => pool,
                Ok(_) => return,
                Err(err) => {
                    warn!(bot_id = ctx.bot_id, error = %err, "pool lookup failed");
                    return;
                }
            };
            let Some(user_id) = record.customer_user_id.as_deref() else {
                return;
            };
            let event_id = record
                .pageview_event_id
                .clone()
                .unwrap_or_else(|| format!("pageview_{}", Uuid::new_v4()));
            if let Err(err) = ctx
                .services
                .meta
                .send_engagement(
                    &pool,
                    "PageView",
                    &event_id,
                    user_id,
                    record.fbp.as_deref(),
                    record.fbc.as_deref(),
                )
                .await
            {
                warn!(bot_id = ctx.bot_id, error = %err, "pageview emission failed");
            }
        });
    }

    /// Fires a ViewContent when a buyer opens an offer. Attribution comes
    /// from the cached chat record; no record means nothing to attribute.
    pub fn spawn_viewcontent(self: &Arc<Self>, telegram_user_id: String) {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            let pool = match ctx.services.pools.find_for_bot(ctx.bot_id).await {
                Ok(Some(pool)) if pool.can_emit_events() && pool.send_viewcontent => pool,
                Ok(_) => return,
                Err(err) => {
                    warn!(bot_id = ctx.bot_id, error = %err, "pool lookup failed");
                    return;
                }
            };
            let record = match ctx
                .services
                .tracking
                .find_by_chat(ctx.bot_id, &telegram_user_id)
                .await
            {
                Ok(Some(record)) => record,
                Ok(None) => return,
                Err(err) => {
                    warn!(bot_id = ctx.bot_id, error = %err, "tracking lookup failed");
                    return;
                }
            };
            let event_id = format!("viewcontent_{}", Uuid::new_v4());
            if let Err(err) = ctx
                .services
                .meta
                .send_engagement(
                    &pool,
                    "ViewContent",
                    &event_id,
                    &telegram_user_id,
                    record.fbp.as_deref(),
                    record.fbc.as_deref(),
                )
                .await
            {
                warn!(bot_id = ctx.bot_id, error = %err, "viewcontent emission failed");
            }
        });
    }
}
