//! Post-payment delivery: the access message a buyer receives once their
//! payment confirms. Runs from the job queue so Telegram hiccups retry
//! without holding up the paid transition.

use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::info;

use crate::database::{Bot as BotRow, BotRepository, Payment, PaymentRepository};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct DeliveryService {
    payments: PaymentRepository,
    bots: BotRepository,
}

impl DeliveryService {
    pub fn new(payments: PaymentRepository, bots: BotRepository) -> Self {
        Self { payments, bots }
    }

    pub async fn deliver(&self, payment_id: &str) -> AppResult<()> {
        let payment = self
            .payments
            .find_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("payment".to_string()))?;
        if payment.status != "paid" {
            return Err(AppError::BadRequest(format!(
                "payment {} is not paid",
                payment_id
            )));
        }

        let bot_row = self
            .bots
            .find_by_id(payment.bot_id)
            .await?
            .ok_or_else(|| AppError::NotFound("bot".to_string()))?;

        let chat_id: i64 = payment
            .customer_user_id
            .parse()
            .map_err(|_| AppError::Internal("customer id is not a chat id".to_string()))?;

        let text = access_message(&payment, &bot_row);
        let bot = Bot::new(bot_row.token.clone());
        bot.send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| AppError::Internal(format!("telegram send failed: {}", e)))?;

        info!(payment_id = %payment.payment_id, bot_id = payment.bot_id, "access delivered");
        Ok(())
    }
}

fn access_message(payment: &Payment, bot: &BotRow) -> String {
    match bot.access_link.as_deref().filter(|l| !l.is_empty()) {
        Some(link) => format!(
            "✅ <b>Pagamento confirmado!</b>\n\n\
             Obrigado pela compra de <b>{}</b>.\n\n\
             Seu acesso: {}",
            payment.product_name, link
        ),
        None => format!(
            "✅ <b>Pagamento confirmado!</b>\n\n\
             Obrigado pela compra de <b>{}</b>.\n\n\
             Em instantes você receberá seu acesso.",
            payment.product_name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn fixtures(access_link: Option<&str>) -> (Payment, BotRow) {
        let payment = Payment {
            payment_id: "BOT1_1700000000_aa".to_string(),
            bot_id: 1,
            amount: Decimal::from(10),
            product_name: "Curso".to_string(),
            product_description: None,
            customer_user_id: "111".to_string(),
            gateway_type: "bolt".to_string(),
            gateway_transaction_id: None,
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
            order_bump_accepted: false,
            order_bump_value: None,
            fbclid: None,
            fbp: None,
            fbc: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            campaign_code: None,
            pageview_event_id: None,
            client_ip: None,
            client_user_agent: None,
        };
        let bot = BotRow {
            id: 1,
            seller_id: 1,
            token: "123:abc".to_string(),
            display_name: "Loja".to_string(),
            welcome_message: None,
            welcome_media_url: None,
            access_link: access_link.map(String::from),
            plans: sqlx::types::Json(vec![]),
            is_active: true,
            total_sales: 0,
            total_revenue: Decimal::ZERO,
            created_at: Utc::now(),
        };
        (payment, bot)
    }

    #[test]
    fn message_includes_access_link_when_configured() {
        let (payment, bot) = fixtures(Some("https://t.me/+vip"));
        let text = access_message(&payment, &bot);
        assert!(text.contains("https://t.me/+vip"));
        assert!(text.contains("Curso"));
    }

    #[test]
    fn message_falls_back_without_a_link() {
        let (payment, bot) = fixtures(None);
        let text = access_message(&payment, &bot);
        assert!(!text.contains("Seu acesso:"));
        assert!(text.contains("Pagamento confirmado"));
    }
}
