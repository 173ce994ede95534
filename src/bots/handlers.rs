//! Message and callback handling for sales bots. Callback payloads index
//! into the bot's configured plans so they stay inside Telegram's 64-byte
//! callback-data limit; every purchase mutation goes through the
//! orchestrator.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode};
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::database::{Bot as BotRow, BotPlan};
use crate::services::orchestrator::{CreatePixRequest, PixCheckout, VerifyOutcome};

use super::BotContext;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// Entry point; the argument carries a tracking token from the redirect.
    Start(String),
}

/// Parsed callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Buyer picked a plan button.
    Buy { plan: usize },
    /// Buyer answered the order-bump prompt.
    Bump { plan: usize, accepted: bool },
    /// Buyer took the downsell offer for a plan.
    Downsell { plan: usize },
    /// Buyer pressed "Verificar Pagamento".
    Verify { payment_id: String },
}

pub fn parse_callback(data: &str) -> Option<CallbackAction> {
    let mut parts = data.splitn(3, ':');
    match parts.next()? {
        "buy" => Some(CallbackAction::Buy {
            plan: parts.next()?.parse().ok()?,
        }),
        "bump" => {
            let plan = parts.next()?.parse().ok()?;
            let accepted = match parts.next()? {
                "yes" => true,
                "no" => false,
                _ => return None,
            };
            Some(CallbackAction::Bump { plan, accepted })
        }
        "down" => Some(CallbackAction::Downsell {
            plan: parts.next()?.parse().ok()?,
        }),
        "verify" => {
            let payment_id = parts.next()?;
            if payment_id.is_empty() {
                return None;
            }
            Some(CallbackAction::Verify {
                payment_id: payment_id.to_string(),
            })
        }
        _ => None,
    }
}

pub fn schema() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    command: Command,
    ctx: Arc<BotContext>,
) -> HandlerResult {
    match command {
        Command::Start(payload) => handle_start(bot, msg, payload, ctx).await,
    }
}

async fn handle_start(bot: Bot, msg: Message, payload: String, ctx: Arc<BotContext>) -> HandlerResult {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let telegram_user_id = user.id.0.to_string();
    info!(bot_id = ctx.bot_id, user = %telegram_user_id, "/start received");

    refresh_tracking(&ctx, &telegram_user_id, payload.trim()).await;

    let Some(bot_row) = ctx.services.bots.find_by_id(ctx.bot_id).await? else {
        return Ok(());
    };

    let text = welcome_text(&bot_row);
    let keyboard = plans_keyboard(&bot_row.plans.0);

    match bot_row
        .welcome_media_url
        .as_deref()
        .and_then(|u| reqwest::Url::parse(u).ok())
    {
        Some(url) => {
            bot.send_photo(msg.chat.id, InputFile::url(url))
                .caption(text)
                .parse_mode(ParseMode::Html)
                .reply_markup(keyboard)
                .await?;
        }
        None => {
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(keyboard)
                .await?;
        }
    }
    Ok(())
}

/// Merges the start-payload token into the tracking store and pins it as the
/// user's session, so charge creation later finds the attribution bundle.
async fn refresh_tracking(ctx: &Arc<BotContext>, telegram_user_id: &str, token: &str) {
    let token = Some(token).filter(|t| t.starts_with("tracking_"));

    let recovered = match ctx
        .services
        .tracking
        .recover(token, None, Some(telegram_user_id), Some(ctx.bot_id), None)
        .await
    {
        Ok(record) => record,
        Err(err) => {
            warn!(error = %err, "tracking recovery failed on /start");
            None
        }
    };

    let Some(mut record) = recovered else {
        return;
    };
    record.bot_id = Some(ctx.bot_id);
    record.customer_user_id = Some(telegram_user_id.to_string());

    if let Err(err) = ctx.services.tracking.store(&record).await {
        warn!(error = %err, "tracking refresh failed");
    }
    if let Err(err) = ctx
        .services
        .bots
        .set_tracking_session(ctx.bot_id, telegram_user_id, &record.tracking_token)
        .await
    {
        warn!(error = %err, "tracking session pin failed");
    }

    ctx.spawn_pageview(record);
}

async fn handle_callback(bot: Bot, query: CallbackQuery, ctx: Arc<BotContext>) -> HandlerResult {
    let Some(data) = query.data.as_deref() else {
        bot.answer_callback_query(query.id.clone()).await?;
        return Ok(());
    };
    let Some(action) = parse_callback(data) else {
        bot.answer_callback_query(query.id.clone()).await?;
        return Ok(());
    };
    let Some(message) = query.message.as_ref() else {
        bot.answer_callback_query(query.id.clone()).await?;
        return Ok(());
    };
    let chat_id = message.chat().id;
    let telegram_user_id = query.from.id.0.to_string();

    bot.answer_callback_query(query.id.clone()).await?;

    let Some(bot_row) = ctx.services.bots.find_by_id(ctx.bot_id).await? else {
        return Ok(());
    };

    match action {
        CallbackAction::Buy { plan } => {
            let Some(plan_cfg) = bot_row.plans.0.get(plan) else {
                return Ok(());
            };
            ctx.spawn_viewcontent(telegram_user_id.clone());
            if plan_cfg.order_bump.is_some() {
                send_bump_prompt(&bot, chat_id, plan, plan_cfg).await?;
            } else {
                create_and_present(&bot, chat_id, &ctx, &bot_row, &telegram_user_id, plan, false, false)
                    .await?;
            }
        }
        CallbackAction::Bump { plan, accepted } => {
            create_and_present(&bot, chat_id, &ctx, &bot_row, &telegram_user_id, plan, accepted, false)
                .await?;
        }
        CallbackAction::Downsell { plan } => {
            create_and_present(&bot, chat_id, &ctx, &bot_row, &telegram_user_id, plan, false, true)
                .await?;
        }
        CallbackAction::Verify { payment_id } => {
            verify_and_report(&bot, chat_id, &ctx, &payment_id).await?;
        }
    }
    Ok(())
}

async fn send_bump_prompt(
    bot: &Bot,
    chat_id: ChatId,
    plan_index: usize,
    plan: &BotPlan,
) -> HandlerResult {
    let Some(bump) = plan.order_bump.as_ref() else {
        return Ok(());
    };
    let keyboard = InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Sim, quero!", format!("bump:{}:yes", plan_index)),
        InlineKeyboardButton::callback("Não, obrigado", format!("bump:{}:no", plan_index)),
    ]]);
    bot.send_message(
        chat_id,
        format!(
            "🎁 Oferta especial: adicione <b>{}</b> por apenas <b>R$ {}</b>?",
            bump.name, bump.value
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard)
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn create_and_present(
    bot: &Bot,
    chat_id: ChatId,
    ctx: &Arc<BotContext>,
    bot_row: &BotRow,
    telegram_user_id: &str,
    plan_index: usize,
    bump_accepted: bool,
    downsell: bool,
) -> HandlerResult {
    let Some(plan) = bot_row.plans.0.get(plan_index) else {
        return Ok(());
    };

    let (product_name, amount) = if downsell {
        match plan.downsell.as_ref() {
            Some(d) => (d.name.clone(), d.price),
            None => (plan.name.clone(), plan.price),
        }
    } else {
        (plan.name.clone(), plan.price)
    };

    let order_bump_value = if bump_accepted {
        plan.order_bump.as_ref().map(|b| b.value)
    } else {
        None
    };
    let total = amount + order_bump_value.unwrap_or_default();

    let request = CreatePixRequest {
        bot_id: ctx.bot_id,
        telegram_user_id: telegram_user_id.to_string(),
        amount: total,
        product_name,
        product_description: plan.description.clone(),
        is_downsell: downsell,
        is_upsell: false,
        is_remarketing: false,
        order_bump_accepted: bump_accepted,
        order_bump_value,
    };

    match ctx.services.orchestrator.create_pix(request).await {
        Ok(checkout) => {
            send_checkout(bot, chat_id, &checkout).await?;
        }
        Err(err) => {
            warn!(bot_id = ctx.bot_id, error = %err, "pix creation failed");
            let mut text = format!("⚠️ {}", err.client_message());
            // Offer the cheaper option when the main plan could not charge.
            let mut keyboard_rows = Vec::new();
            if !downsell {
                if let Some(d) = plan.downsell.as_ref() {
                    text.push_str("\n\nQue tal uma alternativa?");
                    keyboard_rows.push(vec![InlineKeyboardButton::callback(
                        format!("{} - R$ {}", d.name, d.price),
                        format!("down:{}", plan_index),
                    )]);
                }
            }
            let mut send = bot.send_message(chat_id, text);
            if !keyboard_rows.is_empty() {
                send = send.reply_markup(InlineKeyboardMarkup::new(keyboard_rows));
            }
            send.await?;
        }
    }
    Ok(())
}

async fn send_checkout(bot: &Bot, chat_id: ChatId, checkout: &PixCheckout) -> HandlerResult {
    let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "✅ Verificar Pagamento",
        format!("verify:{}", checkout.payment_id),
    )]]);
    let mut text = format!(
        "💠 <b>PIX gerado!</b> R$ {}\n\n\
         Copie o código abaixo e pague no app do seu banco:\n\n\
         <code>{}</code>",
        checkout.amount, checkout.pix_code
    );
    if let Some(qr) = checkout.qr_code_url.as_deref() {
        text.push_str(&format!("\n\nQR Code: {}", qr));
    }
    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await?;
    Ok(())
}

async fn verify_and_report(
    bot: &Bot,
    chat_id: ChatId,
    ctx: &Arc<BotContext>,
    payment_id: &str,
) -> HandlerResult {
    let text = match ctx.services.orchestrator.verify_payment(payment_id).await {
        Ok(VerifyOutcome::Paid) => "✅ Pagamento confirmado! Seu acesso chega em instantes.",
        Ok(VerifyOutcome::Pending) => "⏳ Ainda não identificamos o pagamento. Tente novamente em alguns segundos.",
        Ok(VerifyOutcome::Failed) => "❌ Este pagamento foi cancelado ou expirou. Gere um novo PIX.",
        Err(err) => {
            warn!(payment_id, error = %err, "verify failed");
            "⏳ Não foi possível verificar agora. Tente novamente em instantes."
        }
    };
    bot.send_message(chat_id, text).await?;
    Ok(())
}

fn welcome_text(bot_row: &BotRow) -> String {
    bot_row
        .welcome_message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Bem-vindo a <b>{}</b>! Escolha uma opção:", bot_row.display_name))
}

fn plans_keyboard(plans: &[BotPlan]) -> InlineKeyboardMarkup {
    let rows = plans
        .iter()
        .enumerate()
        .map(|(index, plan)| {
            vec![InlineKeyboardButton::callback(
                format!("{} - R$ {}", plan.name, plan.price),
                format!("buy:{}", index),
            )]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_parsing_covers_every_action() {
        assert_eq!(parse_callback("buy:0"), Some(CallbackAction::Buy { plan: 0 }));
        assert_eq!(
            parse_callback("bump:2:yes"),
            Some(CallbackAction::Bump {
                plan: 2,
                accepted: true
            })
        );
        assert_eq!(
            parse_callback("bump:2:no"),
            Some(CallbackAction::Bump {
                plan: 2,
                accepted: false
            })
        );
        assert_eq!(
            parse_callback("down:1"),
            Some(CallbackAction::Downsell { plan: 1 })
        );
        assert_eq!(
            parse_callback("verify:BOT1_1700000000_aa"),
            Some(CallbackAction::Verify {
                payment_id: "BOT1_1700000000_aa".to_string()
            })
        );
    }

    #[test]
    fn malformed_callbacks_are_ignored() {
        for data in ["", "buy", "buy:x", "bump:1:maybe", "verify:", "selfdestruct"] {
            assert_eq!(parse_callback(data), None, "data={data}");
        }
    }

    #[test]
    fn keyboard_has_one_row_per_plan() {
        let plans = vec![
            BotPlan {
                name: "VIP".to_string(),
                price: "49.90".parse().unwrap(),
                description: None,
                order_bump: None,
                downsell: None,
            },
            BotPlan {
                name: "Básico".to_string(),
                price: "19.90".parse().unwrap(),
                description: None,
                order_bump: None,
                downsell: None,
            },
        ];
        let keyboard = plans_keyboard(&plans);
        assert_eq!(keyboard.inline_keyboard.len(), 2);
    }
}
