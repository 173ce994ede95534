//! Inbound gateway webhooks. The contract with upstreams is ACK-200: any
//! well-formed JSON gets a 200 even when it matches no payment, so gateways
//! never retry-storm us over our own processing trouble. Only an unparseable
//! body earns a 400.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::{error, info, warn};

use crate::gateways::{GatewayError, GatewayKind};
use crate::services::WebhookDisposition;

use super::AppState;

/// POST /webhook/payment/{gateway}
pub async fn handle_payment_webhook(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let kind = match GatewayKind::from_str(&gateway) {
        Ok(kind) => kind,
        Err(_) => {
            warn!(gateway = %gateway, "webhook for unknown gateway tag");
            return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown gateway"})))
                .into_response();
        }
    };

    let adapter = match state.factory.webhook_parser(kind) {
        Ok(adapter) => adapter,
        Err(err) => {
            error!(gateway = %kind, error = %err, "webhook parser construction failed");
            return ok();
        }
    };

    let outcome = match adapter.process_webhook(&body) {
        Ok(outcome) => outcome,
        Err(GatewayError::WebhookMalformed { message }) => {
            warn!(gateway = %kind, %message, "unparseable webhook body");
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid payload"})))
                .into_response();
        }
        Err(err) => {
            warn!(gateway = %kind, error = %err, "webhook parse failed");
            return ok();
        }
    };

    match state.orchestrator.apply_webhook(kind, &outcome).await {
        Ok(disposition) => {
            match &disposition {
                WebhookDisposition::PaidPromoted { payment_id } => {
                    info!(gateway = %kind, payment_id = %payment_id, "webhook promoted payment");
                }
                WebhookDisposition::MarkedFailed { payment_id } => {
                    info!(gateway = %kind, payment_id = %payment_id, "webhook failed payment");
                }
                WebhookDisposition::AlreadyFinal { payment_id } => {
                    info!(gateway = %kind, payment_id = %payment_id, "duplicate webhook ignored");
                }
                WebhookDisposition::StillPending { .. } | WebhookDisposition::Unmatched => {}
            }
            ok()
        }
        Err(err) => {
            // Our problem, not theirs. ACK and let the reconciler catch up.
            error!(gateway = %kind, error = %err, "webhook application failed");
            ok()
        }
    }
}

fn ok() -> axum::response::Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}
