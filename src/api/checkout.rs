//! Checkout payload for the payment page: current status from the database,
//! PIX code and QR from the cached checkout blob.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::error::{AppError, AppResult};

use super::AppState;

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub payment_id: String,
    pub status: String,
    pub amount: rust_decimal::Decimal,
    pub product_name: String,
    pub gateway: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pix_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<String>,
}

/// GET /payment/{payment_id}
pub async fn get_checkout(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
) -> AppResult<Json<CheckoutResponse>> {
    let payment = state
        .payments
        .find_by_payment_id(&payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("payment".to_string()))?;

    let cached = match state.orchestrator.find_checkout(&payment_id).await {
        Ok(cached) => cached,
        Err(err) => {
            warn!(payment_id = %payment_id, error = %err, "checkout cache read failed");
            None
        }
    };

    // The PIX code is only useful while the charge can still be paid.
    let (pix_code, qr_code_url) = if payment.status == "pending" {
        match cached {
            Some(checkout) => (Some(checkout.pix_code), checkout.qr_code_url),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    Ok(Json(CheckoutResponse {
        payment_id: payment.payment_id,
        status: payment.status,
        amount: payment.amount,
        product_name: payment.product_name,
        gateway: payment.gateway_type,
        pix_code,
        qr_code_url,
    }))
}
