//! Seller gateway credential verification. Decrypts the stored credential
//! blob, makes the driver's cheap authenticated call, and records the result
//! on the row so routing only picks gateways that are known to work.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::gateways::GatewayKind;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct VerifyGatewayResponse {
    pub gateway_id: i64,
    pub gateway_type: String,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// POST /api/gateways/{gateway_id}/verify
pub async fn verify_gateway(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<i64>,
) -> AppResult<Json<VerifyGatewayResponse>> {
    let record = state
        .gateways
        .find_by_id(gateway_id)
        .await?
        .ok_or_else(|| AppError::NotFound("gateway".to_string()))?;

    let kind = GatewayKind::from_str(&record.gateway_type)?;
    let credentials = state.cipher.decrypt_credentials(&record.credentials)?;
    let adapter = state.factory.create(kind, &credentials)?;

    match adapter.verify_credentials().await {
        Ok(()) => {
            state.gateways.mark_verified(record.id).await?;
            info!(gateway_id, gateway = %kind, "gateway credentials verified");
            Ok(Json(VerifyGatewayResponse {
                gateway_id: record.id,
                gateway_type: record.gateway_type,
                verified: true,
                detail: None,
            }))
        }
        Err(err) => {
            warn!(gateway_id, gateway = %kind, error = %err, "gateway verification failed");
            state.gateways.mark_unverified(record.id).await?;
            Ok(Json(VerifyGatewayResponse {
                gateway_id: record.id,
                gateway_type: record.gateway_type,
                verified: false,
                detail: Some(err.user_message()),
            }))
        }
    }
}
