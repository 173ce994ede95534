//! Meta Pixel configuration for the redirect pool a bot belongs to. Access
//! tokens are written encrypted and never read back out.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::RedirectPool;
use crate::error::{AppError, AppResult};

use super::AppState;

#[derive(Debug, Serialize)]
pub struct PixelConfigResponse {
    pub pool_id: i64,
    pub pixel_id: Option<String>,
    pub meta_tracking_enabled: bool,
    pub send_pageview: bool,
    pub send_viewcontent: bool,
    pub send_purchase: bool,
    pub test_event_code: Option<String>,
    pub has_access_token: bool,
}

impl PixelConfigResponse {
    fn from_pool(pool: RedirectPool) -> Self {
        Self {
            pool_id: pool.id,
            pixel_id: pool.pixel_id.clone(),
            meta_tracking_enabled: pool.meta_tracking_enabled,
            send_pageview: pool.send_pageview,
            send_viewcontent: pool.send_viewcontent,
            send_purchase: pool.send_purchase,
            test_event_code: pool.test_event_code.clone(),
            has_access_token: pool
                .access_token
                .as_deref()
                .is_some_and(|t| !t.is_empty()),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct PixelConfigRequest {
    pub pixel_id: Option<String>,
    /// Plaintext token; stored encrypted. Omitting it keeps the current one.
    pub access_token: Option<String>,
    #[serde(default = "default_true")]
    pub send_pageview: bool,
    #[serde(default = "default_true")]
    pub send_viewcontent: bool,
    #[serde(default = "default_true")]
    pub send_purchase: bool,
    pub test_event_code: Option<String>,
}

/// GET /api/bots/{bot_id}/meta-pixel
pub async fn get_pixel_config(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<i64>,
) -> AppResult<Json<PixelConfigResponse>> {
    let pool = state
        .pools
        .find_for_bot(bot_id)
        .await?
        .ok_or_else(|| AppError::NotFound("redirect pool".to_string()))?;
    Ok(Json(PixelConfigResponse::from_pool(pool)))
}

/// POST /api/bots/{bot_id}/meta-pixel
pub async fn update_pixel_config(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<i64>,
    Json(request): Json<PixelConfigRequest>,
) -> AppResult<Json<PixelConfigResponse>> {
    let pool = state
        .pools
        .find_for_bot(bot_id)
        .await?
        .ok_or_else(|| AppError::NotFound("redirect pool".to_string()))?;

    let encrypted_token = match request.access_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Some(state.cipher.encrypt(token)?),
        None => None,
    };

    let updated = state
        .pools
        .update_pixel_config(
            pool.id,
            request.pixel_id.as_deref().filter(|p| !p.is_empty()),
            encrypted_token.as_deref(),
            request.send_pageview,
            request.send_viewcontent,
            request.send_purchase,
            request.test_event_code.as_deref().filter(|c| !c.is_empty()),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("redirect pool".to_string()))?;

    info!(bot_id, pool_id = updated.id, "pixel config updated");
    Ok(Json(PixelConfigResponse::from_pool(updated)))
}
