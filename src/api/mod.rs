//! HTTP surface: gateway webhooks, the checkout page payload, pixel
//! configuration, and health probes.

pub mod checkout;
pub mod gateways;
pub mod pixel;
pub mod webhooks;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::database::{GatewayRepository, PaymentRepository, PoolRepository};
use crate::gateways::GatewayFactory;
use crate::health::HealthChecker;
use crate::middleware::UuidRequestId;
use crate::services::{CredentialCipher, PaymentOrchestrator};

pub struct AppState {
    pub orchestrator: PaymentOrchestrator,
    pub factory: GatewayFactory,
    pub payments: PaymentRepository,
    pub pools: PoolRepository,
    pub gateways: GatewayRepository,
    pub cipher: CredentialCipher,
    pub health: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/webhook/payment/{gateway}",
            axum::routing::post(webhooks::handle_payment_webhook),
        )
        .route("/payment/{payment_id}", get(checkout::get_checkout))
        .route(
            "/api/bots/{bot_id}/meta-pixel",
            get(pixel::get_pixel_config).post(pixel::update_pixel_config),
        )
        .route(
            "/api/gateways/{gateway_id}/verify",
            axum::routing::post(gateways::verify_gateway),
        )
        .route("/health", get(health))
        .route("/health/live", get(|| async { StatusCode::OK }))
        .route("/health/ready", get(readiness))
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.health.check_readiness().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
