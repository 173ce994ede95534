//! Unified error type for the HTTP surface and service layer.
//!
//! Subsystems keep their own error enums (gateway, database, cache, jobs);
//! this type aggregates them at the boundary where an HTTP status and a
//! client-safe message are needed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::gateways::GatewayError;
use crate::jobs::JobError;
use crate::services::crypto::CryptoError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Gateway(err) => match err {
                GatewayError::InvalidInput { .. } | GatewayError::WebhookMalformed { .. } => {
                    StatusCode::BAD_REQUEST
                }
                GatewayError::Unauthorized { .. }
                | GatewayError::Rejected { .. }
                | GatewayError::ChargeRefused { .. } => StatusCode::BAD_GATEWAY,
                GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                GatewayError::Transient { .. } => StatusCode::BAD_GATEWAY,
            },
            AppError::Database(_) | AppError::Cache(_) | AppError::Config(_)
            | AppError::Job(_) | AppError::Crypto(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to return to a client. Infrastructure details never leak.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Gateway(err) => err.user_message(),
            AppError::NotFound(what) => format!("{} not found", what),
            AppError::BadRequest(message) => message.clone(),
            AppError::Database(_)
            | AppError::Cache(_)
            | AppError::Config(_)
            | AppError::Job(_)
            | AppError::Crypto(_)
            | AppError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = Json(json!({ "error": self.client_message() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_detail_does_not_leak_to_clients() {
        let err = AppError::Database(DatabaseError::Query {
            message: "relation payments does not exist".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), "internal error");
    }

    #[test]
    fn malformed_webhook_maps_to_400() {
        let err = AppError::Gateway(GatewayError::WebhookMalformed {
            message: "not json".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
