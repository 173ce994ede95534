use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::debug;

use crate::gateways::driver::GatewayDriver;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    map_raw_status, GatewayKind, PixCharge, PixChargeRequest, StatusLookup, WebhookOutcome,
};
use crate::gateways::util::{json_amount, json_string, AuthScheme, GatewayHttpClient};

use super::required_credential;

const BASE_URL: &str = "https://api.syncpayments.com.br";
const GATEWAY: &str = "syncpay";
/// Bearer tokens live 1h upstream; refresh a minute early.
const TOKEN_SAFETY_SECS: i64 = 60;

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// SyncPay bills in reais and requires a two-step flow: exchange the client
/// credentials for a short-lived bearer, then create the cash-in.
pub struct SyncpayDriver {
    http: GatewayHttpClient,
    client_id: String,
    client_secret: String,
    split_user_id: Option<String>,
    token_cache: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct AuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl SyncpayDriver {
    pub fn new(
        credentials: &HashMap<String, String>,
        split_user_id: Option<String>,
    ) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(30), 2)?,
            client_id: required_credential(credentials, "client_id", GATEWAY)?,
            client_secret: required_credential(credentials, "client_secret", GATEWAY)?,
            split_user_id,
            token_cache: Mutex::new(None),
        })
    }

    async fn bearer_token(&self) -> GatewayResult<String> {
        let mut cache = self.token_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let payload = serde_json::json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });
        let response: AuthTokenResponse = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &format!("{}/api/partner/v1/auth-token", BASE_URL),
                &AuthScheme::None,
                Some(&payload),
                &[],
            )
            .await?;

        let ttl = response.expires_in.unwrap_or(3600);
        let expires_at = Utc::now() + chrono::Duration::seconds((ttl - TOKEN_SAFETY_SECS).max(30));
        debug!(gateway = GATEWAY, "bearer token refreshed");
        *cache = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at,
        });
        Ok(response.access_token)
    }

    /// Webhook fields arrive either at the top level or wrapped in `data{}`.
    fn webhook_field<'a>(root: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
        root.get("data")
            .and_then(|d| d.get(key))
            .or_else(|| root.get(key))
    }
}

#[async_trait]
impl GatewayDriver for SyncpayDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        let token = self.bearer_token().await?;

        let mut payload = serde_json::json!({
            "amount": request.amount,
            "description": request.description,
            "external_reference": request.payment_id,
            "webhook_url": request.webhook_url,
            "payment_method": "pix",
            "client": {
                "name": request.customer.name.clone().unwrap_or_else(|| "Cliente".to_string()),
            },
        });
        if let Some(user_id) = &self.split_user_id {
            payload["split"] = serde_json::json!([{ "user_id": user_id, "percentage": 100 }]);
        }

        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &format!("{}/api/partner/v1/cash-in", BASE_URL),
                &AuthScheme::Bearer(token),
                Some(&payload),
                &[],
            )
            .await?;

        let data = response.get("data").unwrap_or(&response);
        let pix_code = data
            .get("pix_code")
            .or_else(|| data.get("paymentCode"))
            .or_else(|| data.get("pix_copy_paste"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "cash-in response missing pix code".to_string(),
                raw_body: Some(response.to_string()),
            })?;
        let transaction_id = data
            .get("id")
            .or_else(|| data.get("identifier"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "cash-in response missing transaction id".to_string(),
                raw_body: Some(response.to_string()),
            })?;

        Ok(PixCharge {
            pix_code,
            qr_code_url: data.get("qr_code_url").and_then(json_string),
            transaction_id,
            transaction_hash: data.get("hash").and_then(json_string),
            reference: Some(request.payment_id.clone()),
        })
    }

    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let root: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookMalformed {
                message: format!("syncpay webhook is not valid JSON: {}", e),
            })?;

        let raw_status = Self::webhook_field(&root, "status")
            .and_then(json_string)
            .unwrap_or_default();

        Ok(WebhookOutcome {
            transaction_id: Self::webhook_field(&root, "id")
                .or_else(|| Self::webhook_field(&root, "identifier"))
                .and_then(json_string),
            transaction_hash: Self::webhook_field(&root, "hash").and_then(json_string),
            status: map_raw_status(&raw_status),
            raw_status,
            amount: Self::webhook_field(&root, "amount").and_then(json_amount),
            external_reference: Self::webhook_field(&root, "external_reference")
                .or_else(|| Self::webhook_field(&root, "reference"))
                .and_then(json_string),
            end_to_end_id: Self::webhook_field(&root, "end_to_end_id").and_then(json_string),
            payer_name: Self::webhook_field(&root, "payer_name").and_then(json_string),
        })
    }

    async fn get_payment_status(&self, _transaction_id: &str) -> GatewayResult<StatusLookup> {
        // SyncPay does not expose a status endpoint; only its webhook reports
        // transitions. Not retryable so reconciliation leaves these pending.
        Err(GatewayError::InvalidInput {
            message: "syncpay has no status endpoint".to_string(),
            field: None,
        })
    }

    async fn verify_credentials(&self) -> GatewayResult<()> {
        self.bearer_token().await.map(|_| ())
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::Syncpay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PixStatus;

    fn driver() -> SyncpayDriver {
        let mut creds = HashMap::new();
        creds.insert("client_id".to_string(), "id".to_string());
        creds.insert("client_secret".to_string(), "secret".to_string());
        SyncpayDriver::new(&creds, None).unwrap()
    }

    #[test]
    fn parses_data_wrapped_webhook_with_uppercase_status() {
        let body = br#"{"event":"cashin","data":{"id":"sp_123","status":"PAID_OUT","amount":"49.90","external_reference":"BOT7_1700000000_aabbccdd"}}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.raw_status, "PAID_OUT");
        assert_eq!(outcome.transaction_id.as_deref(), Some("sp_123"));
        assert_eq!(
            outcome.external_reference.as_deref(),
            Some("BOT7_1700000000_aabbccdd")
        );
    }

    #[test]
    fn parses_flat_webhook_shape() {
        let body = br#"{"identifier":"sp_456","status":"pending","amount":10.5}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Pending);
        assert_eq!(outcome.transaction_id.as_deref(), Some("sp_456"));
    }

    #[test]
    fn rejects_non_json_webhook() {
        assert!(matches!(
            driver().process_webhook(b"not json"),
            Err(GatewayError::WebhookMalformed { .. })
        ));
    }
}
