use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::gateways::driver::GatewayDriver;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    map_raw_status, GatewayKind, PixCharge, PixChargeRequest, StatusLookup, WebhookOutcome,
};
use crate::gateways::util::{
    document_or_synthesized, json_amount, json_string, synthesize_email, to_centavos, AuthScheme,
    GatewayHttpClient,
};

use super::required_credential;

const BASE_URL: &str = "https://api.babylonpag.com.br";
const GATEWAY: &str = "babylon";

/// Babylon shares Bolt's edge-function API shape but authenticates with a
/// bearer token and keeps a conventional status vocabulary.
pub struct BabylonDriver {
    http: GatewayHttpClient,
    api_key: String,
}

impl BabylonDriver {
    pub fn new(credentials: &HashMap<String, String>) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(20), 2)?,
            api_key: required_credential(credentials, "api_key", GATEWAY)?,
        })
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Bearer(self.api_key.clone())
    }
}

#[async_trait]
impl GatewayDriver for BabylonDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        let centavos = to_centavos(request.amount)?;
        if centavos < 1 {
            return Err(GatewayError::InvalidInput {
                message: "babylon amount must be at least 1 centavo".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let payload = serde_json::json!({
            "amount": centavos,
            "payment_method": "pix",
            "external_reference": request.payment_id,
            "postback_url": request.webhook_url,
            "customer": {
                "name": request.customer.name.clone().unwrap_or_else(|| "Cliente".to_string()),
                "email": request.customer.email.clone()
                    .unwrap_or_else(|| synthesize_email(&request.payment_id)),
                "document": document_or_synthesized(request.customer.document.as_deref(), &request.payment_id),
            },
        });

        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &format!("{}/functions/v1/transactions", BASE_URL),
                &self.auth(),
                Some(&payload),
                &[],
            )
            .await?;

        let data = response.get("data").unwrap_or(&response);
        let pix = data.get("pix").unwrap_or(data);
        let pix_code = pix
            .get("payload")
            .or_else(|| pix.get("qr_code"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "transaction response missing pix payload".to_string(),
                raw_body: Some(response.to_string()),
            })?;
        let transaction_id = data
            .get("id")
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "transaction response missing id".to_string(),
                raw_body: Some(response.to_string()),
            })?;

        Ok(PixCharge {
            pix_code,
            qr_code_url: pix.get("qr_code_url").and_then(json_string),
            transaction_id,
            transaction_hash: None,
            reference: Some(request.payment_id.clone()),
        })
    }

    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let root: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookMalformed {
                message: format!("babylon webhook is not valid JSON: {}", e),
            })?;

        let data = root.get("data").unwrap_or(&root);
        let raw_status = data.get("status").and_then(json_string).unwrap_or_default();

        Ok(WebhookOutcome {
            transaction_id: data.get("id").and_then(json_string),
            transaction_hash: None,
            status: map_raw_status(&raw_status),
            raw_status,
            amount: data.get("amount").and_then(json_amount),
            external_reference: data.get("external_reference").and_then(json_string),
            end_to_end_id: None,
            payer_name: None,
        })
    }

    async fn get_payment_status(&self, transaction_id: &str) -> GatewayResult<StatusLookup> {
        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::GET,
                &format!("{}/functions/v1/transactions/{}", BASE_URL, transaction_id),
                &self.auth(),
                None,
                &[],
            )
            .await?;

        let data = response.get("data").unwrap_or(&response);
        let raw_status = data.get("status").and_then(json_string).unwrap_or_default();
        Ok(StatusLookup {
            status: map_raw_status(&raw_status),
            raw_status,
            paid_at: None,
        })
    }

    async fn verify_credentials(&self) -> GatewayResult<()> {
        match self.get_payment_status("credential-check").await {
            Ok(_) => Ok(()),
            Err(GatewayError::Rejected { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::Babylon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PixStatus;

    #[test]
    fn webhook_with_nested_data_parses() {
        let mut creds = HashMap::new();
        creds.insert("api_key".to_string(), "key".to_string());
        let driver = BabylonDriver::new(&creds).unwrap();

        let body = br#"{"data":{"id":"bb_1","status":"approved","amount":2990,"external_reference":"BOT9_1700000000_aabbccdd"}}"#;
        let outcome = driver.process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.transaction_id.as_deref(), Some("bb_1"));
    }
}
