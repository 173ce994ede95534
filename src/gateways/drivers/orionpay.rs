use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::gateways::driver::GatewayDriver;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    map_raw_status, GatewayKind, PixCharge, PixChargeRequest, StatusLookup, WebhookOutcome,
};
use crate::gateways::util::{
    document_or_synthesized, json_amount, json_string, synthesize_email, AuthScheme, GatewayHttpClient,
};

use super::required_credential;

const BASE_URL: &str = "https://api.orionpay.com.br";
const GATEWAY: &str = "orionpay";

/// OrionPay bills in reais with an R$5.00 floor.
pub struct OrionpayDriver {
    http: GatewayHttpClient,
    api_key: String,
}

impl OrionpayDriver {
    pub fn new(credentials: &HashMap<String, String>) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(20), 2)?,
            api_key: required_credential(credentials, "api_key", GATEWAY)?,
        })
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Header {
            name: "X-API-Key",
            value: self.api_key.clone(),
        }
    }
}

#[async_trait]
impl GatewayDriver for OrionpayDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        if request.amount < Decimal::from(5) {
            return Err(GatewayError::InvalidInput {
                message: format!("orionpay minimum is R$5.00, got {}", request.amount),
                field: Some("amount".to_string()),
            });
        }

        let payload = serde_json::json!({
            "amount": request.amount,
            "description": request.description,
            "external_reference": request.payment_id,
            "webhook_url": request.webhook_url,
            "payer": {
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
                &format!("{}/api/v1/pix/personal", BASE_URL),
                &self.auth(),
                Some(&payload),
                &[],
            )
            .await?;

        let data = response.get("data").unwrap_or(&response);
        let pix_code = data
            .get("pix_code")
            .or_else(|| data.get("emv"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "pix response missing emv code".to_string(),
                raw_body: Some(response.to_string()),
            })?;
        let transaction_id = data
            .get("id")
            .or_else(|| data.get("transaction_id"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "pix response missing transaction id".to_string(),
                raw_body: Some(response.to_string()),
            })?;

        Ok(PixCharge {
            pix_code,
            qr_code_url: data.get("qr_code_url").and_then(json_string),
            transaction_id,
            transaction_hash: None,
            reference: Some(request.payment_id.clone()),
        })
    }

    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let root: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookMalformed {
                message: format!("orionpay webhook is not valid JSON: {}", e),
            })?;

        let data = root.get("data").unwrap_or(&root);
        let raw_status = data.get("status").and_then(json_string).unwrap_or_default();

        Ok(WebhookOutcome {
            transaction_id: data
                .get("id")
                .or_else(|| data.get("transaction_id"))
                .and_then(json_string),
            transaction_hash: None,
            status: map_raw_status(&raw_status),
            raw_status,
            amount: data.get("amount").and_then(json_amount),
            external_reference: data.get("external_reference").and_then(json_string),
            end_to_end_id: data.get("end_to_end_id").and_then(json_string),
            payer_name: None,
        })
    }

    async fn get_payment_status(&self, transaction_id: &str) -> GatewayResult<StatusLookup> {
        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::GET,
                &format!("{}/api/v1/pix/status/{}", BASE_URL, transaction_id),
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
        GatewayKind::Orionpay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PixStatus;

    fn driver() -> OrionpayDriver {
        let mut creds = HashMap::new();
        creds.insert("api_key".to_string(), "key".to_string());
        OrionpayDriver::new(&creds).unwrap()
    }

    #[tokio::test]
    async fn amounts_below_five_reais_are_rejected() {
        let err = driver()
            .generate_pix(&PixChargeRequest {
                amount: "4.99".parse().unwrap(),
                description: "x".to_string(),
                payment_id: "BOT1_1700000000_aabbccdd".to_string(),
                customer: Default::default(),
                webhook_url: "https://pay.example.com/webhook/payment/orionpay".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[test]
    fn webhook_parses_flat_shape() {
        let body = br#"{"transaction_id":"or_1","status":"confirmed","amount":25.0,"external_reference":"BOT1_1700000000_aabbccdd"}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.transaction_id.as_deref(), Some("or_1"));
    }
}
