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

const BASE_URL: &str = "https://api.hoopay.com.br";
const GATEWAY: &str = "hoopay";

/// Hoopay bills in reais and authenticates with the token as the Basic auth
/// username and an empty password.
pub struct HoopayDriver {
    http: GatewayHttpClient,
    api_key: String,
}

impl HoopayDriver {
    pub fn new(credentials: &HashMap<String, String>) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(20), 2)?,
            api_key: required_credential(credentials, "api_key", GATEWAY)?,
        })
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Basic {
            user: self.api_key.clone(),
            password: String::new(),
        }
    }

    fn min_amount() -> Decimal {
        "0.50".parse().unwrap_or(Decimal::ONE)
    }
}

#[async_trait]
impl GatewayDriver for HoopayDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        if request.amount < Self::min_amount() {
            return Err(GatewayError::InvalidInput {
                message: format!("hoopay minimum is R$0.50, got {}", request.amount),
                field: Some("amount".to_string()),
            });
        }

        let payload = serde_json::json!({
            "amount": request.amount,
            "description": request.description,
            "external_reference": request.payment_id,
            "callback_url": request.webhook_url,
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
                &format!("{}/charge", BASE_URL),
                &self.auth(),
                Some(&payload),
                &[],
            )
            .await?;

        let data = response.get("charge").unwrap_or(&response);
        let pix_code = data
            .get("pix_code")
            .or_else(|| data.get("emv"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "charge response missing pix code".to_string(),
                raw_body: Some(response.to_string()),
            })?;
        let transaction_id = data
            .get("orderUUID")
            .or_else(|| data.get("id"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "charge response missing orderUUID".to_string(),
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
                message: format!("hoopay webhook is not valid JSON: {}", e),
            })?;

        let data = root.get("charge").unwrap_or(&root);
        let raw_status = data.get("status").and_then(json_string).unwrap_or_default();

        Ok(WebhookOutcome {
            transaction_id: data
                .get("orderUUID")
                .or_else(|| data.get("id"))
                .and_then(json_string),
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
                &format!("{}/pix/consult/{}", BASE_URL, transaction_id),
                &self.auth(),
                None,
                &[],
            )
            .await?;

        let data = response.get("charge").unwrap_or(&response);
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
        GatewayKind::Hoopay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PixStatus;

    fn driver() -> HoopayDriver {
        let mut creds = HashMap::new();
        creds.insert("api_key".to_string(), "key".to_string());
        HoopayDriver::new(&creds).unwrap()
    }

    #[tokio::test]
    async fn amounts_below_fifty_centavos_are_rejected() {
        let err = driver()
            .generate_pix(&PixChargeRequest {
                amount: "0.49".parse().unwrap(),
                description: "x".to_string(),
                payment_id: "BOT1_1700000000_aabbccdd".to_string(),
                customer: Default::default(),
                webhook_url: "https://pay.example.com/webhook/payment/hoopay".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[test]
    fn webhook_uses_order_uuid_as_transaction_id() {
        let body = br#"{"charge":{"orderUUID":"ho_uuid_1","status":"completed","amount":7.5}}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.transaction_id.as_deref(), Some("ho_uuid_1"));
    }
}
