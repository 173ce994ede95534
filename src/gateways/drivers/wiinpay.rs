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
use crate::gateways::util::{json_amount, json_string, AuthScheme, GatewayHttpClient};

use super::required_credential;

const BASE_URL: &str = "https://api.wiinpay.com.br";
const GATEWAY: &str = "wiinpay";

/// WiinPay bills in reais and authenticates with the api_key inside the JSON
/// body rather than a header.
pub struct WiinpayDriver {
    http: GatewayHttpClient,
    api_key: String,
}

impl WiinpayDriver {
    pub fn new(credentials: &HashMap<String, String>) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(20), 2)?,
            api_key: required_credential(credentials, "api_key", GATEWAY)?,
        })
    }

    fn min_amount() -> Decimal {
        Decimal::from(3)
    }
}

#[async_trait]
impl GatewayDriver for WiinpayDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        if request.amount < Self::min_amount() {
            return Err(GatewayError::InvalidInput {
                message: format!("wiinpay minimum is R$3.00, got {}", request.amount),
                field: Some("amount".to_string()),
            });
        }

        let payload = serde_json::json!({
            "api_key": self.api_key,
            "value": request.amount,
            "description": request.description,
            "external_reference": request.payment_id,
            "webhook_url": request.webhook_url,
            "name": request.customer.name.clone().unwrap_or_else(|| "Cliente".to_string()),
        });

        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &format!("{}/payment/create", BASE_URL),
                &AuthScheme::None,
                Some(&payload),
                &[],
            )
            .await?;

        let data = response.get("payment").unwrap_or(&response);
        let pix_code = data
            .get("pix_code")
            .or_else(|| data.get("copy_paste"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "create response missing pix code".to_string(),
                raw_body: Some(response.to_string()),
            })?;
        let transaction_id = data
            .get("id")
            .or_else(|| data.get("payment_id"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "create response missing payment id".to_string(),
                raw_body: Some(response.to_string()),
            })?;

        Ok(PixCharge {
            pix_code,
            qr_code_url: data.get("qr_code").and_then(json_string),
            transaction_id,
            transaction_hash: None,
            reference: Some(request.payment_id.clone()),
        })
    }

    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let root: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookMalformed {
                message: format!("wiinpay webhook is not valid JSON: {}", e),
            })?;

        let data = root.get("payment").unwrap_or(&root);
        let raw_status = data.get("status").and_then(json_string).unwrap_or_default();

        Ok(WebhookOutcome {
            transaction_id: data
                .get("id")
                .or_else(|| data.get("payment_id"))
                .and_then(json_string),
            transaction_hash: None,
            status: map_raw_status(&raw_status),
            raw_status,
            amount: data.get("value").and_then(json_amount),
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
                &format!(
                    "{}/payment/{}?api_key={}",
                    BASE_URL, transaction_id, self.api_key
                ),
                &AuthScheme::None,
                None,
                &[],
            )
            .await?;

        let data = response.get("payment").unwrap_or(&response);
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
        GatewayKind::Wiinpay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PixStatus;

    fn driver() -> WiinpayDriver {
        let mut creds = HashMap::new();
        creds.insert("api_key".to_string(), "key".to_string());
        WiinpayDriver::new(&creds).unwrap()
    }

    #[tokio::test]
    async fn amounts_below_three_reais_are_rejected() {
        let err = driver()
            .generate_pix(&PixChargeRequest {
                amount: "2.99".parse().unwrap(),
                description: "x".to_string(),
                payment_id: "BOT1_1700000000_aabbccdd".to_string(),
                customer: Default::default(),
                webhook_url: "https://pay.example.com/webhook/payment/wiinpay".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[test]
    fn webhook_with_nested_payment_object_parses() {
        let body = br#"{"payment":{"id":"wp_1","status":"completed","value":9.9,"external_reference":"BOT1_1700000000_aabbccdd"}}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.transaction_id.as_deref(), Some("wp_1"));
    }
}
