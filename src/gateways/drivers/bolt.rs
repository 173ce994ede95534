use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::gateways::driver::GatewayDriver;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    GatewayKind, PixCharge, PixChargeRequest, PixStatus, StatusLookup, WebhookOutcome,
};
use crate::gateways::util::{
    document_or_synthesized, json_amount, json_string, synthesize_email, to_centavos, AuthScheme,
    GatewayHttpClient,
};

use super::required_credential;

const BASE_URL: &str = "https://api.boltpagamentos.com.br";
const GATEWAY: &str = "bolt";

/// Bolt bills in centavos behind an edge-function API. Its status vocabulary
/// is unstable, so this driver is deliberately blind: only the literal
/// string `paid` promotes, everything else reads as pending, and the raw
/// gateway string is never exposed downstream where something could try to
/// reclassify it.
pub struct BoltDriver {
    http: GatewayHttpClient,
    secret: String,
    company_id: String,
}

impl BoltDriver {
    pub fn new(credentials: &HashMap<String, String>) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(20), 2)?,
            secret: required_credential(credentials, "secret", GATEWAY)?,
            company_id: required_credential(credentials, "company_id", GATEWAY)?,
        })
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Basic {
            user: self.secret.clone(),
            password: self.company_id.clone(),
        }
    }

    fn blind_status(raw: Option<String>) -> PixStatus {
        match raw.as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("paid") => PixStatus::Paid,
            _ => PixStatus::Pending,
        }
    }
}

#[async_trait]
impl GatewayDriver for BoltDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        let centavos = to_centavos(request.amount)?;
        if centavos <= 0 {
            return Err(GatewayError::InvalidInput {
                message: "bolt amount must be positive".to_string(),
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
                message: format!("bolt webhook is not valid JSON: {}", e),
            })?;

        let data = root.get("data").unwrap_or(&root);
        let status = Self::blind_status(data.get("status").and_then(json_string));

        Ok(WebhookOutcome {
            transaction_id: data.get("id").and_then(json_string),
            transaction_hash: None,
            status,
            // The gateway string stays inside this driver.
            raw_status: status.as_str().to_string(),
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
        let status = Self::blind_status(data.get("status").and_then(json_string));
        Ok(StatusLookup {
            status,
            raw_status: status.as_str().to_string(),
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
        GatewayKind::Bolt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> BoltDriver {
        let mut creds = HashMap::new();
        creds.insert("secret".to_string(), "s".to_string());
        creds.insert("company_id".to_string(), "c".to_string());
        BoltDriver::new(&creds).unwrap()
    }

    #[test]
    fn only_literal_paid_promotes() {
        let paid = driver()
            .process_webhook(br#"{"id":"b1","status":"paid","amount":500}"#)
            .unwrap();
        assert_eq!(paid.status, PixStatus::Paid);

        for raw in ["approved", "completed", "cancelled", "weird_status"] {
            let body = format!(r#"{{"id":"b1","status":"{raw}","amount":500}}"#);
            let outcome = driver().process_webhook(body.as_bytes()).unwrap();
            assert_eq!(outcome.status, PixStatus::Pending, "raw={raw}");
        }
    }

    #[test]
    fn raw_gateway_string_is_not_exposed() {
        let outcome = driver()
            .process_webhook(br#"{"id":"b1","status":"approved"}"#)
            .unwrap();
        assert_eq!(outcome.raw_status, "pending");
    }

    #[tokio::test]
    async fn zero_amount_is_rejected() {
        let err = driver()
            .generate_pix(&PixChargeRequest {
                amount: Decimal::ZERO,
                description: "x".to_string(),
                payment_id: "BOT1_1700000000_aabbccdd".to_string(),
                customer: Default::default(),
                webhook_url: "https://pay.example.com/webhook/payment/bolt".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }
}
