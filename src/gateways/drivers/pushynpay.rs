use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::gateways::driver::GatewayDriver;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    map_raw_status, GatewayKind, PixCharge, PixChargeRequest, PixStatus, StatusLookup,
    WebhookOutcome,
};
use crate::gateways::util::{
    json_amount, json_string, to_centavos, AuthScheme, GatewayHttpClient,
};

use super::required_credential;

const BASE_URL: &str = "https://api.pushinpay.com.br";
const GATEWAY: &str = "pushynpay";
const MIN_CENTAVOS: i64 = 50;

const PAID_KEYWORDS: [&str; 6] = ["confirm", "aprov", "conclu", "receb", "settled", "success"];
const FAILED_KEYWORDS: [&str; 7] = [
    "cancel", "expir", "refus", "refund", "chargeback", "fail", "reject",
];

/// PushynPay bills in centavos. Its webhooks are unreliable about the literal
/// status string, so promotion also accepts strong paid indicators.
pub struct PushynpayDriver {
    http: GatewayHttpClient,
    api_key: String,
    split_account_id: Option<String>,
}

impl PushynpayDriver {
    pub fn new(
        credentials: &HashMap<String, String>,
        split_account_id: Option<String>,
    ) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(20), 2)?,
            api_key: required_credential(credentials, "api_key", GATEWAY)?,
            split_account_id,
        })
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Bearer(self.api_key.clone())
    }

    /// Promotes to paid when the payload carries a positive indicator and no
    /// failure keyword anywhere in the body.
    fn heuristic_status(root: &JsonValue, raw_status: &str, raw_body: &str) -> PixStatus {
        let mapped = map_raw_status(raw_status);
        if mapped != PixStatus::Pending {
            return mapped;
        }

        let lowered = raw_body.to_ascii_lowercase();
        if FAILED_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            return PixStatus::Pending;
        }

        let has_end_to_end = root
            .get("end_to_end_id")
            .and_then(json_string)
            .is_some();
        let has_payer = root.get("payer_name").and_then(json_string).is_some();
        let has_paid_value = root
            .get("paid_value")
            .and_then(json_amount)
            .map(|v| v > Decimal::ZERO)
            .unwrap_or(false);
        let has_keyword = PAID_KEYWORDS.iter().any(|k| lowered.contains(k));

        if has_end_to_end || has_payer || has_paid_value || has_keyword {
            PixStatus::Paid
        } else {
            PixStatus::Pending
        }
    }

    fn parse_status_payload(&self, root: &JsonValue, raw_body: &str) -> WebhookOutcome {
        let raw_status = root.get("status").and_then(json_string).unwrap_or_default();
        WebhookOutcome {
            transaction_id: root.get("id").and_then(json_string),
            transaction_hash: None,
            status: Self::heuristic_status(root, &raw_status, raw_body),
            raw_status,
            // Raw centavos; the adapter owns the reais conversion.
            amount: root
                .get("value")
                .or_else(|| root.get("paid_value"))
                .and_then(json_amount),
            external_reference: root.get("external_reference").and_then(json_string),
            end_to_end_id: root.get("end_to_end_id").and_then(json_string),
            payer_name: root.get("payer_name").and_then(json_string),
        }
    }
}

#[async_trait]
impl GatewayDriver for PushynpayDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        let centavos = to_centavos(request.amount)?;
        if centavos < MIN_CENTAVOS {
            return Err(GatewayError::InvalidInput {
                message: format!("pushynpay minimum is R$0.50, got {}", request.amount),
                field: Some("amount".to_string()),
            });
        }

        let mut payload = serde_json::json!({
            "value": centavos,
            "webhook_url": request.webhook_url,
            "external_reference": request.payment_id,
        });
        if let Some(account_id) = &self.split_account_id {
            payload["split_rules"] = serde_json::json!([{ "account_id": account_id, "value": 0 }]);
        }

        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &format!("{}/api/pix/cashIn", BASE_URL),
                &self.auth(),
                Some(&payload),
                &[],
            )
            .await?;

        let pix_code = response
            .get("qr_code")
            .or_else(|| response.get("pix_code"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "cashIn response missing qr_code".to_string(),
                raw_body: Some(response.to_string()),
            })?;
        let transaction_id = response
            .get("id")
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "cashIn response missing id".to_string(),
                raw_body: Some(response.to_string()),
            })?;

        Ok(PixCharge {
            pix_code,
            qr_code_url: response.get("qr_code_base64").and_then(json_string),
            transaction_id,
            transaction_hash: None,
            reference: Some(request.payment_id.clone()),
        })
    }

    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let root: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookMalformed {
                message: format!("pushynpay webhook is not valid JSON: {}", e),
            })?;
        let raw_body = String::from_utf8_lossy(payload).into_owned();
        Ok(self.parse_status_payload(&root, &raw_body))
    }

    async fn get_payment_status(&self, transaction_id: &str) -> GatewayResult<StatusLookup> {
        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::GET,
                &format!("{}/api/transactions/{}", BASE_URL, transaction_id),
                &self.auth(),
                None,
                &[],
            )
            .await?;

        let raw_body = response.to_string();
        let raw_status = response
            .get("status")
            .and_then(json_string)
            .unwrap_or_default();
        Ok(StatusLookup {
            status: Self::heuristic_status(&response, &raw_status, &raw_body),
            raw_status,
            paid_at: None,
        })
    }

    async fn verify_credentials(&self) -> GatewayResult<()> {
        // A lookup for a nonexistent id with good credentials comes back 404
        // (Rejected); only 401/403 mean the key is bad.
        match self
            .get_payment_status("00000000-0000-0000-0000-000000000000")
            .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::Rejected { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::Pushynpay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> PushynpayDriver {
        let mut creds = HashMap::new();
        creds.insert("api_key".to_string(), "key".to_string());
        PushynpayDriver::new(&creds, None).unwrap()
    }

    #[test]
    fn literal_paid_status_promotes() {
        let body = br#"{"id":"px_1","status":"paid","value":1990}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.amount, Some("1990".parse().unwrap()));
    }

    #[test]
    fn end_to_end_id_promotes_without_paid_string() {
        let body = br#"{"id":"px_2","status":"created","end_to_end_id":"E00038166202601011234"}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
    }

    #[test]
    fn paid_keyword_promotes() {
        let body = br#"{"id":"px_3","status":"created","message":"pagamento aprovado"}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
    }

    #[test]
    fn failure_keyword_blocks_heuristic_promotion() {
        let body =
            br#"{"id":"px_4","status":"created","payer_name":"Jose","message":"estorno: refund"}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Pending);
    }

    #[test]
    fn bare_pending_stays_pending() {
        let body = br#"{"id":"px_5","status":"created","value":0}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Pending);
    }
}
