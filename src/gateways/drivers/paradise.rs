use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::gateways::driver::GatewayDriver;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    map_raw_status, GatewayKind, PixCharge, PixChargeRequest, StatusLookup, WebhookOutcome,
};
use crate::gateways::util::{
    document_or_synthesized, json_amount, json_string, normalize_phone_br, synthesize_email, to_centavos,
    AuthScheme, GatewayHttpClient,
};

use super::required_credential;

const BASE_URL: &str = "https://api.paradisepagbr.com";
const GATEWAY: &str = "paradise";
const MAX_CENTAVOS: i64 = 100_000_000;

/// Paradise bills in centavos via a PHP-flavored API. Two upstream quirks
/// shape this driver: sending `offer_hash` duplicates panel entries, so it is
/// never sent even when configured; and duplicate references are rejected, so
/// a detected collision retries once with a `_{unix_ts}` suffix.
pub struct ParadiseDriver {
    http: GatewayHttpClient,
    api_key: String,
    product_hash: String,
    store_id: Option<String>,
}

impl ParadiseDriver {
    pub fn new(
        credentials: &HashMap<String, String>,
        store_id: Option<String>,
    ) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(30), 2)?,
            api_key: required_credential(credentials, "api_key", GATEWAY)?,
            product_hash: required_credential(credentials, "product_hash", GATEWAY)?,
            store_id,
        })
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Header {
            name: "X-API-Key",
            value: self.api_key.clone(),
        }
    }

    fn build_payload(&self, request: &PixChargeRequest, reference: &str) -> GatewayResult<JsonValue> {
        let centavos = to_centavos(request.amount)?;
        if centavos < 1 {
            return Err(GatewayError::InvalidInput {
                message: "paradise minimum is 1 centavo".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if centavos > MAX_CENTAVOS {
            return Err(GatewayError::InvalidInput {
                message: "paradise maximum is R$1,000,000.00".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let mut payload = serde_json::json!({
            "amount": centavos,
            "payment_method": "pix",
            "product_hash": self.product_hash,
            "reference": reference,
            "description": request.description,
            "postback_url": request.webhook_url,
            "customer": {
                "name": request.customer.name.clone().unwrap_or_else(|| "Cliente".to_string()),
                "email": request.customer.email.clone()
                    .unwrap_or_else(|| synthesize_email(&request.payment_id)),
                "phone": normalize_phone_br(request.customer.phone.as_deref()),
                "document": document_or_synthesized(request.customer.document.as_deref(), &request.payment_id),
            },
        });
        if let Some(store_id) = &self.store_id {
            payload["split"] = serde_json::json!([{ "store_id": store_id }]);
        }
        Ok(payload)
    }

    async fn create_once(&self, payload: &JsonValue) -> GatewayResult<JsonValue> {
        self.http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &format!("{}/api/v1/transaction.php", BASE_URL),
                &self.auth(),
                Some(payload),
                &[],
            )
            .await
    }

    fn is_duplicate_reference(err: &GatewayError) -> bool {
        match err {
            GatewayError::Rejected { raw_body, .. } => raw_body
                .as_deref()
                .map(|b| {
                    let lowered = b.to_ascii_lowercase();
                    lowered.contains("reference")
                        && (lowered.contains("duplicate") || lowered.contains("exist"))
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Strips the `_{unix_ts}` disambiguation suffix so a suffixed reference
    /// still correlates back to the stored payment id.
    pub fn trim_reference_suffix(reference: &str) -> &str {
        if let Some(idx) = reference.rfind('_') {
            let tail = &reference[idx + 1..];
            // A BOT reference already contains underscores; only strip a tail
            // that looks like a 10-digit unix timestamp beyond the base shape.
            if tail.len() == 10
                && tail.chars().all(|c| c.is_ascii_digit())
                && reference[..idx].matches('_').count() >= 2
            {
                return &reference[..idx];
            }
        }
        reference
    }
}

#[async_trait]
impl GatewayDriver for ParadiseDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        let payload = self.build_payload(request, &request.payment_id)?;
        let response = match self.create_once(&payload).await {
            Ok(response) => response,
            Err(err) if Self::is_duplicate_reference(&err) => {
                let suffixed = format!("{}_{}", request.payment_id, Utc::now().timestamp());
                warn!(
                    gateway = GATEWAY,
                    payment_id = %request.payment_id,
                    reference = %suffixed,
                    "duplicate reference rejected, retrying with suffix"
                );
                let payload = self.build_payload(request, &suffixed)?;
                self.create_once(&payload).await?
            }
            Err(err) => return Err(err),
        };

        let pix_code = response
            .get("pix_code")
            .or_else(|| response.get("qr_code_text"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "transaction response missing pix code".to_string(),
                raw_body: Some(response.to_string()),
            })?;
        let transaction_hash = response
            .get("hash")
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "transaction response missing hash".to_string(),
                raw_body: Some(response.to_string()),
            })?;

        Ok(PixCharge {
            pix_code,
            qr_code_url: response.get("qr_code_url").and_then(json_string),
            transaction_id: response
                .get("id")
                .and_then(json_string)
                .unwrap_or_else(|| transaction_hash.clone()),
            transaction_hash: Some(transaction_hash),
            reference: response.get("reference").and_then(json_string),
        })
    }

    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let root: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookMalformed {
                message: format!("paradise webhook is not valid JSON: {}", e),
            })?;

        let raw_status = root
            .get("status")
            .or_else(|| root.get("payment_status"))
            .and_then(json_string)
            .unwrap_or_default();

        Ok(WebhookOutcome {
            transaction_id: root.get("id").and_then(json_string),
            transaction_hash: root.get("hash").and_then(json_string),
            status: map_raw_status(&raw_status),
            raw_status,
            amount: root.get("amount").and_then(json_amount),
            external_reference: root
                .get("reference")
                .and_then(json_string)
                .map(|r| Self::trim_reference_suffix(&r).to_string()),
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
                    "{}/api/v1/check_status.php?hash={}",
                    BASE_URL, transaction_id
                ),
                &self.auth(),
                None,
                &[],
            )
            .await?;

        let raw_status = response
            .get("status")
            .or_else(|| response.get("payment_status"))
            .and_then(json_string)
            .unwrap_or_default();
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
        GatewayKind::Paradise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PixStatus;

    fn driver() -> ParadiseDriver {
        let mut creds = HashMap::new();
        creds.insert("api_key".to_string(), "key".to_string());
        creds.insert("product_hash".to_string(), "prod_1".to_string());
        ParadiseDriver::new(&creds, Some("store_9".to_string())).unwrap()
    }

    #[test]
    fn payload_never_carries_offer_hash() {
        let d = driver();
        let request = PixChargeRequest {
            amount: "19.90".parse().unwrap(),
            description: "VIP".to_string(),
            payment_id: "BOT1_1700000000_aabbccdd".to_string(),
            customer: Default::default(),
            webhook_url: "https://pay.example.com/webhook/payment/paradise".to_string(),
        };
        let payload = d.build_payload(&request, &request.payment_id).unwrap();
        assert!(payload.get("offer_hash").is_none());
        assert_eq!(payload["amount"], 1990);
        assert_eq!(payload["split"][0]["store_id"], "store_9");
    }

    #[test]
    fn reference_suffix_is_trimmed_only_when_it_looks_like_a_timestamp() {
        assert_eq!(
            ParadiseDriver::trim_reference_suffix("BOT1_1700000000_aabbccdd_1700000555"),
            "BOT1_1700000000_aabbccdd"
        );
        assert_eq!(
            ParadiseDriver::trim_reference_suffix("BOT1_1700000000_aabbccdd"),
            "BOT1_1700000000_aabbccdd"
        );
    }

    #[test]
    fn duplicate_reference_detection_requires_reference_wording() {
        let dup = GatewayError::Rejected {
            gateway: GATEWAY.to_string(),
            message: "HTTP 422".to_string(),
            raw_body: Some(r#"{"error":"reference already exists"}"#.to_string()),
        };
        assert!(ParadiseDriver::is_duplicate_reference(&dup));

        let other = GatewayError::Rejected {
            gateway: GATEWAY.to_string(),
            message: "HTTP 422".to_string(),
            raw_body: Some(r#"{"error":"amount too low"}"#.to_string()),
        };
        assert!(!ParadiseDriver::is_duplicate_reference(&other));
    }

    #[test]
    fn webhook_reference_comes_back_trimmed() {
        let body = br#"{"hash":"pd_h1","status":"approved","amount":1990,"reference":"BOT1_1700000000_aabbccdd_1700000555"}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(
            outcome.external_reference.as_deref(),
            Some("BOT1_1700000000_aabbccdd")
        );
    }
}
