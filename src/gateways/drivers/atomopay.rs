use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::info;

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

const BASE_URL: &str = "https://api.atomopay.com.br";
const GATEWAY: &str = "atomopay";

/// Átomo Pay bills in centavos and insists that every charge reference an
/// offer whose price matches the amount exactly. The driver looks up the
/// product's offers and creates one on the fly when no price matches.
pub struct AtomopayDriver {
    http: GatewayHttpClient,
    api_token: String,
    product_hash: String,
}

impl AtomopayDriver {
    pub fn new(credentials: &HashMap<String, String>) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(30), 2)?,
            api_token: required_credential(credentials, "api_token", GATEWAY)?,
            product_hash: required_credential(credentials, "product_hash", GATEWAY)?,
        })
    }

    fn url(&self, path: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!("{}{}{}api_token={}", BASE_URL, path, sep, self.api_token)
    }

    async fn find_or_create_offer(
        &self,
        price_centavos: i64,
        description: &str,
    ) -> GatewayResult<String> {
        let offers: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::GET,
                &self.url(&format!("/api/public/v1/products/{}/offers", self.product_hash)),
                &AuthScheme::None,
                None,
                &[],
            )
            .await?;

        let list = offers
            .get("data")
            .and_then(|d| d.as_array())
            .or_else(|| offers.as_array());
        if let Some(list) = list {
            for offer in list {
                let price = offer.get("price").and_then(|p| p.as_i64());
                if price == Some(price_centavos) {
                    if let Some(hash) = offer.get("hash").and_then(json_string) {
                        return Ok(hash);
                    }
                }
            }
        }

        let payload = serde_json::json!({
            "title": description,
            "price": price_centavos,
        });
        let created: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &self.url(&format!("/api/public/v1/products/{}/offers", self.product_hash)),
                &AuthScheme::None,
                Some(&payload),
                &[],
            )
            .await?;

        let hash = created
            .get("hash")
            .or_else(|| created.get("data").and_then(|d| d.get("hash")))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "offer creation response missing hash".to_string(),
                raw_body: Some(created.to_string()),
            })?;
        info!(
            gateway = GATEWAY,
            offer_hash = %hash,
            price_centavos,
            "created offer for unseen price"
        );
        Ok(hash)
    }
}

/// Átomo answers a refused charge with 201 and `payment_status:"refused"`,
/// no pix fields. That is a final answer for this charge, not an outage, so
/// it surfaces as `ChargeRefused` carrying the identifiers from the body.
fn charge_from_response(response: &JsonValue, payment_id: &str) -> GatewayResult<PixCharge> {
    let data = response.get("data").unwrap_or(response);

    let raw_status = data
        .get("payment_status")
        .or_else(|| data.get("status"))
        .and_then(json_string)
        .unwrap_or_default();
    if raw_status.eq_ignore_ascii_case("refused") {
        return Err(GatewayError::ChargeRefused {
            gateway: GATEWAY.to_string(),
            transaction_id: data.get("id").and_then(json_string),
            transaction_hash: data.get("hash").and_then(json_string),
            message: "charge refused at creation".to_string(),
        });
    }

    let pix = data.get("pix").unwrap_or(data);
    let pix_code = pix
        .get("pix_qr_code")
        .or_else(|| pix.get("qr_code_text"))
        .or_else(|| data.get("pix_code"))
        .and_then(json_string)
        .ok_or_else(|| GatewayError::Transient {
            gateway: GATEWAY.to_string(),
            message: "transaction response missing pix code".to_string(),
            raw_body: Some(response.to_string()),
        })?;
    let transaction_hash = data
        .get("hash")
        .and_then(json_string)
        .ok_or_else(|| GatewayError::Transient {
            gateway: GATEWAY.to_string(),
            message: "transaction response missing hash".to_string(),
            raw_body: Some(response.to_string()),
        })?;

    Ok(PixCharge {
        pix_code,
        qr_code_url: pix.get("pix_qr_code_url").and_then(json_string),
        transaction_id: data
            .get("id")
            .and_then(json_string)
            .unwrap_or_else(|| transaction_hash.clone()),
        transaction_hash: Some(transaction_hash),
        reference: Some(payment_id.to_string()),
    })
}

#[async_trait]
impl GatewayDriver for AtomopayDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        let centavos = to_centavos(request.amount)?;
        if centavos < 1 {
            return Err(GatewayError::InvalidInput {
                message: "atomopay amount must be at least 1 centavo".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let offer_hash = self
            .find_or_create_offer(centavos, &request.description)
            .await?;

        let payload = serde_json::json!({
            "amount": centavos,
            "offer_hash": &offer_hash,
            "payment_method": "pix",
            "installments": 1,
            "postback_url": request.webhook_url,
            "external_reference": request.payment_id,
            "customer": {
                "name": request.customer.name.clone().unwrap_or_else(|| "Cliente".to_string()),
                "email": request.customer.email.clone()
                    .unwrap_or_else(|| synthesize_email(&request.payment_id)),
                "phone_number": normalize_phone_br(request.customer.phone.as_deref()),
                "document": document_or_synthesized(request.customer.document.as_deref(), &request.payment_id),
            },
            "cart": [{
                "product_hash": self.product_hash,
                "offer_hash": &offer_hash,
                "title": request.description,
                "price": centavos,
                "quantity": 1,
                "operation_type": 1,
                "tangible": false,
            }],
        });

        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &self.url("/api/public/v1/transactions"),
                &AuthScheme::None,
                Some(&payload),
                &[],
            )
            .await?;

        charge_from_response(&response, &request.payment_id)
    }

    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let root: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookMalformed {
                message: format!("atomopay webhook is not valid JSON: {}", e),
            })?;

        let data = root.get("data").unwrap_or(&root);
        let raw_status = data
            .get("payment_status")
            .or_else(|| data.get("status"))
            .and_then(json_string)
            .unwrap_or_default();

        Ok(WebhookOutcome {
            transaction_id: data.get("id").and_then(json_string),
            transaction_hash: data.get("hash").and_then(json_string),
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
                &self.url(&format!("/api/public/v1/transactions/{}", transaction_id)),
                &AuthScheme::None,
                None,
                &[],
            )
            .await?;

        let data = response.get("data").unwrap_or(&response);
        let raw_status = data
            .get("payment_status")
            .or_else(|| data.get("status"))
            .and_then(json_string)
            .unwrap_or_default();
        Ok(StatusLookup {
            status: map_raw_status(&raw_status),
            raw_status,
            paid_at: None,
        })
    }

    async fn verify_credentials(&self) -> GatewayResult<()> {
        // Listing offers exercises the token without side effects.
        let result: GatewayResult<JsonValue> = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::GET,
                &self.url(&format!("/api/public/v1/products/{}/offers", self.product_hash)),
                &AuthScheme::None,
                None,
                &[],
            )
            .await;
        result.map(|_| ())
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::Atomopay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PixStatus;

    fn driver() -> AtomopayDriver {
        let mut creds = HashMap::new();
        creds.insert("api_token".to_string(), "token".to_string());
        creds.insert("product_hash".to_string(), "prod_a".to_string());
        AtomopayDriver::new(&creds).unwrap()
    }

    #[test]
    fn api_token_is_appended_as_query_parameter() {
        let d = driver();
        assert_eq!(
            d.url("/api/public/v1/transactions"),
            "https://api.atomopay.com.br/api/public/v1/transactions?api_token=token"
        );
        assert!(d.url("/x?y=1").ends_with("&api_token=token"));
    }

    #[test]
    fn refused_create_response_is_final_not_retryable() {
        let body = serde_json::json!({
            "data": {
                "id": "at_9",
                "hash": "at_h9",
                "payment_status": "refused"
            }
        });
        let err = charge_from_response(&body, "BOT1_1700000000_aabbccdd").unwrap_err();
        assert!(!err.is_retryable());
        match err {
            GatewayError::ChargeRefused {
                transaction_id,
                transaction_hash,
                ..
            } => {
                assert_eq!(transaction_id.as_deref(), Some("at_9"));
                assert_eq!(transaction_hash.as_deref(), Some("at_h9"));
            }
            other => panic!("expected ChargeRefused, got {:?}", other),
        }
    }

    #[test]
    fn accepted_create_response_yields_charge() {
        let body = serde_json::json!({
            "data": {
                "id": "at_10",
                "hash": "at_h10",
                "payment_status": "waiting_payment",
                "pix": { "pix_qr_code": "000201brcode" }
            }
        });
        let charge = charge_from_response(&body, "BOT1_1700000000_aabbccdd").unwrap();
        assert_eq!(charge.pix_code, "000201brcode");
        assert_eq!(charge.transaction_hash.as_deref(), Some("at_h10"));
    }

    #[test]
    fn webhook_prefers_payment_status_field() {
        let body = br#"{"data":{"id":"at_1","hash":"at_h1","payment_status":"approved","status":"updated","amount":1990}}"#;
        let outcome = driver().process_webhook(body).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.transaction_hash.as_deref(), Some("at_h1"));
    }
}
