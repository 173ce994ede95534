use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::gateways::driver::GatewayDriver;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::types::{
    map_raw_status, GatewayKind, PixCharge, PixChargeRequest, StatusLookup, WebhookOutcome,
};
use crate::gateways::util::{
    ascii_fold, document_or_synthesized, json_amount, json_string, normalize_phone_br, synthesize_email,
    to_centavos, AuthScheme, GatewayHttpClient,
};

use super::required_credential;

const BASE_URL: &str = "https://api.umbrellapag.com";
const GATEWAY: &str = "umbrellapag";
const USER_AGENT: &str = "GrimBots/1.0";

/// UmbrellaPag validates harder than any other gateway in the fleet. Every
/// free-text field is ASCII-folded, phones are bare digits with the 55
/// prefix, the customer id is a UUIDv5 derived from the payment id, metadata
/// travels as a JSON-encoded string, and birthdate/boleto must never appear.
pub struct UmbrellapagDriver {
    http: GatewayHttpClient,
    api_key: String,
}

impl UmbrellapagDriver {
    pub fn new(credentials: &HashMap<String, String>) -> GatewayResult<Self> {
        Ok(Self {
            http: GatewayHttpClient::new(Duration::from_secs(30), 2)?,
            api_key: required_credential(credentials, "api_key", GATEWAY)?,
        })
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::Header {
            name: "x-api-key",
            value: self.api_key.clone(),
        }
    }

    pub fn customer_uuid(payment_id: &str) -> Uuid {
        Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("umbrellapag:customer:{}", payment_id).as_bytes(),
        )
    }

    fn customer_email(request: &PixChargeRequest) -> String {
        match request.customer.email.as_deref() {
            Some(email) if email.contains('@') && email.contains('.') && email.is_ascii() => {
                email.trim().to_ascii_lowercase()
            }
            _ => synthesize_email(&request.payment_id),
        }
    }

    fn build_payload(&self, request: &PixChargeRequest) -> GatewayResult<JsonValue> {
        let centavos = to_centavos(request.amount)?;
        if centavos < 1 {
            return Err(GatewayError::InvalidInput {
                message: "umbrellapag amount must be at least 1 centavo".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let name = ascii_fold(
            request
                .customer
                .name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or("Cliente"),
        );
        let metadata =
            serde_json::to_string(&serde_json::json!({ "payment_id": request.payment_id }))
                .map_err(|e| GatewayError::InvalidInput {
                    message: format!("metadata encoding failed: {}", e),
                    field: Some("metadata".to_string()),
                })?;

        Ok(serde_json::json!({
            "amount": centavos,
            "paymentMethod": "PIX",
            "traceable": true,
            "externalRef": request.payment_id,
            "postbackUrl": request.webhook_url,
            "metadata": metadata,
            "customer": {
                "id": Self::customer_uuid(&request.payment_id).to_string(),
                "name": name,
                "email": Self::customer_email(request),
                "phone": normalize_phone_br(request.customer.phone.as_deref()),
                "document": {
                    "type": "CPF",
                    "number": document_or_synthesized(request.customer.document.as_deref(), &request.payment_id),
                },
                "address": {
                    "street": "Rua Central",
                    "streetNumber": "1",
                    "neighborhood": "Centro",
                    "city": "Sao Paulo",
                    "state": "sp",
                    "zipCode": "01000000",
                    "country": "br",
                },
            },
            "shipping": { "fee": 0 },
            "items": [{
                "title": ascii_fold(&request.description),
                "unitPrice": centavos,
                "quantity": 1,
                "tangible": false,
            }],
        }))
    }
}

#[async_trait]
impl GatewayDriver for UmbrellapagDriver {
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        let payload = self.build_payload(request)?;

        let response: JsonValue = self
            .http
            .request_json(
                GATEWAY,
                reqwest::Method::POST,
                &format!("{}/api/user/transactions", BASE_URL),
                &self.auth(),
                Some(&payload),
                &[("User-Agent", USER_AGENT)],
            )
            .await?;

        let data = response.get("data").unwrap_or(&response);
        let pix = data.get("pix").unwrap_or(data);
        let pix_code = pix
            .get("qrcode")
            .or_else(|| pix.get("copy_paste"))
            .or_else(|| data.get("pixCode"))
            .and_then(json_string)
            .ok_or_else(|| GatewayError::Transient {
                gateway: GATEWAY.to_string(),
                message: "transaction response missing pix qrcode".to_string(),
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
            qr_code_url: pix.get("qrcodeUrl").and_then(json_string),
            transaction_id,
            transaction_hash: data.get("secureId").and_then(json_string),
            reference: Some(request.payment_id.clone()),
        })
    }

    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let root: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookMalformed {
                message: format!("umbrellapag webhook is not valid JSON: {}", e),
            })?;

        let data = root.get("data").unwrap_or(&root);
        let raw_status = data.get("status").and_then(json_string).unwrap_or_default();

        Ok(WebhookOutcome {
            transaction_id: data.get("id").and_then(json_string),
            transaction_hash: data.get("secureId").and_then(json_string),
            status: map_raw_status(&raw_status),
            raw_status,
            amount: data.get("amount").and_then(json_amount),
            external_reference: data.get("externalRef").and_then(json_string),
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
                &format!("{}/api/user/transactions/{}", BASE_URL, transaction_id),
                &self.auth(),
                None,
                &[("User-Agent", USER_AGENT)],
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
        GatewayKind::Umbrellapag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::PixCustomer;

    fn driver() -> UmbrellapagDriver {
        let mut creds = HashMap::new();
        creds.insert("api_key".to_string(), "key".to_string());
        UmbrellapagDriver::new(&creds).unwrap()
    }

    fn request() -> PixChargeRequest {
        PixChargeRequest {
            amount: "19.90".parse().unwrap(),
            description: "Acesso Promoção".to_string(),
            payment_id: "BOT5_1700000000_aabbccdd".to_string(),
            customer: PixCustomer {
                name: Some("José Conceição".to_string()),
                email: None,
                phone: Some("(11) 98765-4321".to_string()),
                document: None,
            },
            webhook_url: "https://pay.example.com/webhook/payment/umbrellapag".to_string(),
        }
    }

    #[test]
    fn payload_satisfies_strict_validation_rules() {
        let payload = driver().build_payload(&request()).unwrap();

        assert_eq!(payload["amount"], 1990);
        assert_eq!(payload["traceable"], true);
        assert_eq!(payload["shipping"]["fee"], 0);
        assert!(payload.get("birthdate").is_none());
        assert!(payload.get("boleto").is_none());

        let customer = &payload["customer"];
        assert_eq!(customer["name"], "Jose Conceicao");
        assert_eq!(customer["phone"], "5511987654321");
        assert_eq!(customer["address"]["state"], "sp");
        assert!(customer["email"]
            .as_str()
            .unwrap()
            .ends_with("@grimbots.online"));

        // metadata must be a string, not an object
        assert!(payload["metadata"].is_string());
        assert_eq!(payload["items"][0]["title"], "Acesso Promocao");
    }

    #[test]
    fn customer_uuid_is_stable_uuidv5() {
        let a = UmbrellapagDriver::customer_uuid("BOT5_1700000000_aabbccdd");
        let b = UmbrellapagDriver::customer_uuid("BOT5_1700000000_aabbccdd");
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 5);
        assert_ne!(a, UmbrellapagDriver::customer_uuid("BOT5_1700000000_other"));
    }

    #[test]
    fn valid_ascii_email_is_kept_lowercased() {
        let mut req = request();
        req.customer.email = Some("Buyer@Example.com".to_string());
        let payload = driver().build_payload(&req).unwrap();
        assert_eq!(payload["customer"]["email"], "buyer@example.com");
    }
}
