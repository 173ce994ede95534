use async_trait::async_trait;

use super::error::GatewayResult;
use super::types::{GatewayKind, PixCharge, PixChargeRequest, StatusLookup, WebhookOutcome};

/// A single PIX gateway integration.
///
/// Drivers own the wire details of one upstream API: endpoints, auth, amount
/// units, payload quirks. Everything above them speaks reais and the
/// canonical three-state status model.
#[async_trait]
pub trait GatewayDriver: Send + Sync {
    /// Creates a PIX charge. The request amount is in reais; drivers that
    /// bill in centavos convert internally.
    async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge>;

    /// Parses an inbound webhook body into the gateway-agnostic outcome.
    /// Pure parsing, no IO, so it can run inside the HTTP handler before the
    /// payload is handed to the correlation pipeline.
    fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome>;

    /// Polls the gateway for the current state of a charge.
    async fn get_payment_status(&self, transaction_id: &str) -> GatewayResult<StatusLookup>;

    /// Makes a cheap authenticated call to prove the stored credentials work.
    async fn verify_credentials(&self) -> GatewayResult<()>;

    fn kind(&self) -> GatewayKind;

    /// Path this driver's webhooks arrive on, relative to the public base URL.
    fn webhook_path(&self) -> String {
        format!("/webhook/payment/{}", self.kind().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::{PixStatus, StatusLookup};

    struct MockDriver;

    #[async_trait]
    impl GatewayDriver for MockDriver {
        async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
            Ok(PixCharge {
                pix_code: "00020126mockpixcode".to_string(),
                qr_code_url: None,
                transaction_id: "txn_mock".to_string(),
                transaction_hash: None,
                reference: Some(request.payment_id.clone()),
            })
        }

        fn process_webhook(&self, _payload: &[u8]) -> GatewayResult<WebhookOutcome> {
            Ok(WebhookOutcome {
                transaction_id: Some("txn_mock".to_string()),
                transaction_hash: None,
                status: PixStatus::Paid,
                raw_status: "paid".to_string(),
                amount: None,
                external_reference: None,
                end_to_end_id: None,
                payer_name: None,
            })
        }

        async fn get_payment_status(&self, _transaction_id: &str) -> GatewayResult<StatusLookup> {
            Ok(StatusLookup {
                status: PixStatus::Pending,
                raw_status: "pending".to_string(),
                paid_at: None,
            })
        }

        async fn verify_credentials(&self) -> GatewayResult<()> {
            Ok(())
        }

        fn kind(&self) -> GatewayKind {
            GatewayKind::Bolt
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_driver() {
        let driver: Box<dyn GatewayDriver> = Box::new(MockDriver);
        assert_eq!(driver.webhook_path(), "/webhook/payment/bolt");

        let charge = driver
            .generate_pix(&PixChargeRequest {
                amount: "10.00".parse().unwrap(),
                description: "Acesso VIP".to_string(),
                payment_id: "BOT1_1700000000_aabbccdd".to_string(),
                customer: Default::default(),
                webhook_url: "https://pay.example.com/webhook/payment/bolt".to_string(),
            })
            .await
            .expect("mock charge should succeed");
        assert_eq!(charge.reference.as_deref(), Some("BOT1_1700000000_aabbccdd"));
    }
}
