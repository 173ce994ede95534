use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::driver::GatewayDriver;
use super::error::{GatewayError, GatewayResult};
use super::types::{
    raw_status_is_known, PixCharge, PixChargeRequest, PixStatus, StatusLookup, WebhookOutcome,
};

/// Uniform entry point in front of every driver. Validates requests before
/// they hit the wire, logs with the gateway tag, and applies the single
/// shared webhook amount fix-up.
#[derive(Clone)]
pub struct GatewayAdapter {
    driver: Arc<dyn GatewayDriver>,
}

impl std::fmt::Debug for GatewayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAdapter")
            .field("kind", &self.driver.kind())
            .finish()
    }
}

impl GatewayAdapter {
    pub fn new(driver: Arc<dyn GatewayDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn GatewayDriver> {
        &self.driver
    }

    pub async fn generate_pix(&self, request: &PixChargeRequest) -> GatewayResult<PixCharge> {
        if request.amount <= Decimal::ZERO {
            return Err(GatewayError::InvalidInput {
                message: "amount must be positive".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if request.payment_id.trim().is_empty() {
            return Err(GatewayError::InvalidInput {
                message: "payment_id must not be empty".to_string(),
                field: Some("payment_id".to_string()),
            });
        }

        let charge = self.driver.generate_pix(request).await?;
        info!(
            gateway = self.driver.kind().as_str(),
            payment_id = %request.payment_id,
            transaction_id = %charge.transaction_id,
            "pix charge created"
        );
        Ok(charge)
    }

    /// Parses a webhook and normalizes its amount. Several gateways report
    /// centavos in webhooks even when documented as reais; any amount above
    /// 1000 on a platform whose tickets live well below R$1000 is treated as
    /// centavos and divided by 100. This is the only place that fix-up runs.
    pub fn process_webhook(&self, payload: &[u8]) -> GatewayResult<WebhookOutcome> {
        let mut outcome = self.driver.process_webhook(payload)?;

        if outcome.status == PixStatus::Pending
            && !outcome.raw_status.is_empty()
            && !raw_status_is_known(&outcome.raw_status)
        {
            warn!(
                gateway = self.driver.kind().as_str(),
                raw_status = %outcome.raw_status,
                "unmapped gateway status, treating as pending"
            );
        }

        if let Some(amount) = outcome.amount {
            if amount > Decimal::from(1000) {
                let corrected = amount / Decimal::from(100);
                warn!(
                    gateway = self.driver.kind().as_str(),
                    raw_amount = %amount,
                    corrected = %corrected,
                    "webhook amount looks like centavos, rescaling"
                );
                outcome.amount = Some(corrected);
            }
        }

        Ok(outcome)
    }

    pub async fn get_payment_status(&self, transaction_id: &str) -> GatewayResult<StatusLookup> {
        self.driver.get_payment_status(transaction_id).await
    }

    pub async fn verify_credentials(&self) -> GatewayResult<()> {
        self.driver.verify_credentials().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::{GatewayKind, PixStatus};
    use async_trait::async_trait;

    struct FixedAmountDriver(Decimal);

    #[async_trait]
    impl GatewayDriver for FixedAmountDriver {
        async fn generate_pix(&self, _request: &PixChargeRequest) -> GatewayResult<PixCharge> {
            Ok(PixCharge {
                pix_code: "code".to_string(),
                qr_code_url: None,
                transaction_id: "t1".to_string(),
                transaction_hash: None,
                reference: None,
            })
        }

        fn process_webhook(&self, _payload: &[u8]) -> GatewayResult<WebhookOutcome> {
            Ok(WebhookOutcome {
                transaction_id: Some("t1".to_string()),
                transaction_hash: None,
                status: PixStatus::Paid,
                raw_status: "paid".to_string(),
                amount: Some(self.0),
                external_reference: None,
                end_to_end_id: None,
                payer_name: None,
            })
        }

        async fn get_payment_status(&self, _id: &str) -> GatewayResult<StatusLookup> {
            unreachable!()
        }

        async fn verify_credentials(&self) -> GatewayResult<()> {
            Ok(())
        }

        fn kind(&self) -> GatewayKind {
            GatewayKind::Hoopay
        }
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn webhook_amount_above_thousand_is_rescaled() {
        let adapter = GatewayAdapter::new(Arc::new(FixedAmountDriver(dec("1990"))));
        let outcome = adapter.process_webhook(b"{}").unwrap();
        assert_eq!(outcome.amount, Some(dec("19.90")));
    }

    #[test]
    fn webhook_amount_in_reais_is_untouched() {
        let adapter = GatewayAdapter::new(Arc::new(FixedAmountDriver(dec("19.90"))));
        let outcome = adapter.process_webhook(b"{}").unwrap();
        assert_eq!(outcome.amount, Some(dec("19.90")));
    }

    #[tokio::test]
    async fn zero_amount_is_rejected_before_the_wire() {
        let adapter = GatewayAdapter::new(Arc::new(FixedAmountDriver(dec("1"))));
        let err = adapter
            .generate_pix(&PixChargeRequest {
                amount: Decimal::ZERO,
                description: "x".to_string(),
                payment_id: "p1".to_string(),
                customer: Default::default(),
                webhook_url: "https://example.com/wh".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }
}
