use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SplitConfig;

use super::adapter::GatewayAdapter;
use super::driver::GatewayDriver;
use super::drivers::{
    AtomopayDriver, BabylonDriver, BoltDriver, HoopayDriver, OrionpayDriver, ParadiseDriver,
    PushynpayDriver, SyncpayDriver, UmbrellapagDriver, WiinpayDriver,
};
use super::error::{GatewayError, GatewayResult};
use super::types::GatewayKind;

/// Builds drivers from a seller's decrypted credential map. Required keys are
/// validated per gateway before any driver is constructed, so a missing
/// credential fails here with a named field instead of a confusing upstream
/// 401.
#[derive(Clone)]
pub struct GatewayFactory {
    splits: SplitConfig,
}

impl GatewayFactory {
    pub fn new(splits: SplitConfig) -> Self {
        Self { splits }
    }

    pub fn required_keys(kind: GatewayKind) -> &'static [&'static str] {
        match kind {
            GatewayKind::Syncpay => &["client_id", "client_secret"],
            GatewayKind::Pushynpay => &["api_key"],
            GatewayKind::Paradise => &["api_key", "product_hash"],
            GatewayKind::Wiinpay => &["api_key"],
            GatewayKind::Atomopay => &["api_token", "product_hash"],
            GatewayKind::Umbrellapag => &["api_key"],
            GatewayKind::Orionpay => &["api_key"],
            GatewayKind::Bolt => &["secret", "company_id"],
            GatewayKind::Babylon => &["api_key"],
            GatewayKind::Hoopay => &["api_key"],
        }
    }

    fn validate_credentials(
        kind: GatewayKind,
        credentials: &HashMap<String, String>,
    ) -> GatewayResult<()> {
        for key in Self::required_keys(kind) {
            match credentials.get(*key) {
                Some(value) if !value.trim().is_empty() => {}
                _ => {
                    return Err(GatewayError::InvalidInput {
                        message: format!(
                            "gateway {} is missing credential '{}'",
                            kind.as_str(),
                            key
                        ),
                        field: Some((*key).to_string()),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn create_driver(
        &self,
        kind: GatewayKind,
        credentials: &HashMap<String, String>,
    ) -> GatewayResult<Arc<dyn GatewayDriver>> {
        Self::validate_credentials(kind, credentials)?;

        let driver: Arc<dyn GatewayDriver> = match kind {
            GatewayKind::Syncpay => Arc::new(SyncpayDriver::new(
                credentials,
                self.splits.platform_split_user_id.clone(),
            )?),
            GatewayKind::Pushynpay => Arc::new(PushynpayDriver::new(
                credentials,
                self.splits.pushyn_split_account_id.clone(),
            )?),
            GatewayKind::Paradise => Arc::new(ParadiseDriver::new(
                credentials,
                self.splits.paradise_store_id.clone(),
            )?),
            GatewayKind::Wiinpay => Arc::new(WiinpayDriver::new(credentials)?),
            GatewayKind::Atomopay => Arc::new(AtomopayDriver::new(credentials)?),
            GatewayKind::Umbrellapag => Arc::new(UmbrellapagDriver::new(credentials)?),
            GatewayKind::Orionpay => Arc::new(OrionpayDriver::new(credentials)?),
            GatewayKind::Bolt => Arc::new(BoltDriver::new(credentials)?),
            GatewayKind::Babylon => Arc::new(BabylonDriver::new(credentials)?),
            GatewayKind::Hoopay => Arc::new(HoopayDriver::new(credentials)?),
        };

        Ok(driver)
    }

    /// Default entry point: driver wrapped in the validating adapter.
    pub fn create(
        &self,
        kind: GatewayKind,
        credentials: &HashMap<String, String>,
    ) -> GatewayResult<GatewayAdapter> {
        Ok(GatewayAdapter::new(self.create_driver(kind, credentials)?))
    }

    /// Adapter used purely for webhook parsing. Webhooks land before the
    /// owning seller is known, and parsing never reads credentials, so a
    /// placeholder credential set is used.
    pub fn webhook_parser(&self, kind: GatewayKind) -> GatewayResult<GatewayAdapter> {
        let credentials: HashMap<String, String> = Self::required_keys(kind)
            .iter()
            .map(|key| ((*key).to_string(), "webhook-parser".to_string()))
            .collect();
        self.create(kind, &credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splits() -> SplitConfig {
        SplitConfig {
            paradise_store_id: Some("store_1".to_string()),
            platform_split_user_id: Some("split_user".to_string()),
            pushyn_split_account_id: None,
        }
    }

    fn creds(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_credential_is_rejected_with_field_name() {
        let factory = GatewayFactory::new(splits());
        let err = factory
            .create(GatewayKind::Syncpay, &creds(&[("client_id", "abc")]))
            .unwrap_err();
        match err {
            GatewayError::InvalidInput { field, .. } => {
                assert_eq!(field.as_deref(), Some("client_secret"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let factory = GatewayFactory::new(splits());
        assert!(factory
            .create(GatewayKind::Pushynpay, &creds(&[("api_key", "   ")]))
            .is_err());
    }

    #[test]
    fn every_kind_constructs_with_its_required_keys() {
        let factory = GatewayFactory::new(splits());
        for kind in GatewayKind::ALL {
            let credentials = creds(
                &GatewayFactory::required_keys(kind)
                    .iter()
                    .map(|k| (*k, "value"))
                    .collect::<Vec<_>>(),
            );
            assert!(
                factory.create(kind, &credentials).is_ok(),
                "kind={}",
                kind.as_str()
            );
        }
    }
}
