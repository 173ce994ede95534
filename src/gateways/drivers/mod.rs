mod atomopay;
mod babylon;
mod bolt;
mod hoopay;
mod orionpay;
pub mod paradise;
mod pushynpay;
mod syncpay;
mod umbrellapag;
mod wiinpay;

pub use atomopay::AtomopayDriver;
pub use babylon::BabylonDriver;
pub use bolt::BoltDriver;
pub use hoopay::HoopayDriver;
pub use orionpay::OrionpayDriver;
pub use paradise::ParadiseDriver;
pub use pushynpay::PushynpayDriver;
pub use syncpay::SyncpayDriver;
pub use umbrellapag::UmbrellapagDriver;
pub use wiinpay::WiinpayDriver;

use std::collections::HashMap;

use crate::gateways::error::{GatewayError, GatewayResult};

/// Fetches a credential the factory already validated. Kept fallible so a
/// driver constructed outside the factory still fails cleanly.
pub(crate) fn required_credential(
    credentials: &HashMap<String, String>,
    key: &str,
    gateway: &str,
) -> GatewayResult<String> {
    credentials
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::InvalidInput {
            message: format!("gateway {} is missing credential '{}'", gateway, key),
            field: Some(key.to_string()),
        })
}
