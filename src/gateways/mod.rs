pub mod adapter;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod factory;
pub mod types;
pub mod util;

pub use adapter::GatewayAdapter;
pub use driver::GatewayDriver;
pub use error::{GatewayError, GatewayResult};
pub use factory::GatewayFactory;
pub use types::{
    GatewayKind, PixCharge, PixChargeRequest, PixCustomer, PixStatus, StatusLookup,
    WebhookOutcome,
};
