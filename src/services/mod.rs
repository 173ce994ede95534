pub mod crypto;
pub mod delivery;
pub mod job_handler;
pub mod meta_dispatcher;
pub mod orchestrator;

pub use crypto::CredentialCipher;
pub use delivery::DeliveryService;
pub use job_handler::PlatformJobHandler;
pub use meta_dispatcher::MetaDispatcher;
pub use orchestrator::{
    CreatePixRequest, PaymentOrchestrator, PixCheckout, VerifyOutcome, WebhookDisposition,
};
