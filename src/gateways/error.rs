use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error taxonomy shared by every gateway driver.
///
/// The load-bearing distinction is `Transient` (retryable, eligible for
/// failover on create) versus `Rejected` (parseable upstream refusal, never
/// retried). Raw response bodies are preserved on a debug field so support can
/// inspect what the gateway actually said.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    #[error("gateway {gateway} rejected the request: {message}")]
    Rejected {
        gateway: String,
        message: String,
        raw_body: Option<String>,
    },

    /// The gateway answered the create call successfully but refused to issue
    /// a PIX code. Carries the transaction identifiers from the refusal body
    /// so the charge can still be recorded and correlated later.
    #[error("gateway {gateway} refused the charge: {message}")]
    ChargeRefused {
        gateway: String,
        transaction_id: Option<String>,
        transaction_hash: Option<String>,
        message: String,
    },

    #[error("gateway {gateway} refused credentials: {message}")]
    Unauthorized { gateway: String, message: String },

    #[error("gateway {gateway} timed out after {seconds}s")]
    Timeout { gateway: String, seconds: u64 },

    #[error("gateway {gateway} transient failure: {message}")]
    Transient {
        gateway: String,
        message: String,
        raw_body: Option<String>,
    },

    #[error("webhook payload malformed: {message}")]
    WebhookMalformed { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient { .. } | GatewayError::Timeout { .. }
        )
    }

    /// True when the error should flip the stored credential record to
    /// unverified so the seller sees it in the admin panel.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, GatewayError::Unauthorized { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::InvalidInput { message, .. } => message.clone(),
            GatewayError::Rejected { .. } | GatewayError::ChargeRefused { .. } => {
                "Não foi possível gerar o PIX agora. Tente novamente em instantes.".to_string()
            }
            GatewayError::Unauthorized { .. } => {
                "Gateway de pagamento indisponível. Avise o vendedor.".to_string()
            }
            GatewayError::Timeout { .. } | GatewayError::Transient { .. } => {
                "O gateway demorou para responder. Tente novamente.".to_string()
            }
            GatewayError::WebhookMalformed { message } => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_are_set() {
        assert!(GatewayError::Transient {
            gateway: "bolt".to_string(),
            message: "502".to_string(),
            raw_body: None,
        }
        .is_retryable());
        assert!(GatewayError::Timeout {
            gateway: "hoopay".to_string(),
            seconds: 30,
        }
        .is_retryable());
        assert!(!GatewayError::Rejected {
            gateway: "paradise".to_string(),
            message: "refused".to_string(),
            raw_body: None,
        }
        .is_retryable());
        assert!(!GatewayError::ChargeRefused {
            gateway: "atomopay".to_string(),
            transaction_id: Some("at_1".to_string()),
            transaction_hash: None,
            message: "refused at creation".to_string(),
        }
        .is_retryable());
        assert!(!GatewayError::InvalidInput {
            message: "amount".to_string(),
            field: Some("amount".to_string()),
        }
        .is_retryable());
    }

    #[test]
    fn auth_failures_are_flagged() {
        assert!(GatewayError::Unauthorized {
            gateway: "orionpay".to_string(),
            message: "401".to_string(),
        }
        .is_auth_failure());
    }
}
