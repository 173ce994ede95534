use std::time::Duration;

use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::error::{GatewayError, GatewayResult};

/// How a driver authenticates its outbound requests.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    Bearer(String),
    Basic { user: String, password: String },
    Header { name: &'static str, value: String },
    None,
}

/// Shared HTTP wrapper for all gateway drivers. Maps status classes onto the
/// gateway error taxonomy: 401/403 become `Unauthorized`, other 4xx become
/// `Rejected` with the raw body kept, 5xx and transport errors become
/// `Transient` after the retry budget is spent.
#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            GatewayError::Transient {
                gateway: "http".to_string(),
                message: format!("failed to initialize HTTP client: {}", e),
                raw_body: None,
            }
        })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        gateway: &str,
        method: reqwest::Method,
        url: &str,
        auth: &AuthScheme,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        let text = self
            .request_text(gateway, method, url, auth, body, additional_headers)
            .await?;
        serde_json::from_str::<T>(&text).map_err(|e| GatewayError::Transient {
            gateway: gateway.to_string(),
            message: format!("invalid gateway JSON response: {}", e),
            raw_body: Some(truncate_body(&text)),
        })
    }

    pub async fn request_text(
        &self,
        gateway: &str,
        method: reqwest::Method,
        url: &str,
        auth: &AuthScheme,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<String> {
        let mut last_transient: Option<GatewayError> = None;

        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            request = match auth {
                AuthScheme::Bearer(token) => request.bearer_auth(token),
                AuthScheme::Basic { user, password } => {
                    request.basic_auth(user, Some(password))
                }
                AuthScheme::Header { name, value } => request.header(*name, value),
                AuthScheme::None => request,
            };
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let err = if e.is_timeout() {
                        GatewayError::Timeout {
                            gateway: gateway.to_string(),
                            seconds: self.timeout.as_secs(),
                        }
                    } else {
                        GatewayError::Transient {
                            gateway: gateway.to_string(),
                            message: format!("request failed: {}", e),
                            raw_body: None,
                        }
                    };
                    last_transient = Some(err);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status.is_success() {
                return Ok(text);
            }

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(GatewayError::Unauthorized {
                    gateway: gateway.to_string(),
                    message: format!("HTTP {}: {}", status, truncate_body(&text)),
                });
            }

            if status.is_client_error() {
                return Err(GatewayError::Rejected {
                    gateway: gateway.to_string(),
                    message: format!("HTTP {}", status),
                    raw_body: Some(truncate_body(&text)),
                });
            }

            // 5xx and 429 retry with exponential backoff.
            warn!(
                gateway = gateway,
                status = %status,
                attempt = attempt + 1,
                "gateway server error, retrying"
            );
            last_transient = Some(GatewayError::Transient {
                gateway: gateway.to_string(),
                message: format!("HTTP {}", status),
                raw_body: Some(truncate_body(&text)),
            });
            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
        }

        Err(last_transient.unwrap_or(GatewayError::Transient {
            gateway: gateway.to_string(),
            message: "request failed".to_string(),
            raw_body: None,
        }))
    }
}

fn truncate_body(text: &str) -> String {
    const MAX: usize = 2048;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

/// Converts an amount in reais to whole centavos, rejecting sub-centavo
/// precision rather than rounding it away.
pub fn to_centavos(amount: Decimal) -> GatewayResult<i64> {
    let scaled = amount * Decimal::from(100);
    if scaled.fract() != Decimal::ZERO {
        return Err(GatewayError::InvalidInput {
            message: format!("amount {} has sub-centavo precision", amount),
            field: Some("amount".to_string()),
        });
    }
    scaled.to_i64().ok_or_else(|| GatewayError::InvalidInput {
        message: format!("amount {} out of range", amount),
        field: Some("amount".to_string()),
    })
}

/// Deterministically synthesizes a valid CPF from a payment id for gateways
/// that demand a document we do not collect. The nine base digits come from a
/// SHA-256 of the id, then the two check digits are computed per the CPF
/// algorithm. First digit is forced non-zero and all-same-digit results are
/// perturbed because validators reject them.
pub fn synthesize_cpf(payment_id: &str) -> String {
    let digest = Sha256::digest(payment_id.as_bytes());
    let mut digits: Vec<u32> = digest.iter().take(9).map(|b| (*b % 10) as u32).collect();

    if digits[0] == 0 {
        digits[0] = 1 + (digest[9] % 9) as u32;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        digits[8] = (digits[8] + 1) % 10;
    }

    let d1 = cpf_check_digit(&digits, 10);
    digits.push(d1);
    let d2 = cpf_check_digit(&digits, 11);
    digits.push(d2);

    digits.iter().map(|d| d.to_string()).collect()
}

/// A provided document is accepted only when it is a real CPF: 11 digits
/// (punctuation allowed), non-uniform, with matching check digits. Raw
/// Telegram ids fail this either on length or on the check digits, so they
/// never reach a gateway as a document.
pub fn is_valid_cpf(document: &str) -> bool {
    let trimmed = document.trim();
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    {
        return false;
    }

    let digits: Vec<u32> = trimmed.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    cpf_check_digit(&digits[..9], 10) == digits[9]
        && cpf_check_digit(&digits[..10], 11) == digits[10]
}

/// The document every driver sends: the buyer's CPF when it validates,
/// otherwise a synthesized one.
pub fn document_or_synthesized(provided: Option<&str>, payment_id: &str) -> String {
    match provided {
        Some(doc) if is_valid_cpf(doc) => {
            doc.chars().filter(|c| c.is_ascii_digit()).collect()
        }
        _ => synthesize_cpf(payment_id),
    }
}

fn cpf_check_digit(digits: &[u32], start_weight: u32) -> u32 {
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| d * (start_weight - i as u32))
        .sum();
    let rem = (sum * 10) % 11;
    if rem == 10 {
        0
    } else {
        rem
    }
}

/// Strips pt-BR diacritics down to plain ASCII for gateways that reject
/// accented payloads. Characters outside the table that are not ASCII are
/// dropped.
pub fn ascii_fold(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => Some('a'),
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => Some('A'),
            'é' | 'è' | 'ê' | 'ë' => Some('e'),
            'É' | 'È' | 'Ê' | 'Ë' => Some('E'),
            'í' | 'ì' | 'î' | 'ï' => Some('i'),
            'Í' | 'Ì' | 'Î' | 'Ï' => Some('I'),
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => Some('o'),
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => Some('O'),
            'ú' | 'ù' | 'û' | 'ü' => Some('u'),
            'Ú' | 'Ù' | 'Û' | 'Ü' => Some('U'),
            'ç' => Some('c'),
            'Ç' => Some('C'),
            'ñ' => Some('n'),
            'Ñ' => Some('N'),
            c if c.is_ascii() => Some(c),
            _ => None,
        })
        .collect()
}

/// Normalizes a Brazilian phone to `55` + DDD + number, digits only.
/// Falls back to a placeholder when the input is absent or too short.
pub fn normalize_phone_br(phone: Option<&str>) -> String {
    let digits: String = phone
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    if digits.len() < 10 {
        return "5511999999999".to_string();
    }
    if digits.starts_with("55") && digits.len() >= 12 {
        digits
    } else {
        format!("55{}", digits)
    }
}

/// Synthesizes a stable per-payment email for gateways that require one.
pub fn synthesize_email(payment_id: &str) -> String {
    let digest = Sha256::digest(payment_id.as_bytes());
    format!("cliente.{}@grimbots.online", hex::encode(&digest[..6]))
}

/// Extracts a decimal amount from a JSON field that may be a number or a
/// numeric string.
pub fn json_amount(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => n.to_string().parse::<Decimal>().ok(),
        JsonValue::String(s) => s.trim().parse::<Decimal>().ok(),
        _ => None,
    }
}

/// Extracts a string from a JSON field that may be a string or a number.
pub fn json_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn centavo_conversion_rejects_sub_centavo() {
        assert_eq!(to_centavos(dec("19.90")).unwrap(), 1990);
        assert_eq!(to_centavos(dec("0.50")).unwrap(), 50);
        assert!(to_centavos(dec("0.505")).is_err());
    }

    #[test]
    fn synthesized_cpf_is_valid_and_stable() {
        let a = synthesize_cpf("BOT42_1700000000_deadbeef");
        let b = synthesize_cpf("BOT42_1700000000_deadbeef");
        assert_eq!(a, b);
        assert_eq!(a.len(), 11);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(a.chars().next(), Some('0'));

        // Recompute check digits to confirm validity.
        let digits: Vec<u32> = a.chars().map(|c| c.to_digit(10).unwrap()).collect();
        assert_eq!(cpf_check_digit(&digits[..9], 10), digits[9]);
        assert_eq!(cpf_check_digit(&digits[..10], 11), digits[10]);
    }

    #[test]
    fn cpf_validator_rejects_telegram_id_shapes() {
        // Typical Telegram user ids: too short, plain digit runs.
        assert!(!is_valid_cpf("123456789"));
        assert!(!is_valid_cpf("7234567890"));
        assert!(!is_valid_cpf("123456789012"));
        assert!(!is_valid_cpf("11111111111"));
        assert!(!is_valid_cpf("not-a-document"));
        // A synthesized CPF always validates.
        assert!(is_valid_cpf(&synthesize_cpf("BOT42_1700000000_deadbeef")));
    }

    #[test]
    fn invalid_documents_fall_back_to_synthesis() {
        let pid = "BOT42_1700000000_deadbeef";
        assert_eq!(
            document_or_synthesized(Some("7234567890"), pid),
            synthesize_cpf(pid)
        );
        assert_eq!(document_or_synthesized(None, pid), synthesize_cpf(pid));
        let valid = synthesize_cpf(pid);
        assert_eq!(document_or_synthesized(Some(&valid), pid), valid);
    }

    #[test]
    fn ascii_fold_handles_portuguese_text() {
        assert_eq!(ascii_fold("José Conceição"), "Jose Conceicao");
        assert_eq!(ascii_fold("Ação Única"), "Acao Unica");
        assert_eq!(ascii_fold("plain text"), "plain text");
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone_br(Some("(11) 98765-4321")), "5511987654321");
        assert_eq!(normalize_phone_br(Some("5511987654321")), "5511987654321");
        assert_eq!(normalize_phone_br(Some("123")), "5511999999999");
        assert_eq!(normalize_phone_br(None), "5511999999999");
    }

    #[test]
    fn json_amount_handles_number_and_string() {
        assert_eq!(json_amount(&serde_json::json!(19.9)), Some(dec("19.9")));
        assert_eq!(json_amount(&serde_json::json!("19.90")), Some(dec("19.90")));
        assert_eq!(json_amount(&serde_json::json!(null)), None);
    }
}
