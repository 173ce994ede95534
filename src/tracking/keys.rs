//! Type-safe tracking key builders. The exact key strings are part of the
//! contract with the redirect frontend, which writes the same keys.

use sha2::{Digest, Sha256};
use std::fmt;

pub const NAMESPACE: &str = "tracking";

#[derive(Debug, Clone)]
pub struct TokenKey<'a>(pub &'a str);

impl fmt::Display for TokenKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:token:{}", NAMESPACE, self.0)
    }
}

#[derive(Debug, Clone)]
pub struct FbclidKey<'a>(pub &'a str);

impl fmt::Display for FbclidKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:fbclid:{}", NAMESPACE, self.0)
    }
}

/// Keyed on the SHA-256 of the Telegram user id, not the raw id.
#[derive(Debug, Clone)]
pub struct UserHashKey {
    hash: String,
}

impl UserHashKey {
    pub fn new(telegram_user_id: &str) -> Self {
        let digest = Sha256::digest(telegram_user_id.as_bytes());
        Self {
            hash: hex::encode(digest),
        }
    }
}

impl fmt::Display for UserHashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:hash:{}", NAMESPACE, self.hash)
    }
}

#[derive(Debug, Clone)]
pub struct ChatKey<'a> {
    pub bot_id: i64,
    pub telegram_user_id: &'a str,
}

impl fmt::Display for ChatKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:chat:{}:{}",
            NAMESPACE, self.bot_id, self.telegram_user_id
        )
    }
}

#[derive(Debug, Clone)]
pub struct PaymentKey<'a>(pub &'a str);

impl fmt::Display for PaymentKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:payment:{}", NAMESPACE, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats_are_stable() {
        assert_eq!(TokenKey("tracking_abc").to_string(), "tracking:token:tracking_abc");
        assert_eq!(FbclidKey("fb123").to_string(), "tracking:fbclid:fb123");
        assert_eq!(
            ChatKey {
                bot_id: 7,
                telegram_user_id: "12345"
            }
            .to_string(),
            "tracking:chat:7:12345"
        );
        assert_eq!(
            PaymentKey("BOT7_1700000000_aabbccdd").to_string(),
            "tracking:payment:BOT7_1700000000_aabbccdd"
        );
    }

    #[test]
    fn user_hash_key_hides_the_raw_id() {
        let key = UserHashKey::new("123456789").to_string();
        assert!(key.starts_with("tracking:hash:"));
        assert!(!key.contains("123456789"));
        // 64 hex chars of sha256
        assert_eq!(key.len(), "tracking:hash:".len() + 64);
    }
}
