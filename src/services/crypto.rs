//! Credential encryption at rest. Gateway secrets and pixel access tokens are
//! stored as ChaCha20Poly1305 ciphertext, nonce prepended, base64 encoded.
//! The 256-bit key is derived from `CREDENTIALS_KEY` so it is stable across
//! restarts.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("ciphertext encoding invalid: {0}")]
    Encoding(String),
    #[error("decrypted payload invalid: {0}")]
    Payload(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    pub fn new(key_material: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"grimbots:credentials:v1|");
        hasher.update(key_material.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// nonce (12 bytes) || ciphertext, base64 encoded.
    pub fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    pub fn decrypt(&self, encoded: &str) -> CryptoResult<String> {
        let blob = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::Encoding("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Payload(e.to_string()))
    }

    /// Encrypts a credential map as a JSON blob.
    pub fn encrypt_credentials(
        &self,
        credentials: &HashMap<String, String>,
    ) -> CryptoResult<String> {
        let json = serde_json::to_string(credentials)
            .map_err(|e| CryptoError::Payload(e.to_string()))?;
        self.encrypt(&json)
    }

    pub fn decrypt_credentials(&self, encoded: &str) -> CryptoResult<HashMap<String, String>> {
        let json = self.decrypt(encoded)?;
        serde_json::from_str(&json).map_err(|e| CryptoError::Payload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_credential_map() {
        let cipher = CredentialCipher::new("master-key");
        let mut creds = HashMap::new();
        creds.insert("api_key".to_string(), "sk_live_123".to_string());
        creds.insert("product_hash".to_string(), "prod_abc".to_string());

        let encoded = cipher.encrypt_credentials(&creds).unwrap();
        assert_ne!(encoded, "sk_live_123");
        let decoded = cipher.decrypt_credentials(&encoded).unwrap();
        assert_eq!(decoded, creds);
    }

    #[test]
    fn nonce_makes_ciphertext_unique() {
        let cipher = CredentialCipher::new("master-key");
        let a = cipher.encrypt("secret").unwrap();
        let b = cipher.encrypt("secret").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "secret");
        assert_eq!(cipher.decrypt(&b).unwrap(), "secret");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let encoded = CredentialCipher::new("key-a").encrypt("secret").unwrap();
        assert!(CredentialCipher::new("key-b").decrypt(&encoded).is_err());
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let cipher = CredentialCipher::new("master-key");
        let encoded = cipher.encrypt("secret").unwrap();
        let mut blob = BASE64.decode(&encoded).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(cipher.decrypt(&BASE64.encode(blob)).is_err());
    }
}
