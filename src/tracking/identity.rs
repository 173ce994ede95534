//! Deterministic identity material for Meta attribution: tracking tokens,
//! synthetic browser ids, and the hashed external id list.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Mints a collision-resistant tracking token over the joined inputs plus the
/// current Unix timestamp. Tokens are immutable once issued.
pub fn generate_tracking_token(
    bot_id: i64,
    customer_user_id: &str,
    payment_id: Option<&str>,
    fbclid: Option<&str>,
    utms: &[&str],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bot_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(customer_user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(payment_id.unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(fbclid.unwrap_or_default().as_bytes());
    for utm in utms {
        hasher.update(b"|");
        hasher.update(utm.as_bytes());
    }
    hasher.update(b"|");
    hasher.update(Utc::now().timestamp().to_string().as_bytes());

    format!("tracking_{}", hex::encode(hasher.finalize()))
}

/// Synthesizes a Meta `_fbp` cookie value, deterministic per Telegram user so
/// repeat events for the same person carry the same browser id.
pub fn generate_fbp(telegram_user_id: &str) -> String {
    let digest = Sha256::digest(telegram_user_id.as_bytes());
    let derived = u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]) % 10_000_000_000;
    format!("fb.1.{}.{}", Utc::now().timestamp_millis(), derived)
}

/// Builds a Meta `_fbc` value from a click id. None in, None out.
pub fn generate_fbc(fbclid: Option<&str>, timestamp_ms: Option<i64>) -> Option<String> {
    let fbclid = fbclid?.trim();
    if fbclid.is_empty() {
        return None;
    }
    let ms = timestamp_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
    Some(format!("fb.1.{}.{}", ms, fbclid))
}

fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.trim().to_lowercase().as_bytes()))
}

/// Hashed external ids in a FIXED order (fbclid, user id, email, phone).
/// Meta's match quality depends on positional consistency across events for
/// the same person, so the order must never change.
pub fn build_external_ids(
    fbclid: Option<&str>,
    telegram_user_id: Option<&str>,
    email: Option<&str>,
    phone: Option<&str>,
) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(fbclid) = fbclid.filter(|v| !v.trim().is_empty()) {
        ids.push(sha256_hex(fbclid));
    }
    if let Some(user_id) = telegram_user_id.filter(|v| !v.trim().is_empty()) {
        ids.push(sha256_hex(user_id));
    }
    if let Some(email) = email.filter(|v| !v.trim().is_empty()) {
        ids.push(sha256_hex(email));
    }
    if let Some(phone) = phone.filter(|v| !v.trim().is_empty()) {
        ids.push(sha256_hex(phone));
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_tokens_are_prefixed_and_unique_per_input() {
        let a = generate_tracking_token(1, "111", None, None, &[]);
        let b = generate_tracking_token(2, "111", None, None, &[]);
        assert!(a.starts_with("tracking_"));
        assert_ne!(a, b);
        assert_eq!(a.len(), "tracking_".len() + 64);
    }

    #[test]
    fn fbp_is_deterministic_in_its_derived_part() {
        let a = generate_fbp("424242");
        let b = generate_fbp("424242");
        let derived = |s: &str| s.rsplit('.').next().map(String::from);
        assert_eq!(derived(&a), derived(&b));
        assert!(a.starts_with("fb.1."));
    }

    #[test]
    fn fbc_requires_a_click_id() {
        assert_eq!(generate_fbc(None, None), None);
        assert_eq!(generate_fbc(Some("  "), None), None);
        assert_eq!(
            generate_fbc(Some("IwAR123"), Some(1700000000000)),
            Some("fb.1.1700000000000.IwAR123".to_string())
        );
    }

    #[test]
    fn external_ids_keep_the_fixed_order() {
        let ids = build_external_ids(Some("click"), Some("42"), Some("a@b.com"), Some("+5511"));
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], sha256_hex("click"));
        assert_eq!(ids[1], sha256_hex("42"));
        assert_eq!(ids[2], sha256_hex("a@b.com"));
        assert_eq!(ids[3], sha256_hex("+5511"));

        // Missing values drop out but never reorder the rest.
        let partial = build_external_ids(None, Some("42"), None, Some("+5511"));
        assert_eq!(partial, vec![sha256_hex("42"), sha256_hex("+5511")]);
    }

    #[test]
    fn external_id_hashing_normalizes_case_and_whitespace() {
        let a = build_external_ids(None, None, Some(" User@Example.COM "), None);
        let b = build_external_ids(None, None, Some("user@example.com"), None);
        assert_eq!(a, b);
    }
}
