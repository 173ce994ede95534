mod tracking_identity_tests {
    use grimbots_backend::tracking::identity::{
        build_external_ids, generate_fbc, generate_fbp, generate_tracking_token,
    };
    use grimbots_backend::tracking::keys::{
        ChatKey, FbclidKey, PaymentKey, TokenKey, UserHashKey,
    };
    use sha2::{Digest, Sha256};

    fn sha256_hex(value: &str) -> String {
        hex::encode(Sha256::digest(value.trim().to_lowercase().as_bytes()))
    }

    #[test]
    fn test_tracking_token_shape() {
        let token = generate_tracking_token(42, "111222333", None, Some("IwAR0abc"), &["cmp1"]);
        assert!(token.starts_with("tracking_"));
        assert_eq!(token.len(), "tracking_".len() + 64);
    }

    #[test]
    fn test_external_id_order_is_fixed() {
        let ids = build_external_ids(
            Some("IwAR0abc"),
            Some("111222333"),
            Some("a@b.com"),
            Some("+5511999998888"),
        );
        assert_eq!(
            ids,
            vec![
                sha256_hex("IwAR0abc"),
                sha256_hex("111222333"),
                sha256_hex("a@b.com"),
                sha256_hex("+5511999998888"),
            ]
        );
    }

    #[test]
    fn test_external_ids_skip_blank_inputs() {
        let ids = build_external_ids(None, Some("111"), Some("  "), None);
        assert_eq!(ids, vec![sha256_hex("111")]);
        assert!(build_external_ids(None, None, None, None).is_empty());
    }

    #[test]
    fn test_fbc_carries_the_click_id_verbatim() {
        assert_eq!(
            generate_fbc(Some("IwAR123"), Some(1700000000000)).as_deref(),
            Some("fb.1.1700000000000.IwAR123")
        );
        assert_eq!(generate_fbc(None, Some(1700000000000)), None);
    }

    #[test]
    fn test_fbp_is_stable_per_user() {
        let tail = |s: String| s.rsplit('.').next().map(String::from);
        assert_eq!(
            tail(generate_fbp("424242")),
            tail(generate_fbp("424242"))
        );
        assert_ne!(tail(generate_fbp("424242")), tail(generate_fbp("424243")));
    }

    #[test]
    fn test_redis_key_contract_with_redirect_frontend() {
        assert_eq!(
            TokenKey("tracking_abc").to_string(),
            "tracking:token:tracking_abc"
        );
        assert_eq!(FbclidKey("IwAR1").to_string(), "tracking:fbclid:IwAR1");
        assert_eq!(
            ChatKey {
                bot_id: 7,
                telegram_user_id: "111"
            }
            .to_string(),
            "tracking:chat:7:111"
        );
        assert_eq!(
            PaymentKey("BOT7_1700000000_aabbccdd").to_string(),
            "tracking:payment:BOT7_1700000000_aabbccdd"
        );

        let hash = hex::encode(Sha256::digest("111".as_bytes()));
        assert_eq!(
            UserHashKey::new("111").to_string(),
            format!("tracking:hash:{}", hash)
        );
    }
}
