mod bot_callback_tests {
    use grimbots_backend::bots::handlers::{parse_callback, CallbackAction};

    #[test]
    fn test_buy_callbacks_parse_plan_index() {
        assert_eq!(
            parse_callback("buy:0"),
            Some(CallbackAction::Buy { plan: 0 })
        );
        assert_eq!(
            parse_callback("buy:12"),
            Some(CallbackAction::Buy { plan: 12 })
        );
    }

    #[test]
    fn test_bump_answers_are_binary() {
        assert_eq!(
            parse_callback("bump:3:yes"),
            Some(CallbackAction::Bump {
                plan: 3,
                accepted: true
            })
        );
        assert_eq!(
            parse_callback("bump:3:no"),
            Some(CallbackAction::Bump {
                plan: 3,
                accepted: false
            })
        );
        assert_eq!(parse_callback("bump:3:maybe"), None);
        assert_eq!(parse_callback("bump:3"), None);
    }

    #[test]
    fn test_verify_keeps_the_full_payment_id() {
        assert_eq!(
            parse_callback("verify:BOT7_1700000000_aabbccdd"),
            Some(CallbackAction::Verify {
                payment_id: "BOT7_1700000000_aabbccdd".to_string()
            })
        );
        assert_eq!(parse_callback("verify:"), None);
    }

    #[test]
    fn test_unknown_or_garbled_data_is_ignored() {
        for data in ["", "refund:1", "buy:", "buy:abc", "down:", ":::"] {
            assert_eq!(parse_callback(data), None, "data {:?}", data);
        }
        assert_eq!(
            parse_callback("down:4"),
            Some(CallbackAction::Downsell { plan: 4 })
        );
    }

    // Telegram rejects callback data over 64 bytes, so buttons carry indexes
    // and the payment id is the only variable-length payload.
    #[test]
    fn test_callback_data_stays_under_telegram_limit() {
        let payment_id = "BOT9223372036854775807_1700000000_ffffffff";
        let data = format!("verify:{}", payment_id);
        assert!(data.len() <= 64, "callback data too long: {}", data.len());
    }
}
