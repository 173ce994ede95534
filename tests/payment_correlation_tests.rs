mod payment_correlation_tests {
    use grimbots_backend::gateways::drivers::paradise::ParadiseDriver;
    use grimbots_backend::services::orchestrator::{checkout_key, mint_payment_id};

    #[test]
    fn test_payment_id_round_trips_through_paradise_suffixing() {
        // Paradise echoes references back with a timestamp appended, so the
        // id minted at charge time must survive the trim on the way back in.
        let minted = mint_payment_id(31337);
        let echoed = format!("{}_1700000555", minted);
        assert_eq!(ParadiseDriver::trim_reference_suffix(&echoed), minted);
    }

    #[test]
    fn test_trim_leaves_untouched_references_alone() {
        assert_eq!(
            ParadiseDriver::trim_reference_suffix("BOT1_1700000000_aabbccdd"),
            "BOT1_1700000000_aabbccdd"
        );
        assert_eq!(ParadiseDriver::trim_reference_suffix("custom-ref"), "custom-ref");
    }

    #[test]
    fn test_checkout_cache_keys_are_namespaced() {
        assert_eq!(
            checkout_key("BOT7_1700000000_aabbccdd"),
            "checkout:BOT7_1700000000_aabbccdd"
        );
    }

    #[test]
    fn test_minted_ids_parse_back_to_their_bot() {
        let id = mint_payment_id(907);
        let bot_part = id
            .strip_prefix("BOT")
            .and_then(|rest| rest.split('_').next())
            .and_then(|n| n.parse::<i64>().ok());
        assert_eq!(bot_part, Some(907));
    }
}
