mod webhook_parsing_tests {
    use grimbots_backend::config::SplitConfig;
    use grimbots_backend::gateways::{GatewayError, GatewayFactory, GatewayKind, PixStatus};
    use serde_json::json;

    fn factory() -> GatewayFactory {
        GatewayFactory::new(SplitConfig::default())
    }

    #[test]
    fn test_every_gateway_has_a_webhook_parser() {
        let factory = factory();
        for kind in GatewayKind::ALL {
            let adapter = factory.webhook_parser(kind);
            assert!(adapter.is_ok(), "no webhook parser for {}", kind.as_str());
        }
    }

    #[test]
    fn test_malformed_body_is_rejected_not_acked() {
        let factory = factory();
        for kind in GatewayKind::ALL {
            let adapter = factory.webhook_parser(kind).unwrap();
            let err = adapter.process_webhook(b"not json at all").unwrap_err();
            assert!(
                matches!(err, GatewayError::WebhookMalformed { .. }),
                "{} should flag malformed bodies",
                kind.as_str()
            );
        }
    }

    #[test]
    fn test_syncpay_paid_webhook_nested_under_data() {
        let adapter = factory().webhook_parser(GatewayKind::Syncpay).unwrap();
        let payload = json!({
            "event": "cashin.completed",
            "data": {
                "id": "sp_123",
                "status": "completed",
                "amount": 19.90,
                "reference": "BOT7_1700000000_aabbccdd",
                "end_to_end_id": "E00038166202601011234"
            }
        });
        let outcome = adapter
            .process_webhook(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.transaction_id.as_deref(), Some("sp_123"));
        assert_eq!(
            outcome.external_reference.as_deref(),
            Some("BOT7_1700000000_aabbccdd")
        );
        assert_eq!(
            outcome.end_to_end_id.as_deref(),
            Some("E00038166202601011234")
        );
    }

    #[test]
    fn test_syncpay_flat_webhook_also_parses() {
        let adapter = factory().webhook_parser(GatewayKind::Syncpay).unwrap();
        let payload = json!({
            "identifier": "sp_456",
            "status": "waiting_payment"
        });
        let outcome = adapter
            .process_webhook(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(outcome.status, PixStatus::Pending);
        assert_eq!(outcome.transaction_id.as_deref(), Some("sp_456"));
    }

    #[test]
    fn test_paradise_reference_suffix_is_trimmed() {
        let adapter = factory().webhook_parser(GatewayKind::Paradise).unwrap();
        let payload = json!({
            "id": "pd_1",
            "hash": "abc123hash",
            "payment_status": "approved",
            "amount": 49.90,
            "reference": "BOT3_1700000000_deadbeef_1700000555"
        });
        let outcome = adapter
            .process_webhook(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.transaction_hash.as_deref(), Some("abc123hash"));
        assert_eq!(
            outcome.external_reference.as_deref(),
            Some("BOT3_1700000000_deadbeef")
        );
    }

    #[test]
    fn test_bolt_only_literal_paid_promotes() {
        let adapter = factory().webhook_parser(GatewayKind::Bolt).unwrap();

        let paid = json!({ "data": { "id": "bt_1", "status": "PAID" } });
        let outcome = adapter.process_webhook(paid.to_string().as_bytes()).unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);

        // Anything else, including statuses other gateways treat as terminal,
        // stays pending for this gateway.
        for raw in ["approved", "completed", "expired", "cancelled", ""] {
            let body = json!({ "data": { "id": "bt_2", "status": raw } });
            let outcome = adapter.process_webhook(body.to_string().as_bytes()).unwrap();
            assert_eq!(outcome.status, PixStatus::Pending, "raw status {:?}", raw);
        }
    }

    #[test]
    fn test_wiinpay_envelope_and_flat_payloads() {
        let adapter = factory().webhook_parser(GatewayKind::Wiinpay).unwrap();

        let wrapped = json!({
            "payment": {
                "id": "wp_1",
                "status": "paid",
                "value": 9.90,
                "external_reference": "BOT1_1700000000_00000001"
            }
        });
        let outcome = adapter
            .process_webhook(wrapped.to_string().as_bytes())
            .unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(
            outcome.external_reference.as_deref(),
            Some("BOT1_1700000000_00000001")
        );

        let flat = json!({ "payment_id": "wp_2", "status": "expired" });
        let outcome = adapter.process_webhook(flat.to_string().as_bytes()).unwrap();
        assert_eq!(outcome.status, PixStatus::Failed);
        assert_eq!(outcome.transaction_id.as_deref(), Some("wp_2"));
    }

    #[test]
    fn test_unknown_status_string_stays_pending() {
        let adapter = factory().webhook_parser(GatewayKind::Paradise).unwrap();
        let payload = json!({ "id": "pd_9", "status": "em_analise_interna" });
        let outcome = adapter
            .process_webhook(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(outcome.status, PixStatus::Pending);
        assert_eq!(outcome.raw_status, "em_analise_interna");
    }

    #[test]
    fn test_pushynpay_heuristic_promotion() {
        let adapter = factory().webhook_parser(GatewayKind::Pushynpay).unwrap();

        // Literal status missing but an end-to-end id is present.
        let payload = json!({
            "id": "px_1",
            "status": "created",
            "end_to_end_id": "E00038166202601011234",
            "value": 1990
        });
        let outcome = adapter
            .process_webhook(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(outcome.status, PixStatus::Paid);
        assert_eq!(outcome.amount, Some("19.90".parse().unwrap()));

        // Large tickets convert exactly once: 150000 centavos is R$1500,
        // not R$15.
        let payload = json!({
            "id": "px_3",
            "status": "paid",
            "value": 150000
        });
        let outcome = adapter
            .process_webhook(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(outcome.amount, Some("1500".parse().unwrap()));

        // A failure keyword anywhere blocks the heuristic.
        let payload = json!({
            "id": "px_2",
            "status": "created",
            "end_to_end_id": "E00038166202601011234",
            "note": "estorno solicitado (refund)"
        });
        let outcome = adapter
            .process_webhook(payload.to_string().as_bytes())
            .unwrap();
        assert_eq!(outcome.status, PixStatus::Pending);
    }
}
