mod gateway_factory_tests {
    use std::collections::HashMap;

    use grimbots_backend::config::SplitConfig;
    use grimbots_backend::gateways::{GatewayError, GatewayFactory, GatewayKind};

    fn full_credentials(kind: GatewayKind) -> HashMap<String, String> {
        GatewayFactory::required_keys(kind)
            .iter()
            .map(|k| ((*k).to_string(), format!("{}-value", k)))
            .collect()
    }

    #[test]
    fn test_every_kind_declares_required_keys() {
        for kind in GatewayKind::ALL {
            assert!(
                !GatewayFactory::required_keys(kind).is_empty(),
                "{} has no credential contract",
                kind.as_str()
            );
        }
    }

    #[test]
    fn test_create_succeeds_with_full_credentials() {
        let factory = GatewayFactory::new(SplitConfig::default());
        for kind in GatewayKind::ALL {
            let adapter = factory.create(kind, &full_credentials(kind));
            assert!(adapter.is_ok(), "create failed for {}", kind.as_str());
            assert_eq!(adapter.unwrap().driver().kind(), kind);
        }
    }

    #[test]
    fn test_missing_credential_names_the_key() {
        let factory = GatewayFactory::new(SplitConfig::default());
        let err = factory
            .create(GatewayKind::Syncpay, &HashMap::new())
            .unwrap_err();
        match err {
            GatewayError::InvalidInput { message, field } => {
                assert_eq!(field.as_deref(), Some("client_id"));
                assert!(message.contains("syncpay"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_blank_credential_counts_as_missing() {
        let factory = GatewayFactory::new(SplitConfig::default());
        let mut creds = full_credentials(GatewayKind::Paradise);
        creds.insert("product_hash".to_string(), "   ".to_string());
        let err = factory.create(GatewayKind::Paradise, &creds).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidInput { field: Some(ref f), .. } if f == "product_hash"
        ));
    }

    #[test]
    fn test_webhook_paths_follow_the_slug() {
        let factory = GatewayFactory::new(SplitConfig::default());
        for kind in GatewayKind::ALL {
            let adapter = factory.create(kind, &full_credentials(kind)).unwrap();
            assert_eq!(
                adapter.driver().webhook_path(),
                format!("/webhook/payment/{}", kind.as_str())
            );
        }
    }

    #[test]
    fn test_kind_round_trips_through_its_slug() {
        for kind in GatewayKind::ALL {
            let parsed: GatewayKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("stripe".parse::<GatewayKind>().is_err());
    }
}
