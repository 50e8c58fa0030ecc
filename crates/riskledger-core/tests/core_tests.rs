#[cfg(test)]
mod tests {
    use riskledger_core::*;

    // ── Band tests ─────────────────────────────────────────────

    #[test]
    fn test_band_ordering() {
        assert!(Band::Green < Band::Yellow);
        assert!(Band::Yellow < Band::Orange);
        assert!(Band::Orange < Band::Red);
        assert_eq!(Band::all().iter().max(), Some(&Band::Red));
    }

    #[test]
    fn test_band_parse_and_display() {
        assert_eq!("ORANGE".parse::<Band>().unwrap(), Band::Orange);
        assert_eq!(Band::Yellow.to_string(), "yellow");
        assert!("purple".parse::<Band>().is_err());
    }

    #[test]
    fn test_band_serde_lowercase() {
        let json = serde_json::to_string(&Band::Red).unwrap();
        assert_eq!(json, "\"red\"");
        let restored: Band = serde_json::from_str("\"green\"").unwrap();
        assert_eq!(restored, Band::Green);
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!("medium".parse::<RiskLevel>().unwrap(), RiskLevel::Medium);
    }

    #[test]
    fn test_scope_prefix() {
        assert_eq!(ScopeKind::Execution.prefix(), "execution");
        assert_eq!(ScopeKind::Global.to_string(), "global");
        assert_eq!(ScopeKind::Custom("tenant".into()).prefix(), "tenant");
    }

    #[test]
    fn test_verdict_kind_roundtrip_str() {
        for kind in [
            VerdictKind::Proceed,
            VerdictKind::Blocked,
            VerdictKind::Halted,
            VerdictKind::Rejected,
        ] {
            assert_eq!(kind.as_str().parse::<VerdictKind>().unwrap(), kind);
        }
    }

    // ── Execution context tests ────────────────────────────────

    #[test]
    fn test_context_fields() {
        let ctx = ExecutionContext::new("exec-1")
            .with_agent("planner")
            .with_group("team-a")
            .with_attribute("tenant", "acme");
        assert_eq!(ctx.field("execution_id").unwrap(), Some("exec-1"));
        assert_eq!(ctx.field("agent_id").unwrap(), Some("planner"));
        assert_eq!(ctx.field("team_id").unwrap(), Some("team-a"));
        assert_eq!(ctx.field("attr.tenant").unwrap(), Some("acme"));
        assert_eq!(ctx.field("attr.region").unwrap(), None);
    }

    #[test]
    fn test_context_unknown_field_is_configuration_error() {
        let ctx = ExecutionContext::new("exec-1");
        match ctx.field("user_id") {
            Err(LedgerError::Configuration(msg)) => assert!(msg.contains("user_id")),
            other => panic!("expected Configuration error, got {other:?}"),
        }
        assert!(!ExecutionContext::is_known_field("attr."));
        assert!(ExecutionContext::is_known_field("attr.tenant"));
    }

    #[test]
    fn test_context_empty_id_invalid() {
        let ctx = ExecutionContext::new("  ");
        assert!(matches!(ctx.validate(), Err(LedgerError::Validation(_))));
        assert!(ExecutionContext::generate().validate().is_ok());
    }

    #[test]
    fn test_context_clones_share_state() {
        let ctx = ExecutionContext::new("exec-1");
        let nested = ctx.clone();
        nested.record_charge(40);
        ctx.record_charge(2);
        assert_eq!(ctx.accumulated_cost(), 42);
        nested.set_band_hint("execution", Band::Yellow);
        assert_eq!(ctx.band_hint("execution"), Some(Band::Yellow));
        nested.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_context_token_roundtrip() {
        let ctx = ExecutionContext::new("exec-9").with_agent("a1");
        ctx.record_charge(10);
        let json = serde_json::to_string(&ctx.token()).unwrap();
        let token: ContextToken = serde_json::from_str(&json).unwrap();
        let remote = ExecutionContext::from_token(token);
        assert_eq!(remote.execution_id(), "exec-9");
        assert_eq!(remote.agent_id(), Some("a1"));
        assert_eq!(remote.accumulated_cost(), 0);
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        let err = LedgerError::Insolvent {
            bucket: "execution:exec-1".into(),
            requested: 50,
            remaining: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("execution:exec-1"));
        assert!(msg.contains("requested 50"));
    }

    #[test]
    fn test_store_fault_classification() {
        assert!(LedgerError::StoreTimeout { after_ms: 5 }.is_store_fault());
        assert!(LedgerError::StoreUnavailable("down".into()).is_store_fault());
        assert!(!LedgerError::Validation("x".into()).is_store_fault());
    }

    // ── Event bus tests ────────────────────────────────────────

    #[tokio::test]
    async fn test_event_bus_delivers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::BucketReset {
            bucket_key: "global:all".into(),
        });
        match rx.recv().await.unwrap() {
            Event::BucketReset { bucket_key } => assert_eq!(bucket_key, "global:all"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_serde_tagged() {
        let event = Event::BandTransition {
            execution_id: "e".into(),
            bucket_key: "execution:e".into(),
            from: Band::Green,
            to: Band::Yellow,
            remaining: 60,
            limit: 200,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "band_transition");
        assert_eq!(json["to"], "yellow");
    }
}
