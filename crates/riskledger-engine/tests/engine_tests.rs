#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use riskledger_config::{AutoExtendSpec, Exhaustion, FailMode, ProfileConfig};
    use riskledger_core::*;
    use riskledger_engine::*;
    use riskledger_store::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Execution bucket only, limit 200, default thresholds and policies.
    fn single(limit: u64) -> ProfileConfig {
        let mut profile = ProfileConfig::default();
        profile.buckets.truncate(1);
        profile.buckets[0].limit = limit;
        profile
    }

    struct Harness {
        governor: Governor,
        store: Arc<MemoryBucketStore>,
        audit: Arc<MemoryAuditLog>,
    }

    fn harness(profiles: Vec<(&str, ProfileConfig)>) -> Harness {
        let mut registry = ProfileRegistry::new();
        for (name, config) in profiles {
            registry.insert(Profile::compile(name, &config).unwrap());
        }
        let store = Arc::new(MemoryBucketStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let governor = Governor::new(registry, store.clone(), audit.clone());
        Harness {
            governor,
            store,
            audit,
        }
    }

    fn exec_key(id: &str) -> BucketKey {
        BucketKey::new(ScopeKind::Execution, id)
    }

    fn execution() -> BucketSelector {
        BucketSelector::Named("execution".into())
    }

    // ── Band scenarios ─────────────────────────────────────────

    mod bands {
        use super::*;

        #[tokio::test]
        async fn test_yellow_then_orange_blocks_write() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");

            let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 140).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Proceed);
            assert_eq!(v.band, Band::Yellow);
            assert_eq!(v.buckets[0].remaining, 60);
            assert_eq!(v.directives.degrade["model_tier"], "reduce");

            let v = h.governor.charge(&ctx, "agentic", &execution(), "WRITE", 50).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Blocked);
            assert_eq!(v.band, Band::Orange);
            assert_eq!(v.buckets[0].remaining, 10);
            assert_eq!(v.directives.throttle_ms, Some(1_000));
            assert_eq!(v.directives.max_retries, Some(1));
            assert_eq!(v.directives.degrade["model_tier"], "minimal");
        }

        #[tokio::test]
        async fn test_orange_allows_unblocked_action() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            let v = h.governor.charge(&ctx, "agentic", &execution(), "read", 190).await.unwrap();
            assert_eq!(v.band, Band::Orange);
            assert_eq!(v.kind, VerdictKind::Proceed);
            assert!(!v.directives.is_empty());
        }

        #[tokio::test]
        async fn test_full_spend_halts_with_fallback() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 190).await.unwrap();

            let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 10).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Halted);
            assert_eq!(v.band, Band::Red);
            assert_eq!(v.buckets[0].remaining, 0);
            assert_eq!(v.fallback_strategy.as_deref(), Some("SUMMARY_ONLY"));
            assert_eq!(v.emit_mode, Some(riskledger_config::EmitMode::PartialResult));
            // Halted is not a failure.
            assert!(v.into_result().is_ok());
        }

        #[tokio::test]
        async fn test_red_bucket_refuses_further_charges() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 200).await.unwrap();

            let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 1).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Halted);
            assert_eq!(v.charged, 0);
            assert_eq!(v.insolvent.as_deref(), Some("execution:exec-1"));
        }

        #[tokio::test]
        async fn test_band_is_monotonic_in_spend() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            let mut last = Band::Green;
            for _ in 0..20 {
                let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 10).await.unwrap();
                assert!(v.band >= last);
                last = v.band;
            }
            assert_eq!(last, Band::Red);
        }

        #[tokio::test]
        async fn test_context_tracks_cost_and_hints() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            let nested = ctx.clone();
            h.governor.charge(&nested, "agentic", &execution(), "READ", 140).await.unwrap();
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 5).await.unwrap();
            assert_eq!(ctx.accumulated_cost(), 145);
            assert_eq!(ctx.band_hint("execution"), Some(Band::Yellow));
        }
    }

    // ── Rejection & all-or-nothing ─────────────────────────────

    mod ledger {
        use super::*;

        #[tokio::test]
        async fn test_throw_exception_rejects_without_debit() {
            let mut profile = single(200);
            if let Some(red) = profile.policies.red.as_mut() {
                red.exhaustion = Exhaustion::ThrowException;
            }
            let h = harness(vec![("strict", profile)]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "strict", &execution(), "READ", 190).await.unwrap();

            let v = h.governor.charge(&ctx, "strict", &execution(), "READ", 50).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Rejected);
            assert_eq!(v.fallback_strategy, None);
            let snapshot = h.store.snapshot(&exec_key("exec-1")).await.unwrap().unwrap();
            assert_eq!(snapshot.remaining, 10);

            let err = v.into_result().unwrap_err();
            assert!(matches!(err, LedgerError::Rejected { ref bucket, .. } if bucket == "execution:exec-1"));
        }

        #[tokio::test]
        async fn test_first_bucket_insolvent_leaves_global_untouched() {
            let mut profile = ProfileConfig::default();
            profile.buckets[0].limit = 25;
            profile.buckets[1].limit = 100_000;
            let h = harness(vec![("agentic", profile)]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 20).await.unwrap();

            let v = h.governor.charge(&ctx, "agentic", &BucketSelector::All, "READ", 20).await.unwrap();
            assert_eq!(v.charged, 0);
            assert_eq!(v.insolvent.as_deref(), Some("execution:exec-1"));
            let global = h.store.snapshot(&BucketKey::new(ScopeKind::Global, "all")).await.unwrap();
            assert!(global.is_none_or(|g| g.remaining == 100_000));
        }

        #[tokio::test]
        async fn test_last_bucket_insolvent_restores_earlier_buckets() {
            let mut profile = ProfileConfig::default();
            // Global first, execution last.
            profile.buckets.reverse();
            profile.buckets[0].limit = 100_000;
            profile.buckets[1].limit = 25;
            let h = harness(vec![("agentic", profile)]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 20).await.unwrap();

            let v = h.governor.charge(&ctx, "agentic", &BucketSelector::All, "READ", 20).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Halted);
            assert_eq!(v.buckets.len(), 2);
            assert_eq!(v.buckets[0].remaining, 100_000);

            let global = h.store.snapshot(&BucketKey::new(ScopeKind::Global, "all")).await.unwrap().unwrap();
            assert_eq!(global.remaining, 100_000);
            let exec = h.store.snapshot(&exec_key("exec-1")).await.unwrap().unwrap();
            assert_eq!(exec.remaining, 5);
        }

        #[tokio::test]
        async fn test_all_buckets_debited_together() {
            let h = harness(vec![("agentic", ProfileConfig::default())]);
            let ctx = ExecutionContext::new("exec-1");
            let v = h.governor.charge(&ctx, "agentic", &BucketSelector::parse("all"), "READ", 30).await.unwrap();
            assert_eq!(v.buckets.len(), 2);
            assert_eq!(v.buckets[0].remaining, 970);
            assert_eq!(v.buckets[1].remaining, 999_970);
        }

        #[tokio::test]
        async fn test_concurrent_charges_never_overdraw() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            let mut handles = Vec::new();
            for _ in 0..100 {
                let governor = h.governor.clone();
                let ctx = ctx.clone();
                handles.push(tokio::spawn(async move {
                    governor
                        .charge(&ctx, "agentic", &BucketSelector::Named("execution".into()), "READ", 7)
                        .await
                        .unwrap()
                        .charged
                }));
            }
            let mut total = 0;
            for handle in handles {
                total += handle.await.unwrap();
            }
            assert!(total <= 200);
            assert_eq!(total, 196);
            assert_eq!(ctx.accumulated_cost(), 196);
        }

        #[tokio::test]
        async fn test_ledger_reports_insolvency_as_error() {
            let store: Arc<dyn BucketStore> = Arc::new(MemoryBucketStore::new());
            let ledger = Ledger::new(store);
            let profile = Profile::compile("agentic", &single(10)).unwrap();
            let ctx = ExecutionContext::new("exec-1");
            let buckets = resolve(&ctx, &profile, &BucketSelector::All).unwrap();

            let outcome = ledger.authorize("exec-1", &buckets, 11).await.unwrap();
            assert!(!outcome.is_authorized());
            assert!(matches!(
                outcome.into_result(),
                Err(LedgerError::Insolvent { requested: 11, remaining: 10, .. })
            ));
        }
    }

    // ── Reads ──────────────────────────────────────────────────

    mod reads {
        use super::*;

        #[tokio::test]
        async fn test_current_band_does_not_create_bucket() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            let reading = h.governor.current_band(&ctx, "agentic", "execution").await.unwrap();
            assert_eq!(reading.band, Band::Green);
            assert_eq!(reading.remaining, 200);
            assert!(!reading.exists);
            assert!(h.store.is_empty());
        }

        #[tokio::test]
        async fn test_current_band_is_idempotent() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 185).await.unwrap();

            let first = h.governor.current_band(&ctx, "agentic", "execution").await.unwrap();
            let second = h.governor.current_band(&ctx, "agentic", "execution").await.unwrap();
            assert_eq!(first, second);
            assert_eq!(first.band, Band::Orange);
            assert_eq!(first.remaining, 15);
        }
    }

    // ── Errors ─────────────────────────────────────────────────

    mod errors {
        use super::*;

        #[tokio::test]
        async fn test_negative_cost_is_validation_error() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            let err = h.governor.charge(&ctx, "agentic", &execution(), "READ", -1).await.unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)));
            assert!(h.store.is_empty());
        }

        #[tokio::test]
        async fn test_unknown_profile_and_bucket() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            let err = h.governor.charge(&ctx, "nope", &execution(), "READ", 1).await.unwrap_err();
            assert!(matches!(err, LedgerError::Configuration(_)));
            let err = h
                .governor
                .charge(&ctx, "agentic", &BucketSelector::Named("tenant".into()), "READ", 1)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::Configuration(_)));
        }

        #[tokio::test]
        async fn test_unset_context_field_is_validation_error() {
            let mut profile = single(200);
            profile.buckets[0].key = "{agent_id}".into();
            let h = harness(vec![("agentic", profile)]);
            let ctx = ExecutionContext::new("exec-1");
            let err = h.governor.charge(&ctx, "agentic", &execution(), "READ", 1).await.unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)));

            let ctx = ctx.with_agent("agent-7");
            let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 1).await.unwrap();
            assert_eq!(v.buckets[0].key, BucketKey::new(ScopeKind::Execution, "agent-7"));
        }

        #[test]
        fn test_unknown_template_field_fails_compile() {
            let mut profile = single(200);
            profile.buckets[0].key = "{tenant}".into();
            assert!(matches!(
                Profile::compile("agentic", &profile),
                Err(LedgerError::Configuration(_))
            ));
        }

        #[test]
        fn test_buckets_sharing_a_counter_fail_compile() {
            let mut profile = single(200);
            let mut twin = profile.buckets[0].clone();
            twin.name = "execution_twin".into();
            profile.buckets.push(twin);
            let err = Profile::compile("agentic", &profile).unwrap_err();
            assert!(matches!(err, LedgerError::Configuration(_)));
            assert!(err.to_string().contains("execution_twin"));
        }

        #[test]
        fn test_unrepresentable_durations_fail_compile() {
            let mut profile = single(200);
            profile.buckets[0].ttl_secs = Some(u64::MAX);
            assert!(matches!(
                Profile::compile("agentic", &profile),
                Err(LedgerError::Configuration(_))
            ));

            let mut profile = single(200);
            profile.auto_extend = Some(AutoExtendSpec {
                max_extra: 50,
                window_secs: 10_u64.pow(16),
                max_error_rate: 0.1,
                max_risk_level: RiskLevel::Medium,
                require_no_blocked_actions: false,
            });
            assert!(matches!(
                Profile::compile("agentic", &profile),
                Err(LedgerError::Configuration(_))
            ));
        }

        #[tokio::test]
        async fn test_zero_cost_touches_nothing() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 0).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Proceed);
            assert!(v.buckets.is_empty());
            assert!(h.store.is_empty());
            assert!(h.audit.is_empty());
        }
    }

    // ── Auto-extension ─────────────────────────────────────────

    mod extension {
        use super::*;

        fn extendable(limit: u64, max_extra: u64) -> ProfileConfig {
            let mut profile = single(limit);
            profile.auto_extend = Some(AutoExtendSpec {
                max_extra,
                window_secs: 600,
                max_error_rate: 0.05,
                max_risk_level: RiskLevel::Medium,
                require_no_blocked_actions: true,
            });
            profile
        }

        #[tokio::test]
        async fn test_insolvent_charge_extended_and_retried() {
            let h = harness(vec![("agentic", extendable(100, 50))]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 80).await.unwrap();

            let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 40).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Proceed);
            assert_eq!(v.charged, 40);
            assert_eq!(v.extensions.len(), 1);
            assert_eq!(v.extensions[0].granted, 50);
            assert_eq!(v.buckets[0].limit, 150);
            assert_eq!(v.buckets[0].remaining, 30);
        }

        #[tokio::test]
        async fn test_cumulative_extension_bounded_per_window() {
            let h = harness(vec![("agentic", extendable(100, 50))]);
            let ctx = ExecutionContext::new("exec-1");

            let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 100).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Proceed);
            assert_eq!(v.buckets[0].limit, 150);

            let mut granted: u64 = v.extensions.iter().map(|e| e.granted).sum();
            for _ in 0..10 {
                let v = h.governor.charge(&ctx, "agentic", &execution(), "READ", 25).await.unwrap();
                granted += v.extensions.iter().map(|e| e.granted).sum::<u64>();
            }
            assert_eq!(granted, 50);
            let snapshot = h.store.snapshot(&exec_key("exec-1")).await.unwrap().unwrap();
            assert_eq!(snapshot.limit, 150);
            assert_eq!(snapshot.remaining, 0);
        }

        #[tokio::test]
        async fn test_unhealthy_execution_not_extended() {
            let h = harness(vec![("agentic", extendable(100, 50))]);
            let governor = h.governor.clone().with_health(Arc::new(StaticHealth {
                error_rate: 0.5,
                ..StaticHealth::default()
            }));
            let ctx = ExecutionContext::new("exec-1");
            let v = governor.charge(&ctx, "agentic", &execution(), "READ", 120).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Halted);
            assert!(v.extensions.is_empty());
            assert_eq!(v.charged, 0);
        }

        #[tokio::test]
        async fn test_risk_ceiling_and_blocked_actions() {
            let spec = AutoExtendSpec {
                max_extra: 10,
                window_secs: 60,
                max_error_rate: 0.05,
                max_risk_level: RiskLevel::Medium,
                require_no_blocked_actions: true,
            };
            let ctx = ExecutionContext::new("exec-1");

            let high = StaticHealth {
                risk_level: RiskLevel::High,
                ..StaticHealth::default()
            };
            assert!(!AutoExtender::new(&spec, &high).eligible(&ctx).await);

            let blocked = StaticHealth {
                has_blocked_actions: true,
                ..StaticHealth::default()
            };
            assert!(!AutoExtender::new(&spec, &blocked).eligible(&ctx).await);

            let boundary = StaticHealth {
                error_rate: 0.05,
                ..StaticHealth::default()
            };
            assert!(!AutoExtender::new(&spec, &boundary).eligible(&ctx).await);

            let medium = StaticHealth {
                risk_level: RiskLevel::Medium,
                ..StaticHealth::default()
            };
            assert!(AutoExtender::new(&spec, &medium).eligible(&ctx).await);
        }
    }

    // ── Store faults ───────────────────────────────────────────

    mod faults {
        use super::*;

        /// Delegates to memory after a fixed delay, or fails outright. With
        /// `stalled_scope` set, only debits in that scope are delayed.
        struct FlakyStore {
            inner: MemoryBucketStore,
            delay: Duration,
            fail: bool,
            stalled_scope: Option<ScopeKind>,
        }

        impl FlakyStore {
            async fn gate(&self, key: &BucketKey) -> Result<()> {
                if self.stalled_scope.as_ref().is_none_or(|scope| *scope == key.scope) {
                    tokio::time::sleep(self.delay).await;
                }
                if self.fail {
                    return Err(LedgerError::StoreUnavailable("connection refused".into()));
                }
                Ok(())
            }
        }

        #[async_trait]
        impl BucketStore for FlakyStore {
            fn name(&self) -> &str {
                "flaky"
            }

            async fn conditional_debit(&self, key: &BucketKey, cost: u64, spec: &LimitSpec) -> Result<DebitOutcome> {
                self.gate(key).await?;
                self.inner.conditional_debit(key, cost, spec).await
            }

            async fn credit(&self, key: &BucketKey, amount: u64) -> Result<u64> {
                self.inner.credit(key, amount).await
            }

            async fn raise_limit(
                &self,
                key: &BucketKey,
                amount: u64,
                spec: &LimitSpec,
                window: Option<&ExtensionWindow>,
            ) -> Result<RaiseOutcome> {
                self.inner.raise_limit(key, amount, spec, window).await
            }

            async fn snapshot(&self, key: &BucketKey) -> Result<Option<BucketRecord>> {
                self.inner.snapshot(key).await
            }

            async fn reset(&self, key: &BucketKey) -> Result<bool> {
                self.inner.reset(key).await
            }
        }

        fn governor(delay: Duration, fail: bool, mode: FailMode) -> Governor {
            let mut registry = ProfileRegistry::new();
            registry.insert(Profile::compile("agentic", &single(200)).unwrap());
            let store = Arc::new(FlakyStore {
                inner: MemoryBucketStore::new(),
                delay,
                fail,
                stalled_scope: None,
            });
            Governor::new(registry, store, Arc::new(MemoryAuditLog::new()))
                .with_timeout(Duration::from_millis(20))
                .with_fail_mode(mode)
        }

        #[tokio::test]
        async fn test_timeout_fails_closed_by_default() {
            let g = governor(Duration::from_millis(200), false, FailMode::default());
            let ctx = ExecutionContext::new("exec-1");
            let v = g.charge(&ctx, "agentic", &execution(), "READ", 5).await.unwrap();
            assert!(v.outcome_unknown);
            assert_eq!(v.kind, VerdictKind::Halted);
            assert_eq!(v.fallback_strategy.as_deref(), Some("SUMMARY_ONLY"));
            assert!(v.reason.unwrap().contains("timed out"));
        }

        #[tokio::test]
        async fn test_timeout_fail_open_proceeds() {
            let g = governor(Duration::from_millis(200), false, FailMode::Open);
            let ctx = ExecutionContext::new("exec-1");
            let v = g.charge(&ctx, "agentic", &execution(), "READ", 5).await.unwrap();
            assert!(v.outcome_unknown);
            assert_eq!(v.kind, VerdictKind::Proceed);
            assert_eq!(ctx.accumulated_cost(), 0);
        }

        #[tokio::test]
        async fn test_unavailable_store_fails_closed() {
            let g = governor(Duration::ZERO, true, FailMode::Closed);
            let ctx = ExecutionContext::new("exec-1");
            let v = g.charge(&ctx, "agentic", &execution(), "READ", 5).await.unwrap();
            assert!(v.outcome_unknown);
            assert_eq!(v.kind, VerdictKind::Halted);
        }

        #[tokio::test]
        async fn test_timeout_mid_charge_restores_earlier_debits() {
            let mut registry = ProfileRegistry::new();
            registry.insert(Profile::compile("agentic", &ProfileConfig::default()).unwrap());
            let inner = MemoryBucketStore::new();
            let store = Arc::new(FlakyStore {
                inner: inner.clone(),
                delay: Duration::from_millis(200),
                fail: false,
                stalled_scope: Some(ScopeKind::Global),
            });
            let g = Governor::new(registry, store, Arc::new(MemoryAuditLog::new()))
                .with_timeout(Duration::from_millis(20));
            let ctx = ExecutionContext::new("exec-1");

            let v = g.charge(&ctx, "agentic", &BucketSelector::All, "READ", 100).await.unwrap();
            assert!(v.outcome_unknown);
            assert_eq!(v.kind, VerdictKind::Halted);
            assert_eq!(v.charged, 0);

            let exec = inner.snapshot(&exec_key("exec-1")).await.unwrap().unwrap();
            assert_eq!(exec.remaining, exec.limit);
            assert!(inner.snapshot(&BucketKey::new(ScopeKind::Global, "all")).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_reads_unaffected_by_stalled_debits() {
            let g = governor(Duration::from_millis(200), false, FailMode::Open);
            let ctx = ExecutionContext::new("exec-1");
            // Snapshot is not delayed, so a read succeeds even when debits stall.
            assert!(g.current_band(&ctx, "agentic", "execution").await.is_ok());
        }
    }

    // ── Audit, events & notifications ──────────────────────────

    mod observability {
        use super::*;
        use serde_json::Value;
        use tokio::sync::mpsc;

        struct ChannelSink(mpsc::UnboundedSender<(String, Value)>);

        #[async_trait]
        impl NotificationSink for ChannelSink {
            async fn send(&self, channel: &str, payload: &Value, _include_options: bool) -> Result<()> {
                let _ = self.0.send((channel.to_string(), payload.clone()));
                Ok(())
            }
        }

        struct BrokenSink;

        #[async_trait]
        impl NotificationSink for BrokenSink {
            async fn send(&self, channel: &str, _payload: &Value, _include_options: bool) -> Result<()> {
                Err(LedgerError::Notification {
                    channel: channel.to_string(),
                    reason: "unreachable".into(),
                })
            }
        }

        #[tokio::test]
        async fn test_audit_records_charge_and_transition() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 140).await.unwrap();

            let records = h.audit.for_execution("exec-1", 10).await.unwrap();
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].kind, AuditKind::Charge);
            assert_eq!(records[0].cost, 140);
            assert_eq!(records[0].remaining, 60);
            assert_eq!(
                records[1].kind,
                AuditKind::Transition {
                    from: Band::Green,
                    to: Band::Yellow
                }
            );
        }

        #[tokio::test]
        async fn test_red_transition_notifies_channel() {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let h = harness(vec![("agentic", single(200))]);
            let governor = h.governor.clone().with_sink(Arc::new(ChannelSink(tx)));
            let ctx = ExecutionContext::new("exec-1");

            governor.charge(&ctx, "agentic", &execution(), "READ", 140).await.unwrap();
            governor.charge(&ctx, "agentic", &execution(), "READ", 60).await.unwrap();

            let (channel, payload) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(channel, "log");
            assert_eq!(payload["to"], "red");
            assert_eq!(payload["from"], "yellow");
            assert_eq!(payload["remaining"], 0);
            // Only the RED rule is configured.
            assert!(rx.try_recv().is_err());
        }

        #[tokio::test]
        async fn test_notification_failure_does_not_fail_charge() {
            let h = harness(vec![("agentic", single(200))]);
            let governor = h.governor.clone().with_sink(Arc::new(BrokenSink));
            let ctx = ExecutionContext::new("exec-1");
            let v = governor.charge(&ctx, "agentic", &execution(), "READ", 200).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Halted);
            assert_eq!(v.charged, 200);
        }

        #[tokio::test]
        async fn test_events_published() {
            let events = EventBus::default();
            let mut rx = events.subscribe();
            let h = harness(vec![("agentic", single(200))]);
            let governor = h.governor.clone().with_events(events);
            let ctx = ExecutionContext::new("exec-1");
            governor.charge(&ctx, "agentic", &execution(), "READ", 150).await.unwrap();

            let mut kinds = Vec::new();
            while let Ok(event) = rx.try_recv() {
                kinds.push(serde_json::to_value(&event).unwrap()["kind"].as_str().unwrap().to_string());
            }
            assert_eq!(kinds, vec!["band_transition", "charge_evaluated"]);
        }

        /// Delivers after a delay.
        struct SlowSink {
            delay: Duration,
            tx: mpsc::UnboundedSender<(String, Value)>,
        }

        #[async_trait]
        impl NotificationSink for SlowSink {
            async fn send(&self, channel: &str, payload: &Value, _include_options: bool) -> Result<()> {
                tokio::time::sleep(self.delay).await;
                let _ = self.tx.send((channel.to_string(), payload.clone()));
                Ok(())
            }
        }

        #[tokio::test]
        async fn test_flush_waits_for_slow_delivery() {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let h = harness(vec![("agentic", single(200))]);
            let governor = h.governor.clone().with_sink(Arc::new(SlowSink {
                delay: Duration::from_millis(100),
                tx,
            }));
            let ctx = ExecutionContext::new("exec-1");
            governor.charge(&ctx, "agentic", &execution(), "READ", 200).await.unwrap();

            assert_eq!(governor.flush_notifications(Duration::from_secs(2)).await, 0);
            let (channel, payload) = rx.try_recv().unwrap();
            assert_eq!(channel, "log");
            assert_eq!(payload["to"], "red");
        }

        #[tokio::test]
        async fn test_flush_gives_up_at_deadline() {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let h = harness(vec![("agentic", single(200))]);
            let governor = h.governor.clone().with_sink(Arc::new(SlowSink {
                delay: Duration::from_secs(30),
                tx,
            }));
            let ctx = ExecutionContext::new("exec-1");
            governor.charge(&ctx, "agentic", &execution(), "READ", 200).await.unwrap();

            assert_eq!(governor.flush_notifications(Duration::from_millis(20)).await, 1);
            assert!(rx.try_recv().is_err());
            assert_eq!(governor.flush_notifications(Duration::from_millis(20)).await, 0);
        }

        #[tokio::test]
        async fn test_router_rejects_unknown_channel() {
            let router = ChannelRouter::new().with_channel("log", Arc::new(LogSink));
            assert!(router.send("log", &Value::Null, false).await.is_ok());
            assert!(matches!(
                router.send("pager", &Value::Null, false).await,
                Err(LedgerError::Notification { .. })
            ));
        }

        #[tokio::test]
        async fn test_router_from_config() {
            let config = riskledger_config::RiskLedgerConfig::default();
            let router = ChannelRouter::from_config(&config.channels, None).unwrap();
            assert_eq!(router.len(), 1);
        }
    }

    // ── Administration ─────────────────────────────────────────

    mod admin {
        use super::*;

        #[tokio::test]
        async fn test_raise_limit_and_reset() {
            let h = harness(vec![("agentic", single(200))]);
            let ctx = ExecutionContext::new("exec-1");
            h.governor.charge(&ctx, "agentic", &execution(), "READ", 200).await.unwrap();

            let raised = h.governor.raise_limit(&ctx, "agentic", "execution", 100).await.unwrap();
            assert_eq!(raised.granted, 100);
            assert_eq!(raised.limit, 300);
            let reading = h.governor.current_band(&ctx, "agentic", "execution").await.unwrap();
            assert_eq!(reading.remaining, 100);
            assert_eq!(reading.band, Band::Green);

            assert!(h.governor.reset_bucket(&ctx, "agentic", "execution").await.unwrap());
            let reading = h.governor.current_band(&ctx, "agentic", "execution").await.unwrap();
            assert!(!reading.exists);
            assert_eq!(reading.limit, 200);

            let kinds: Vec<_> = h
                .audit
                .for_execution("exec-1", 10)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.kind.label())
                .collect();
            assert!(kinds.contains(&"extension"));
            assert!(kinds.contains(&"reset"));
        }
    }

    // ── SQLite backend ─────────────────────────────────────────

    mod sqlite {
        use super::*;

        #[tokio::test]
        async fn test_governor_over_sqlite() {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(SqliteStore::open(&dir.path().join("ledger.db")).unwrap());
            let mut registry = ProfileRegistry::new();
            registry.insert(Profile::compile("agentic", &single(200)).unwrap());
            let governor = Governor::new(registry, store.clone(), store.clone());
            let ctx = ExecutionContext::new("exec-1");

            let v = governor.charge(&ctx, "agentic", &execution(), "READ", 140).await.unwrap();
            assert_eq!(v.band, Band::Yellow);
            let v = governor.charge(&ctx, "agentic", &execution(), "READ", 100).await.unwrap();
            assert_eq!(v.kind, VerdictKind::Halted);
            assert_eq!(v.charged, 0);

            let reading = governor.current_band(&ctx, "agentic", "execution").await.unwrap();
            assert_eq!(reading.remaining, 60);
            let records = store.for_execution("exec-1", 10).await.unwrap();
            assert!(records.len() >= 3);
        }

        #[tokio::test]
        async fn test_locked_database_honours_store_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("ledger.db");
            let store = Arc::new(
                SqliteStore::open(&path)
                    .unwrap()
                    .with_busy_timeout(Duration::from_millis(50))
                    .unwrap(),
            );
            let mut registry = ProfileRegistry::new();
            registry.insert(Profile::compile("agentic", &single(200)).unwrap());
            let governor =
                Governor::new(registry, store.clone(), store.clone()).with_timeout(Duration::from_millis(50));
            let ctx = ExecutionContext::new("exec-1");

            // Another writer holds the database lock.
            let holder = rusqlite::Connection::open(&path).unwrap();
            holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

            let started = std::time::Instant::now();
            let v = governor.charge(&ctx, "agentic", &execution(), "READ", 10).await.unwrap();
            assert!(started.elapsed() < Duration::from_secs(2));
            assert!(v.outcome_unknown);
            assert_eq!(v.kind, VerdictKind::Halted);
            assert_eq!(v.charged, 0);

            holder.execute_batch("ROLLBACK;").unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            let v = governor.charge(&ctx, "agentic", &execution(), "READ", 10).await.unwrap();
            assert!(!v.outcome_unknown);
            assert_eq!(v.charged, 10);
        }
    }
}
