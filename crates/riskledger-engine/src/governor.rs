//! The governing entry point: resolve, authorize-and-burn, classify, decide, record.

use chrono::Utc;
use riskledger_config::FailMode;
use riskledger_core::{Band, Event, EventBus, ExecutionContext, LedgerError, Result, VerdictKind};
use riskledger_store::{AuditKind, AuditRecord, AuditSink, BucketKey, BucketStore, RaiseOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::band::classify;
use crate::extend::AutoExtender;
use crate::health::{HealthSignals, StaticHealth};
use crate::ledger::{BucketState, Ledger, LedgerOutcome};
use crate::notify::{NotificationSink, TransitionNotifier};
use crate::policy::{EffectivePolicy, combine, decide};
use crate::profile::{Profile, ProfileRegistry};
use crate::resolver::{BucketSelector, ResolvedBucket, resolve};
use crate::verdict::{Extension, Verdict};

/// A live band reading for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandReading {
    pub bucket: String,
    pub key: BucketKey,
    pub band: Band,
    pub remaining: u64,
    pub limit: u64,
    /// Whether the bucket exists yet. Absent buckets read as fresh.
    pub exists: bool,
}

/// Governs risk-budget charges for a set of profiles.
#[derive(Clone)]
pub struct Governor {
    registry: Arc<ProfileRegistry>,
    ledger: Ledger,
    notifier: TransitionNotifier,
    health: Arc<dyn HealthSignals>,
    events: Option<EventBus>,
    fail_mode: FailMode,
}

impl Governor {
    pub fn new(registry: ProfileRegistry, store: Arc<dyn BucketStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            registry: Arc::new(registry),
            ledger: Ledger::new(store),
            notifier: TransitionNotifier::new(audit),
            health: Arc::new(StaticHealth::default()),
            events: None,
            fail_mode: FailMode::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = self.notifier.with_sink(sink);
        self
    }

    pub fn with_health(mut self, health: Arc<dyn HealthSignals>) -> Self {
        self.health = health;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.ledger = self.ledger.with_events(events.clone());
        self.notifier = self.notifier.with_events(events.clone());
        self.events = Some(events);
        self
    }

    /// Deadline for each store call a charge or read makes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ledger = self.ledger.with_timeout(timeout);
        self
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        self.notifier.audit()
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    /// Wait up to `timeout` for notification sends still in flight. Returns how many
    /// were abandoned.
    pub async fn flush_notifications(&self, timeout: Duration) -> usize {
        self.notifier.flush(timeout).await
    }

    /// Charge `cost` risk units for `action` against the selected buckets of a profile.
    ///
    /// Configuration and validation problems are errors. Governance outcomes,
    /// including `Rejected`, are verdicts; use [`Verdict::into_result`] to raise on
    /// rejection. A store timeout or fault produces a verdict per the fail mode with
    /// `outcome_unknown` set; the timeout applies to each store call, and debits made
    /// before a failed call are compensated first.
    pub async fn charge(
        &self,
        ctx: &ExecutionContext,
        profile: &str,
        selector: &BucketSelector,
        action: &str,
        cost: i64,
    ) -> Result<Verdict> {
        if cost < 0 {
            return Err(LedgerError::Validation(format!("cost must not be negative, got {cost}")));
        }
        ctx.validate()?;
        let profile = self.registry.get(profile)?;
        let buckets = resolve(ctx, &profile, selector)?;
        let cost = cost as u64;

        if cost == 0 {
            debug!(execution_id = %ctx.execution_id(), profile = %profile.name, action, "zero-cost charge, pass-through");
            return Ok(Verdict::unmetered());
        }

        let verdict = match self.settle(ctx, &profile, &buckets, action, cost).await {
            Ok(verdict) => verdict,
            Err(e) if e.is_store_fault() => self.unknown_outcome(&profile, &buckets, action, &e),
            Err(e) => return Err(e),
        };

        if verdict.charged > 0 {
            ctx.record_charge(verdict.charged);
        }
        for state in &verdict.buckets {
            ctx.set_band_hint(&state.name, state.band);
        }
        self.notifier.record(ctx, &profile, &verdict).await;
        if let Some(events) = &self.events {
            events.publish(Event::ChargeEvaluated {
                execution_id: ctx.execution_id().to_string(),
                profile: profile.name.clone(),
                action: action.to_string(),
                cost,
                verdict: verdict.kind,
            });
        }

        match verdict.kind {
            VerdictKind::Proceed => debug!(
                execution_id = %ctx.execution_id(),
                profile = %profile.name,
                action,
                cost,
                band = %verdict.band,
                "charge proceeds"
            ),
            VerdictKind::Blocked => info!(
                execution_id = %ctx.execution_id(),
                profile = %profile.name,
                action,
                cost,
                band = %verdict.band,
                "action blocked"
            ),
            VerdictKind::Halted | VerdictKind::Rejected => warn!(
                execution_id = %ctx.execution_id(),
                profile = %profile.name,
                action,
                cost,
                verdict = %verdict.kind,
                insolvent = ?verdict.insolvent,
                "risk budget exhausted"
            ),
        }

        Ok(verdict)
    }

    /// Read one bucket's band live from the store. Never creates the bucket.
    pub async fn current_band(&self, ctx: &ExecutionContext, profile: &str, bucket: &str) -> Result<BandReading> {
        let (_, resolved) = self.resolve_one(ctx, profile, bucket)?;
        let snapshot = self.ledger.bounded(self.ledger.store().snapshot(&resolved.key)).await?;
        let (remaining, limit, exists) = match snapshot {
            Some(record) => (record.remaining, record.limit, true),
            None => (resolved.limit_spec.initial_limit, resolved.limit_spec.initial_limit, false),
        };
        let band = classify(remaining, limit, &resolved.thresholds);
        ctx.set_band_hint(&resolved.name, band);
        Ok(BandReading {
            bucket: resolved.name,
            key: resolved.key,
            band,
            remaining,
            limit,
            exists,
        })
    }

    /// Drop a bucket so the next charge recreates it at its initial limit.
    pub async fn reset_bucket(&self, ctx: &ExecutionContext, profile: &str, bucket: &str) -> Result<bool> {
        let (_, resolved) = self.resolve_one(ctx, profile, bucket)?;
        let existed = self.ledger.bounded(self.ledger.store().reset(&resolved.key)).await?;
        info!(bucket = %resolved.key, existed, "bucket reset");
        let limit = resolved.limit_spec.initial_limit;
        self.append_admin(ctx, &resolved, AuditKind::Reset, limit, limit).await;
        if let Some(events) = &self.events {
            events.publish(Event::BucketReset {
                bucket_key: resolved.key.to_string(),
            });
        }
        Ok(existed)
    }

    /// Administrative limit raise. Not bounded by the auto-extension window.
    pub async fn raise_limit(
        &self,
        ctx: &ExecutionContext,
        profile: &str,
        bucket: &str,
        amount: u64,
    ) -> Result<RaiseOutcome> {
        let (_, resolved) = self.resolve_one(ctx, profile, bucket)?;
        let outcome = self
            .ledger
            .bounded(
                self.ledger
                    .store()
                    .raise_limit(&resolved.key, amount, &resolved.limit_spec, None),
            )
            .await?;
        info!(bucket = %resolved.key, granted = outcome.granted, limit = outcome.limit, "limit raised");
        self.append_admin(
            ctx,
            &resolved,
            AuditKind::Extension {
                granted: outcome.granted,
            },
            outcome.remaining,
            outcome.limit,
        )
        .await;
        if let Some(events) = &self.events {
            events.publish(Event::BudgetExtended {
                execution_id: ctx.execution_id().to_string(),
                bucket_key: resolved.key.to_string(),
                granted: outcome.granted,
                limit: outcome.limit,
            });
        }
        Ok(outcome)
    }

    fn resolve_one(&self, ctx: &ExecutionContext, profile: &str, bucket: &str) -> Result<(Arc<Profile>, ResolvedBucket)> {
        let profile = self.registry.get(profile)?;
        let resolved = resolve(ctx, &profile, &BucketSelector::Named(bucket.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Configuration(format!("profile '{}' has no bucket '{bucket}'", profile.name)))?;
        Ok((profile, resolved))
    }

    async fn settle(
        &self,
        ctx: &ExecutionContext,
        profile: &Profile,
        buckets: &[ResolvedBucket],
        action: &str,
        cost: u64,
    ) -> Result<Verdict> {
        let store = self.ledger.store().as_ref();
        let mut extensions = Vec::new();
        let mut outcome = self.ledger.authorize(ctx.execution_id(), buckets, cost).await?;

        // Extension is considered only once compensation has completed.
        let insolvent_key = match &outcome {
            LedgerOutcome::Insolvent { bucket, .. } => Some(bucket.key.clone()),
            LedgerOutcome::Authorized(_) => None,
        };
        if let Some(key) = insolvent_key
            && let Some(spec) = &profile.auto_extend
            && let Some(resolved) = buckets.iter().find(|b| b.key == key)
        {
            let extender = AutoExtender::new(spec, self.health.as_ref());
            if extender.eligible(ctx).await
                && let Some(raise) = self.ledger.bounded(extender.extend(store, resolved)).await?
            {
                extensions.push(Extension {
                    bucket_key: resolved.key.to_string(),
                    granted: raise.granted,
                    limit: raise.limit,
                    remaining: raise.remaining,
                });
                outcome = self.ledger.authorize(ctx.execution_id(), buckets, cost).await?;
            }
        }

        match outcome {
            LedgerOutcome::Authorized(mut states) => {
                if let Some(spec) = &profile.auto_extend {
                    let extender = AutoExtender::new(spec, self.health.as_ref());
                    let mut eligible = None;
                    for (state, resolved) in states.iter_mut().zip(buckets) {
                        if state.band != Band::Red || state.band_before == Band::Red {
                            continue;
                        }
                        let ok = match eligible {
                            Some(ok) => ok,
                            None => *eligible.insert(extender.eligible(ctx).await),
                        };
                        if !ok {
                            break;
                        }
                        // The charge is already authorized; a failed raise leaves it unextended.
                        let raise = match self.ledger.bounded(extender.extend(store, resolved)).await {
                            Ok(Some(raise)) => raise,
                            Ok(None) => continue,
                            Err(e) => {
                                warn!(bucket = %resolved.key, error = %e, "auto-extend failed");
                                break;
                            }
                        };
                        state.remaining = raise.remaining;
                        state.limit = raise.limit;
                        state.band = classify(raise.remaining, raise.limit, &resolved.thresholds);
                        extensions.push(Extension {
                            bucket_key: resolved.key.to_string(),
                            granted: raise.granted,
                            limit: raise.limit,
                            remaining: raise.remaining,
                        });
                    }
                }

                let bands: Vec<Band> = states.iter().map(|s| s.band).collect();
                let worst = bands.iter().copied().max().unwrap_or(Band::Green);
                let effective = combine(&profile.policies, &bands);
                let kind = decide(worst, &effective, action);
                let reason = match kind {
                    VerdictKind::Blocked => Some(format!("action '{action}' is blocked in band {worst}")),
                    VerdictKind::Halted | VerdictKind::Rejected => Some("risk budget exhausted".to_string()),
                    VerdictKind::Proceed => None,
                };
                let mut verdict = assemble(kind, worst, &effective, cost, states);
                verdict.extensions = extensions;
                verdict.reason = reason;
                Ok(verdict)
            }
            LedgerOutcome::Insolvent {
                bucket,
                requested,
                restored,
            } => {
                let mut bands: Vec<Band> = restored.iter().map(|s| s.band).collect();
                bands.push(Band::Red);
                let effective = combine(&profile.policies, &bands);
                let kind = decide(Band::Red, &effective, action);
                let reason = format!(
                    "bucket '{}' insolvent: requested {requested}, remaining {}",
                    bucket.key, bucket.remaining
                );
                let insolvent = bucket.key.to_string();
                let mut states = restored;
                states.push(bucket);
                let mut verdict = assemble(kind, Band::Red, &effective, 0, states);
                verdict.insolvent = Some(insolvent);
                verdict.extensions = extensions;
                verdict.reason = Some(reason);
                Ok(verdict)
            }
        }
    }

    /// Verdict when the store did not give a definite answer.
    fn unknown_outcome(&self, profile: &Profile, buckets: &[ResolvedBucket], action: &str, error: &LedgerError) -> Verdict {
        warn!(
            profile = %profile.name,
            action,
            fail_mode = ?self.fail_mode,
            error = %error,
            "charge outcome unknown"
        );
        let mut verdict = match self.fail_mode {
            FailMode::Open => Verdict::unmetered(),
            FailMode::Closed => {
                let bands = vec![Band::Red; buckets.len().max(1)];
                let effective = combine(&profile.policies, &bands);
                let kind = decide(Band::Red, &effective, action);
                assemble(kind, Band::Red, &effective, 0, Vec::new())
            }
        };
        verdict.outcome_unknown = true;
        verdict.reason = Some(error.to_string());
        verdict
    }

    async fn append_admin(&self, ctx: &ExecutionContext, bucket: &ResolvedBucket, kind: AuditKind, remaining: u64, limit: u64) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            execution_id: ctx.execution_id().to_string(),
            bucket_key: bucket.key.to_string(),
            kind,
            cost: 0,
            remaining,
            limit,
            band: classify(remaining, limit, &bucket.thresholds),
            verdict: VerdictKind::Proceed,
        };
        if let Err(e) = self.audit().append(record).await {
            warn!(bucket = %bucket.key, error = %e, "audit append failed");
        }
    }
}

fn assemble(kind: VerdictKind, band: Band, effective: &EffectivePolicy, charged: u64, buckets: Vec<BucketState>) -> Verdict {
    let halted = kind == VerdictKind::Halted;
    Verdict {
        kind,
        band,
        directives: effective.directives(),
        fallback_strategy: if halted { effective.fallback.clone() } else { None },
        emit_mode: if halted { effective.emit_mode } else { None },
        charged,
        buckets,
        ..Verdict::unmetered()
    }
}
