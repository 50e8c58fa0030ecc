//! Authorize-and-burn across a set of buckets.
//!
//! Each debit is atomic per key; the multi-bucket step is a compensating sequence.
//! Between a debit and its compensating credit, concurrent charges against the same
//! bucket observe the debited (tighter) balance. The budget is never looser than
//! configured.
//!
//! The store timeout bounds each store call, not the sequence, so a debit that times
//! out still triggers compensation of the debits before it. A timed-out operation
//! that lands in the store after its deadline stays applied. If the caller drops the
//! `authorize` future itself, debits already applied are not compensated.

use riskledger_core::{Band, Event, EventBus, LedgerError, Result};
use riskledger_store::{BucketKey, BucketStore};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::band::classify;
use crate::resolver::ResolvedBucket;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Observed state of one bucket after a ledger call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketState {
    pub name: String,
    pub key: BucketKey,
    pub remaining: u64,
    pub limit: u64,
    /// Band immediately before this charge.
    pub band_before: Band,
    pub band: Band,
}

impl BucketState {
    pub fn transitioned(&self) -> bool {
        self.band != self.band_before
    }
}

/// Outcome of one authorize-and-burn call.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    /// Every bucket was debited. States are in resolution order.
    Authorized(Vec<BucketState>),
    /// `bucket` could not afford the charge. Buckets in `restored` were debited
    /// and then credited back; `bucket` itself was never touched.
    Insolvent {
        bucket: BucketState,
        requested: u64,
        restored: Vec<BucketState>,
    },
}

impl LedgerOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }

    /// Convert an insolvency into `LedgerError::Insolvent`.
    pub fn into_result(self) -> Result<Vec<BucketState>> {
        match self {
            Self::Authorized(states) => Ok(states),
            Self::Insolvent {
                bucket, requested, ..
            } => Err(LedgerError::Insolvent {
                bucket: bucket.key.to_string(),
                requested,
                remaining: bucket.remaining,
            }),
        }
    }
}

/// Charges one cost against every resolved bucket, all or nothing.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn BucketStore>,
    events: Option<EventBus>,
    timeout: Duration,
}

impl Ledger {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self {
            store,
            events: None,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Deadline for each individual store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one store call under the store timeout.
    pub async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| LedgerError::StoreTimeout {
                after_ms: self.timeout.as_millis() as u64,
            })?
    }

    /// Debit `cost` from every bucket in order. On the first refusal, or on a store
    /// error, the debits already applied are credited back in reverse before returning.
    pub async fn authorize(
        &self,
        execution_id: &str,
        buckets: &[ResolvedBucket],
        cost: u64,
    ) -> Result<LedgerOutcome> {
        let mut applied: Vec<BucketState> = Vec::with_capacity(buckets.len());

        for bucket in buckets {
            let outcome = match self
                .bounded(self.store.conditional_debit(&bucket.key, cost, &bucket.limit_spec))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(bucket = %bucket.key, error = %e, "debit failed, compensating");
                    self.compensate(execution_id, buckets, &mut applied, cost).await;
                    return Err(e);
                }
            };

            if !outcome.ok {
                debug!(
                    bucket = %bucket.key,
                    requested = cost,
                    remaining = outcome.remaining,
                    "bucket insolvent"
                );
                let band = classify(outcome.remaining, outcome.limit, &bucket.thresholds);
                let insolvent = BucketState {
                    name: bucket.name.clone(),
                    key: bucket.key.clone(),
                    remaining: outcome.remaining,
                    limit: outcome.limit,
                    band_before: band,
                    band,
                };
                self.compensate(execution_id, buckets, &mut applied, cost).await;
                return Ok(LedgerOutcome::Insolvent {
                    bucket: insolvent,
                    requested: cost,
                    restored: applied,
                });
            }

            let before = outcome.remaining.saturating_add(cost).min(outcome.limit);
            applied.push(BucketState {
                name: bucket.name.clone(),
                key: bucket.key.clone(),
                remaining: outcome.remaining,
                limit: outcome.limit,
                band_before: classify(before, outcome.limit, &bucket.thresholds),
                band: classify(outcome.remaining, outcome.limit, &bucket.thresholds),
            });
        }

        Ok(LedgerOutcome::Authorized(applied))
    }

    /// Credit back every applied debit, newest first. Credit failures are logged;
    /// the affected bucket stays debited.
    async fn compensate(
        &self,
        execution_id: &str,
        buckets: &[ResolvedBucket],
        applied: &mut [BucketState],
        cost: u64,
    ) {
        for state in applied.iter_mut().rev() {
            match self.bounded(self.store.credit(&state.key, cost)).await {
                Ok(remaining) => {
                    state.remaining = remaining;
                    if let Some(bucket) = buckets.iter().find(|b| b.key == state.key) {
                        state.band = classify(remaining, state.limit, &bucket.thresholds);
                    }
                    debug!(bucket = %state.key, amount = cost, remaining, "compensating credit applied");
                    if let Some(events) = &self.events {
                        events.publish(Event::CompensationApplied {
                            execution_id: execution_id.to_string(),
                            bucket_key: state.key.to_string(),
                            amount: cost,
                        });
                    }
                }
                Err(e) => {
                    warn!(bucket = %state.key, amount = cost, error = %e, "compensating credit failed");
                }
            }
        }
    }
}
