use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use riskledger_core::{LedgerError, Result, ScopeKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a live bucket: its scope kind plus the key resolved from the context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub scope: ScopeKind,
    pub key: String,
}

impl BucketKey {
    pub fn new(scope: ScopeKind, key: impl Into<String>) -> Self {
        Self {
            scope,
            key: key.into(),
        }
    }

    /// Flat key used by the storage backends, e.g. `execution:exec-42`.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.scope.prefix(), self.key)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.prefix(), self.key)
    }
}

/// How to seed a bucket that does not exist yet, and when to refuse debits.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitSpec {
    pub initial_limit: u64,
    pub ttl_secs: Option<u64>,
    /// Spend fraction at which the bucket is RED. A bucket already at or past it
    /// refuses every further debit.
    pub red_cutoff: Option<f64>,
}

/// Bound on automatic limit raises for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionWindow {
    pub max_extra: u64,
    pub window_secs: u64,
}

/// Persisted state of one bucket instance. Invariant: `remaining <= limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub remaining: u64,
    pub limit: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Extension granted inside the current window.
    pub extended_this_window: u64,
    pub window_expires_at: Option<DateTime<Utc>>,
}

/// Result of an atomic conditional debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitOutcome {
    pub ok: bool,
    /// Balance after the debit when `ok`, otherwise the untouched balance.
    pub remaining: u64,
    pub limit: u64,
}

/// Result of an atomic limit raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaiseOutcome {
    pub granted: u64,
    pub limit: u64,
    pub remaining: u64,
}

/// Fraction of the limit already spent. A zero limit counts as fully spent.
pub fn spend_fraction(remaining: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 1.0;
    }
    let spent = limit.saturating_sub(remaining);
    spent as f64 / limit as f64
}

/// `now` plus `secs`, or a configuration error when the instant is not representable.
pub fn offset_by_secs(now: DateTime<Utc>, secs: u64) -> Result<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| LedgerError::Configuration(format!("duration of {secs}s is out of range")))
}

impl BucketRecord {
    pub fn fresh(spec: &LimitSpec, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            remaining: spec.initial_limit,
            limit: spec.initial_limit,
            created_at: now,
            expires_at: spec.ttl_secs.map(|ttl| offset_by_secs(now, ttl)).transpose()?,
            extended_this_window: 0,
            window_expires_at: None,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn spend_fraction(&self) -> f64 {
        spend_fraction(self.remaining, self.limit)
    }

    /// Debit `cost` if affordable and the bucket is not already RED. State is untouched on refusal.
    pub fn try_debit(&mut self, cost: u64, red_cutoff: Option<f64>) -> DebitOutcome {
        let already_red = red_cutoff.is_some_and(|cutoff| self.spend_fraction() >= cutoff);
        if already_red || self.remaining < cost {
            return DebitOutcome {
                ok: false,
                remaining: self.remaining,
                limit: self.limit,
            };
        }
        self.remaining -= cost;
        DebitOutcome {
            ok: true,
            remaining: self.remaining,
            limit: self.limit,
        }
    }

    /// Return funds, never above the limit.
    pub fn credit(&mut self, amount: u64) -> u64 {
        self.remaining = self.remaining.saturating_add(amount).min(self.limit);
        self.remaining
    }

    /// Raise the limit and balance together so spent is unchanged. With a window, the
    /// cumulative grant inside the window is capped at `max_extra`.
    pub fn raise(&mut self, amount: u64, window: Option<&ExtensionWindow>, now: DateTime<Utc>) -> Result<RaiseOutcome> {
        let granted = match window {
            Some(w) => {
                if self.window_expires_at.is_none_or(|at| at <= now) {
                    self.window_expires_at = Some(offset_by_secs(now, w.window_secs)?);
                    self.extended_this_window = 0;
                }
                let headroom = w.max_extra.saturating_sub(self.extended_this_window);
                let granted = amount.min(headroom);
                self.extended_this_window += granted;
                granted
            }
            None => amount,
        };
        self.limit = self.limit.saturating_add(granted);
        self.remaining = self.remaining.saturating_add(granted);
        Ok(RaiseOutcome {
            granted,
            limit: self.limit,
            remaining: self.remaining,
        })
    }
}

/// The bucket store contract. Every method is one indivisible operation per key;
/// no intermediate state is observable to other callers.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Create the bucket if absent (honoring TTL), then debit `cost` only if affordable.
    async fn conditional_debit(&self, key: &BucketKey, cost: u64, spec: &LimitSpec) -> Result<DebitOutcome>;

    /// Return `amount` to a bucket. A missing or expired bucket is left alone and reports 0.
    async fn credit(&self, key: &BucketKey, amount: u64) -> Result<u64>;

    /// Raise limit and remaining by up to `amount`; bounded by `window` when given.
    /// Remaining grows with the limit, so the amount already spent is unchanged.
    async fn raise_limit(
        &self,
        key: &BucketKey,
        amount: u64,
        spec: &LimitSpec,
        window: Option<&ExtensionWindow>,
    ) -> Result<RaiseOutcome>;

    /// Read a bucket without creating it. Expired buckets read as absent.
    async fn snapshot(&self, key: &BucketKey) -> Result<Option<BucketRecord>>;

    /// Drop a bucket. Returns whether one existed.
    async fn reset(&self, key: &BucketKey) -> Result<bool>;
}
