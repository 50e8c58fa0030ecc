use riskledger_config::AutoExtendSpec;
use riskledger_core::{ExecutionContext, Result};
use riskledger_store::{BucketStore, ExtensionWindow, RaiseOutcome};
use tracing::{debug, info};

use crate::health::HealthSignals;
use crate::resolver::ResolvedBucket;

/// Grants extra budget to a bucket when the execution looks healthy.
pub struct AutoExtender<'a> {
    spec: &'a AutoExtendSpec,
    health: &'a dyn HealthSignals,
}

impl<'a> AutoExtender<'a> {
    pub fn new(spec: &'a AutoExtendSpec, health: &'a dyn HealthSignals) -> Self {
        Self { spec, health }
    }

    /// Every condition must hold: error rate strictly below the ceiling, risk level at
    /// or below the ceiling, and no recent blocked actions when that is required.
    pub async fn eligible(&self, ctx: &ExecutionContext) -> bool {
        let error_rate = self.health.error_rate(ctx).await;
        if error_rate >= self.spec.max_error_rate {
            debug!(error_rate, ceiling = self.spec.max_error_rate, "auto-extend refused: error rate");
            return false;
        }
        let risk = self.health.risk_level(ctx).await;
        if risk > self.spec.max_risk_level {
            debug!(%risk, ceiling = %self.spec.max_risk_level, "auto-extend refused: risk level");
            return false;
        }
        if self.spec.require_no_blocked_actions && self.health.has_blocked_actions(ctx).await {
            debug!("auto-extend refused: blocked actions present");
            return false;
        }
        true
    }

    /// Raise the bucket by up to `max_extra`; the store enforces the per-window bound.
    /// Returns `None` when nothing could be granted.
    pub async fn extend(
        &self,
        store: &dyn BucketStore,
        bucket: &ResolvedBucket,
    ) -> Result<Option<RaiseOutcome>> {
        let window = ExtensionWindow {
            max_extra: self.spec.max_extra,
            window_secs: self.spec.window_secs,
        };
        let outcome = store
            .raise_limit(&bucket.key, self.spec.max_extra, &bucket.limit_spec, Some(&window))
            .await?;
        if outcome.granted == 0 {
            debug!(bucket = %bucket.key, "auto-extend window exhausted");
            return Ok(None);
        }
        info!(
            bucket = %bucket.key,
            granted = outcome.granted,
            limit = outcome.limit,
            "budget auto-extended"
        );
        Ok(Some(outcome))
    }
}
