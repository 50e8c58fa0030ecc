use riskledger_config::EmitMode;
use riskledger_core::{Band, LedgerError, Result, VerdictKind};
use serde::Serialize;

use crate::ledger::BucketState;
use crate::policy::Directives;

/// A limit raise granted while evaluating a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub bucket_key: String,
    pub granted: u64,
    pub limit: u64,
    pub remaining: u64,
}

/// The caller-visible result of a charge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub kind: VerdictKind,
    /// Worst band across the touched buckets. An insolvent bucket counts as RED.
    pub band: Band,
    pub directives: Directives,
    /// Set on `Halted`: the token the caller uses to produce a partial result.
    pub fallback_strategy: Option<String>,
    pub emit_mode: Option<EmitMode>,
    /// Units actually debited from each bucket (0 when nothing was burned).
    pub charged: u64,
    pub buckets: Vec<BucketState>,
    /// Key of the bucket that could not afford the charge.
    pub insolvent: Option<String>,
    pub extensions: Vec<Extension>,
    /// The store did not answer in time; `kind` reflects the configured fail mode.
    pub outcome_unknown: bool,
    pub reason: Option<String>,
}

impl Verdict {
    /// Zero-cost charges pass through without touching any bucket.
    pub fn unmetered() -> Self {
        Self {
            kind: VerdictKind::Proceed,
            band: Band::Green,
            directives: Directives::default(),
            fallback_strategy: None,
            emit_mode: None,
            charged: 0,
            buckets: Vec::new(),
            insolvent: None,
            extensions: Vec::new(),
            outcome_unknown: false,
            reason: None,
        }
    }

    pub fn proceeds(&self) -> bool {
        self.kind == VerdictKind::Proceed
    }

    /// Turn a `Rejected` verdict into `LedgerError::Rejected`; everything else passes.
    pub fn into_result(self) -> Result<Self> {
        if self.kind != VerdictKind::Rejected {
            return Ok(self);
        }
        let bucket = self
            .insolvent
            .clone()
            .or_else(|| {
                self.buckets
                    .iter()
                    .find(|b| b.band == Band::Red)
                    .map(|b| b.key.to_string())
            })
            .unwrap_or_default();
        Err(LedgerError::Rejected {
            bucket,
            reason: self
                .reason
                .unwrap_or_else(|| "risk budget exhausted".to_string()),
        })
    }
}
