use riskledger_config::Threshold;
use riskledger_core::{ExecutionContext, LedgerError, Result};
use riskledger_store::{BucketKey, LimitSpec};

use crate::band::red_cutoff;
use crate::profile::Profile;

/// Which of a profile's buckets a charge applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketSelector {
    All,
    Named(String),
}

impl BucketSelector {
    /// `"all"` or `"*"` selects every bucket; anything else names one.
    pub fn parse(s: &str) -> Self {
        match s {
            "all" | "*" => Self::All,
            name => Self::Named(name.to_string()),
        }
    }
}

/// A bucket spec bound to the concrete key of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBucket {
    pub name: String,
    pub key: BucketKey,
    pub limit_spec: LimitSpec,
    pub thresholds: Vec<Threshold>,
}

/// Resolve the buckets a charge touches, in profile order. Pure: no I/O.
pub fn resolve(ctx: &ExecutionContext, profile: &Profile, selector: &BucketSelector) -> Result<Vec<ResolvedBucket>> {
    let selected: Vec<_> = match selector {
        BucketSelector::All => profile.buckets.iter().collect(),
        BucketSelector::Named(name) => vec![profile.bucket(name).ok_or_else(|| {
            LedgerError::Configuration(format!("profile '{}' has no bucket '{name}'", profile.name))
        })?],
    };

    selected
        .into_iter()
        .map(|bucket| {
            let key = bucket.template.render(|field| match ctx.field(field)? {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(LedgerError::Validation(format!(
                    "bucket '{}' needs context field '{field}', which is not set",
                    bucket.spec.name
                ))),
            })?;
            Ok(ResolvedBucket {
                name: bucket.spec.name.clone(),
                key: BucketKey::new(bucket.spec.scope.clone(), key),
                limit_spec: LimitSpec {
                    initial_limit: bucket.spec.limit,
                    ttl_secs: bucket.spec.ttl_secs,
                    red_cutoff: red_cutoff(&bucket.spec.thresholds),
                },
                thresholds: bucket.spec.thresholds.clone(),
            })
        })
        .collect()
}
