//! Effective-policy resolution across every bucket touched by one charge.
//!
//! Each field has its own most-restrictive ordering and the merge is a fold over
//! `(band, policy)` pairs in resolution order:
//!
//! | field            | rule                                              |
//! |------------------|---------------------------------------------------|
//! | allowed actions  | intersection (wildcard is the identity)           |
//! | blocked actions  | union                                             |
//! | degrade          | per key, the value from the most severe band wins |
//! | throttle         | maximum                                           |
//! | retries          | minimum                                           |
//! | exhaustion       | HALT if any RED contributor says HALT             |
//! | emit mode        | most restrictive among RED contributors           |
//! | fallback         | first RED contributor that declares one           |

use riskledger_config::{EmitMode, Exhaustion, Policy, PolicyTable};
use riskledger_core::{Band, VerdictKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Directives handed to the caller alongside a verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directives {
    pub degrade: BTreeMap<String, String>,
    pub throttle_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

impl Directives {
    pub fn is_empty(&self) -> bool {
        self.degrade.is_empty() && self.throttle_ms.is_none() && self.max_retries.is_none()
    }
}

/// The combined policy of one charge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectivePolicy {
    /// `None` means every action is allowed.
    pub allowed: Option<BTreeSet<String>>,
    pub blocked: BTreeSet<String>,
    degrade: BTreeMap<String, (Band, String)>,
    pub throttle_ms: Option<u64>,
    pub max_retries: Option<u32>,
    /// Only set once a RED contributor has been folded in.
    pub exhaustion: Option<Exhaustion>,
    pub emit_mode: Option<EmitMode>,
    pub fallback: Option<String>,
}

fn normalize(action: &str) -> String {
    action.to_ascii_uppercase()
}

impl EffectivePolicy {
    /// Fold one bucket's band policy into the running result.
    pub fn merge(mut self, band: Band, policy: &Policy) -> Self {
        if let Some(allowed) = &policy.allowed_actions
            && !allowed.iter().any(|a| a == "*")
        {
            let incoming: BTreeSet<String> = allowed.iter().map(|a| normalize(a)).collect();
            self.allowed = Some(match self.allowed.take() {
                Some(current) => current.intersection(&incoming).cloned().collect(),
                None => incoming,
            });
        }

        self.blocked
            .extend(policy.blocked_actions.iter().map(|a| normalize(a)));

        for (key, value) in &policy.degrade {
            let stricter = self
                .degrade
                .get(key)
                .is_none_or(|(existing, _)| band > *existing);
            if stricter {
                self.degrade.insert(key.clone(), (band, value.clone()));
            }
        }

        self.throttle_ms = match (self.throttle_ms, policy.throttle_ms) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.max_retries = match (self.max_retries, policy.max_retries) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        if band == Band::Red {
            self.exhaustion = Some(self.exhaustion.map_or(policy.exhaustion, |e| e.max(policy.exhaustion)));
            self.emit_mode = Some(self.emit_mode.map_or(policy.emit_mode, |m| m.max(policy.emit_mode)));
            if self.fallback.is_none() {
                self.fallback = policy.fallback.clone();
            }
        }
        self
    }

    /// Whether `action` is refused by the combined allow/block sets.
    pub fn blocks(&self, action: &str) -> bool {
        let action = normalize(action);
        self.blocked.contains(&action)
            || self
                .allowed
                .as_ref()
                .is_some_and(|allowed| !allowed.contains(&action))
    }

    pub fn directives(&self) -> Directives {
        Directives {
            degrade: self
                .degrade
                .iter()
                .map(|(k, (_, v))| (k.clone(), v.clone()))
                .collect(),
            throttle_ms: self.throttle_ms,
            max_retries: self.max_retries,
        }
    }
}

/// Combine the band policies of every touched bucket. A band without an entry in the
/// table contributes nothing, except RED, which falls back to the default (HALT) policy.
pub fn combine(table: &PolicyTable, bands: &[Band]) -> EffectivePolicy {
    let default_red = Policy::default();
    bands.iter().fold(EffectivePolicy::default(), |acc, &band| match table.get(band) {
        Some(policy) => acc.merge(band, policy),
        None if band == Band::Red => acc.merge(band, &default_red),
        None => acc,
    })
}

/// Map the worst band and combined policy to the caller-visible verdict class.
pub fn decide(worst: Band, effective: &EffectivePolicy, action: &str) -> VerdictKind {
    match worst {
        Band::Green | Band::Yellow => VerdictKind::Proceed,
        Band::Orange if effective.blocks(action) => VerdictKind::Blocked,
        Band::Orange => VerdictKind::Proceed,
        Band::Red => match effective.exhaustion.unwrap_or_default() {
            Exhaustion::Halt => VerdictKind::Halted,
            Exhaustion::ThrowException => VerdictKind::Rejected,
        },
    }
}
