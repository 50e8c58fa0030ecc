//! Severity band classification.

use riskledger_config::Threshold;
use riskledger_core::Band;
use riskledger_store::spend_fraction;

/// Band for a bucket: the highest threshold whose cutoff is `<=` the spend fraction.
/// Cutoffs are inclusive, so a fraction landing exactly on a cutoff enters that band.
pub fn classify(remaining: u64, limit: u64, thresholds: &[Threshold]) -> Band {
    band_for_fraction(spend_fraction(remaining, limit), thresholds)
}

pub fn band_for_fraction(fraction: f64, thresholds: &[Threshold]) -> Band {
    thresholds
        .iter()
        .filter(|t| t.at <= fraction)
        .map(|t| t.band)
        .max()
        .unwrap_or(Band::Green)
}

/// Spend fraction at which a bucket turns RED, if it has a red threshold.
pub fn red_cutoff(thresholds: &[Threshold]) -> Option<f64> {
    thresholds.iter().find(|t| t.band == Band::Red).map(|t| t.at)
}
