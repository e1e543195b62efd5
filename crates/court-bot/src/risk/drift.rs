//! Calibration drift detection.
//!
//! Compares each price band's rolling realized win rate against the
//! expected rate recorded on its signals at entry time. A band whose
//! realized rate underperforms expectation by more than the configured
//! number of standard errors flags drift, which escalates the circuit
//! breaker to ORANGE.

use crate::store::BandOutcome;

/// Bands with fewer settlements than this carry no signal.
const MIN_SAMPLES: u32 = 5;

/// One band's drift measurement.
#[derive(Debug, Clone)]
pub struct DriftReading {
    pub price_band: String,
    pub expected: f64,
    pub observed: f64,
    pub n: u32,
    /// Positive when the band underperforms expectation.
    pub z: f64,
}

impl DriftReading {
    pub fn from_outcome(outcome: &BandOutcome) -> Option<Self> {
        if outcome.total < MIN_SAMPLES {
            return None;
        }
        let expected = outcome.expected_win_rate.clamp(1e-6, 1.0 - 1e-6);
        let observed = f64::from(outcome.wins) / f64::from(outcome.total);
        let se = (expected * (1.0 - expected) / f64::from(outcome.total)).sqrt();
        if se <= 0.0 {
            return None;
        }
        Some(Self {
            price_band: outcome.price_band.clone(),
            expected,
            observed,
            n: outcome.total,
            z: (expected - observed) / se,
        })
    }
}

/// The worst (largest) underperformance z-score across bands.
pub fn max_drift_z(outcomes: &[BandOutcome]) -> f64 {
    outcomes
        .iter()
        .filter_map(DriftReading::from_outcome)
        .map(|r| r.z)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(band: &str, expected: f64, wins: u32, total: u32) -> BandOutcome {
        BandOutcome {
            price_band: band.to_string(),
            expected_win_rate: expected,
            wins,
            total,
        }
    }

    #[test]
    fn test_underperformance_is_positive_z() {
        let r = DriftReading::from_outcome(&outcome("0.40-0.45", 0.90, 5, 10)).unwrap();
        assert!(r.z > 0.0);
        // 0.90 expected vs 0.50 observed at n=10: se ≈ 0.0949, z ≈ 4.2
        assert!(r.z > 4.0 && r.z < 4.5, "z = {}", r.z);
    }

    #[test]
    fn test_outperformance_is_negative_z() {
        let r = DriftReading::from_outcome(&outcome("0.40-0.45", 0.70, 10, 10)).unwrap();
        assert!(r.z < 0.0);
    }

    #[test]
    fn test_small_samples_ignored() {
        assert!(DriftReading::from_outcome(&outcome("0.40-0.45", 0.9, 0, 4)).is_none());
        let z = max_drift_z(&[outcome("0.40-0.45", 0.9, 0, 4)]);
        assert_eq!(z, 0.0);
    }

    #[test]
    fn test_max_over_bands() {
        let z = max_drift_z(&[
            outcome("0.30-0.35", 0.85, 8, 10),  // mild
            outcome("0.40-0.45", 0.90, 5, 10),  // severe
            outcome("0.50-0.55", 0.95, 10, 10), // outperforming
        ]);
        assert!(z > 4.0);
    }
}
