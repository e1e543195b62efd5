//! Continuous monotonic calibration curve with uncertainty quantification.
//!
//! Maps an outcome-token price to an estimated win probability using a
//! pre-fit artifact of per-bucket `(price, wins, n)` counts:
//!
//! 1. point estimates are isotonic-regressed (PAVA, weights = n)
//! 2. a one-sided `Beta(wins + 1, losses + 1)` posterior lower bound is
//!    taken per bucket at the configured confidence, then PAVA'd again
//! 3. both series are interpolated with a monotone cubic (Fritsch-Carlson)
//!
//! Outside the fitted price domain both estimates are absent and callers
//! treat the price as having no edge. The default artifact is compiled in;
//! a JSON file can override it. Loaded once per process.
//!
//! Probabilities are f64 internally; they only become `Decimal` at the
//! sizing boundary.

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};
use thiserror::Error;
use tracing::info;

/// Per-bucket observation counts, the unit of the pre-fit artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub price_lo: f64,
    pub price_hi: f64,
    pub wins: u32,
    pub n: u32,
}

impl CalibrationBucket {
    pub fn midpoint(&self) -> f64 {
        (self.price_lo + self.price_hi) / 2.0
    }

    pub fn win_rate(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        f64::from(self.wins) / f64::from(self.n)
    }
}

/// The serialized artifact: bucket counts plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub buckets: Vec<CalibrationBucket>,
    #[serde(default)]
    pub train_start: String,
    #[serde(default)]
    pub train_end: String,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("artifact needs at least 2 buckets, got {0}")]
    TooFewBuckets(usize),

    #[error("bucket prices must be strictly increasing")]
    UnsortedBuckets,

    #[error("reading artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing artifact: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Continuous win rate estimate at one price.
#[derive(Debug, Clone, PartialEq)]
pub struct WinRateEstimate {
    pub price: f64,
    pub point_estimate: f64,
    pub lower_bound: f64,
    /// Bucket label for diagnostics, e.g. "0.40-0.45".
    pub band_label: String,
    /// Nearest bucket's sample size.
    pub effective_n: u32,
}

impl WinRateEstimate {
    /// Coarse confidence label from the nearest bucket's sample size.
    pub fn confidence_label(&self) -> &'static str {
        if self.effective_n >= 100 {
            "high"
        } else if self.effective_n >= 40 {
            "medium"
        } else {
            "low"
        }
    }
}

/// The fitted price -> win-rate curve.
#[derive(Debug, Clone)]
pub struct CalibrationCurve {
    knots: Vec<f64>,
    point: MonotoneCubic,
    lower: MonotoneCubic,
    bands: Vec<(f64, f64)>,
    sample_sizes: Vec<u32>,
    domain_lo: f64,
    domain_hi: f64,
    pub confidence_level: f64,
}

impl CalibrationCurve {
    /// Fit from an artifact at the given one-sided confidence level.
    pub fn fit(artifact: &CalibrationArtifact, confidence_level: f64) -> Result<Self, CalibrationError> {
        let buckets = &artifact.buckets;
        if buckets.len() < 2 {
            return Err(CalibrationError::TooFewBuckets(buckets.len()));
        }
        let knots: Vec<f64> = buckets.iter().map(CalibrationBucket::midpoint).collect();
        if knots.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CalibrationError::UnsortedBuckets);
        }

        let weights: Vec<f64> = buckets.iter().map(|b| f64::from(b.n).max(1.0)).collect();

        // Point estimates: raw win rates forced monotone non-decreasing.
        let raw_points: Vec<f64> = buckets.iter().map(CalibrationBucket::win_rate).collect();
        let iso_points = pava(&raw_points, &weights);

        // Lower bounds: one-sided Beta(wins+1, losses+1) quantile per
        // bucket, then monotonized like the points.
        let raw_lower: Vec<f64> = buckets
            .iter()
            .map(|b| beta_lower_bound(b.wins, b.n, confidence_level))
            .collect();
        let iso_lower = pava(&raw_lower, &weights);

        Ok(Self {
            point: MonotoneCubic::new(&knots, &iso_points),
            lower: MonotoneCubic::new(&knots, &iso_lower),
            bands: buckets.iter().map(|b| (b.price_lo, b.price_hi)).collect(),
            sample_sizes: buckets.iter().map(|b| b.n).collect(),
            domain_lo: buckets[0].price_lo,
            domain_hi: buckets[buckets.len() - 1].price_hi,
            knots,
            confidence_level,
        })
    }

    /// Estimate the win probability at a price. `None` outside the fitted
    /// domain, which callers treat as zero edge.
    pub fn estimate(&self, price: f64) -> Option<WinRateEstimate> {
        if !(self.domain_lo..=self.domain_hi).contains(&price) {
            return None;
        }
        let point = self.point.eval(price).clamp(0.0, 1.0);
        let lower = self.lower.eval(price).clamp(0.0, point);

        // Nearest knot for diagnostics.
        let mut idx = 0;
        let mut best = f64::INFINITY;
        for (i, k) in self.knots.iter().enumerate() {
            let d = (k - price).abs();
            if d < best {
                best = d;
                idx = i;
            }
        }
        let (lo, hi) = self.bands[idx];

        Some(WinRateEstimate {
            price,
            point_estimate: point,
            lower_bound: lower,
            band_label: format!("{:.2}-{:.2}", lo, hi),
            effective_n: self.sample_sizes[idx],
        })
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.domain_lo, self.domain_hi)
    }
}

/// One-sided lower bound of `Beta(wins + 1, losses + 1)` at `confidence`.
fn beta_lower_bound(wins: u32, n: u32, confidence: f64) -> f64 {
    let losses = n.saturating_sub(wins);
    let alpha = f64::from(wins) + 1.0;
    let beta = f64::from(losses) + 1.0;
    match Beta::new(alpha, beta) {
        Ok(dist) => dist.inverse_cdf(1.0 - confidence),
        Err(_) => 0.0,
    }
}

/// Pool Adjacent Violators: weighted isotonic (non-decreasing) regression.
fn pava(values: &[f64], weights: &[f64]) -> Vec<f64> {
    // Blocks of (mean, weight, count), merged backwards on violation.
    let mut means: Vec<f64> = Vec::with_capacity(values.len());
    let mut block_w: Vec<f64> = Vec::with_capacity(values.len());
    let mut counts: Vec<usize> = Vec::with_capacity(values.len());

    for (&v, &w) in values.iter().zip(weights.iter()) {
        means.push(v);
        block_w.push(w);
        counts.push(1);
        while means.len() >= 2 && means[means.len() - 2] > means[means.len() - 1] {
            let (m2, w2, c2) = (means.pop(), block_w.pop(), counts.pop());
            let (m2, w2, c2) = match (m2, w2, c2) {
                (Some(a), Some(b), Some(c)) => (a, b, c),
                _ => break,
            };
            let last = means.len() - 1;
            let merged_w = block_w[last] + w2;
            means[last] = (means[last] * block_w[last] + m2 * w2) / merged_w;
            block_w[last] = merged_w;
            counts[last] += c2;
        }
    }

    let mut out = Vec::with_capacity(values.len());
    for (i, &m) in means.iter().enumerate() {
        for _ in 0..counts[i] {
            out.push(m.clamp(0.0, 1.0));
        }
    }
    out
}

/// Monotone cubic interpolation (Fritsch-Carlson tangents) over sorted
/// knots. Shape-preserving: a monotone input stays monotone.
#[derive(Debug, Clone)]
struct MonotoneCubic {
    xs: Vec<f64>,
    ys: Vec<f64>,
    tangents: Vec<f64>,
}

impl MonotoneCubic {
    fn new(xs: &[f64], ys: &[f64]) -> Self {
        let n = xs.len();
        let mut deltas = Vec::with_capacity(n.saturating_sub(1));
        for i in 0..n - 1 {
            deltas.push((ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]));
        }

        let mut tangents = vec![0.0; n];
        tangents[0] = deltas[0];
        tangents[n - 1] = deltas[n - 2];
        for i in 1..n - 1 {
            if deltas[i - 1] * deltas[i] <= 0.0 {
                tangents[i] = 0.0;
            } else {
                tangents[i] = (deltas[i - 1] + deltas[i]) / 2.0;
            }
        }

        // Fritsch-Carlson limiter keeps the interpolant monotone.
        for i in 0..n - 1 {
            if deltas[i] == 0.0 {
                tangents[i] = 0.0;
                tangents[i + 1] = 0.0;
                continue;
            }
            let a = tangents[i] / deltas[i];
            let b = tangents[i + 1] / deltas[i];
            let s = a * a + b * b;
            if s > 9.0 {
                let tau = 3.0 / s.sqrt();
                tangents[i] = tau * a * deltas[i];
                tangents[i + 1] = tau * b * deltas[i];
            }
        }

        Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            tangents,
        }
    }

    fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1];
        }
        let mut i = 0;
        while i < n - 2 && x > self.xs[i + 1] {
            i += 1;
        }

        let h = self.xs[i + 1] - self.xs[i];
        let t = (x - self.xs[i]) / h;
        let t2 = t * t;
        let t3 = t2 * t;

        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;

        h00 * self.ys[i]
            + h10 * h * self.tangents[i]
            + h01 * self.ys[i + 1]
            + h11 * h * self.tangents[i + 1]
    }
}

/// Compiled-in default artifact: NBA moneyline buckets aggregated in
/// 5-cent bands from the historical fills the table was trained on.
pub fn default_artifact() -> CalibrationArtifact {
    // (price_lo, price_hi, win_rate, n) -> wins = round(win_rate * n)
    const TABLE: &[(f64, f64, f64, u32)] = &[
        (0.20, 0.25, 0.711, 45),
        (0.25, 0.30, 0.852, 54),
        (0.30, 0.35, 0.822, 73),
        (0.35, 0.40, 0.904, 104),
        (0.40, 0.45, 0.917, 121),
        (0.45, 0.50, 0.938, 162),
        (0.50, 0.55, 0.947, 169),
        (0.55, 0.60, 0.957, 141),
        (0.60, 0.65, 0.974, 78),
        (0.65, 0.70, 0.931, 58),
        (0.70, 0.75, 0.933, 45),
        (0.75, 0.80, 0.973, 37),
        (0.80, 0.85, 1.000, 33),
        (0.85, 0.90, 1.000, 30),
        (0.90, 0.95, 1.000, 22),
    ];
    CalibrationArtifact {
        buckets: TABLE
            .iter()
            .map(|&(lo, hi, wr, n)| CalibrationBucket {
                price_lo: lo,
                price_hi: hi,
                wins: (wr * f64::from(n)).round() as u32,
                n,
            })
            .collect(),
        train_start: String::new(),
        train_end: String::new(),
    }
}

/// Load the artifact from a JSON file, or the compiled-in default.
pub fn load_artifact(path: Option<&Path>) -> Result<CalibrationArtifact, CalibrationError> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)?;
            let artifact: CalibrationArtifact = serde_json::from_str(&raw)?;
            info!(path = %p.display(), buckets = artifact.buckets.len(), "Calibration artifact loaded");
            Ok(artifact)
        }
        None => Ok(default_artifact()),
    }
}

static DEFAULT_CURVE: OnceLock<CalibrationCurve> = OnceLock::new();

/// Process-wide default curve, fit once on first use.
pub fn default_curve(confidence_level: f64) -> &'static CalibrationCurve {
    DEFAULT_CURVE.get_or_init(|| {
        // The compiled-in artifact always satisfies the fit preconditions.
        CalibrationCurve::fit(&default_artifact(), confidence_level)
            .unwrap_or_else(|e| panic!("default calibration artifact invalid: {e}"))
    })
}
