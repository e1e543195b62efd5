//! Calibration-based opportunity scanning.
//!
//! For each game, estimate the win probability of both outcomes from the
//! calibration curve and pick the higher-EV side as the directional leg.
//! The curve's concavity naturally favours underdogs. The opposite side
//! becomes the hedge candidate when both-side trading is enabled.

use court_market::MoneylineMarket;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::calibration::{CalibrationCurve, WinRateEstimate};

/// Legacy sweet-spot bounds, kept as diagnostic metadata on signals. The
/// continuous confidence multiplier replaced the hard cutoff for sizing.
const SWEET_SPOT_LO: f64 = 0.20;
const SWEET_SPOT_HI: f64 = 0.55;

/// Expected value per dollar staked: `w / price - 1`.
pub fn ev_per_dollar(win_rate: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    win_rate / price - 1.0
}

/// One tradeable outcome with its calibration context.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub outcome_name: String,
    pub token_id: String,
    pub price: Decimal,
    pub estimate: WinRateEstimate,
    pub ev_per_dollar: f64,
    pub in_sweet_spot: bool,
}

impl Opportunity {
    /// Calibration edge in percentage points, lower bound vs price.
    pub fn edge_pct(&self) -> Decimal {
        let edge = (self.estimate.lower_bound - price_f64(self.price)) * 100.0;
        Decimal::from_f64(edge).unwrap_or(Decimal::ZERO).round_dp(2)
    }

    pub fn has_positive_ev(&self) -> bool {
        self.ev_per_dollar > 0.0
    }
}

/// Both outcomes of one game, ranked.
#[derive(Debug, Clone)]
pub struct GameEvaluation {
    /// The higher-EV side; the trade's directional leg.
    pub directional: Opportunity,
    /// The other side; hedge candidate (may have negative EV).
    pub hedge: Option<Opportunity>,
    /// Sum of both entry prices, a first look at merge room.
    pub combined_price: Decimal,
}

/// Evaluate a moneyline market against the calibration curve.
///
/// Returns `None` when the market is inactive, malformed, or neither
/// outcome prices inside the curve domain with positive EV.
pub fn evaluate_game(market: &MoneylineMarket, curve: &CalibrationCurve) -> Option<GameEvaluation> {
    if !market.active {
        return None;
    }

    let mut candidates: Vec<Opportunity> = Vec::with_capacity(2);
    for (i, outcome) in market.outcomes.iter().enumerate() {
        let (Some(price), Some(token_id)) = (market.prices.get(i), market.token_ids.get(i)) else {
            continue;
        };
        let price_f = price_f64(*price);
        if price_f <= 0.0 || price_f >= 1.0 {
            debug!(outcome = %outcome, price = %price, "Skipping outcome with degenerate price");
            continue;
        }
        let Some(estimate) = curve.estimate(price_f) else {
            debug!(outcome = %outcome, price = %price, "Price outside calibration domain");
            continue;
        };
        let ev = ev_per_dollar(estimate.lower_bound, price_f);
        candidates.push(Opportunity {
            outcome_name: outcome.clone(),
            token_id: token_id.clone(),
            price: *price,
            estimate,
            ev_per_dollar: ev,
            in_sweet_spot: (SWEET_SPOT_LO..=SWEET_SPOT_HI).contains(&price_f),
        });
    }

    // Rank by EV; the winner must clear zero on the lower bound.
    candidates.sort_by(|a, b| {
        b.ev_per_dollar
            .partial_cmp(&a.ev_per_dollar)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut it = candidates.into_iter();
    let directional = it.next().filter(Opportunity::has_positive_ev)?;
    let hedge = it.next();

    let combined_price = directional.price + hedge.as_ref().map(|h| h.price).unwrap_or(Decimal::ZERO);
    Some(GameEvaluation {
        directional,
        hedge,
        combined_price,
    })
}

fn price_f64(price: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    price.to_f64().unwrap_or(0.0)
}
