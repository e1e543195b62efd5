//! Liquidity scoring relative to intended order size.

use court_market::LiquiditySnapshot;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// How comfortably the book absorbs the intended order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidityScore {
    High,
    Medium,
    Low,
    Insufficient,
}

impl LiquidityScore {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiquidityScore::High => "high",
            LiquidityScore::Medium => "medium",
            LiquidityScore::Low => "low",
            LiquidityScore::Insufficient => "insufficient",
        }
    }
}

/// Score the book against an intended order size.
///
/// - high: order < 5% of 5-cent depth and spread < 3%
/// - medium: order < 15% of depth and spread < 8%
/// - low: fillable but tight
/// - insufficient: no depth or spread > 15%
pub fn score_liquidity(snapshot: &LiquiditySnapshot, size_usd: Decimal) -> LiquidityScore {
    if snapshot.ask_depth_5c <= Decimal::ZERO {
        return LiquidityScore::Insufficient;
    }
    if snapshot.spread_pct > dec!(15) {
        return LiquidityScore::Insufficient;
    }

    let size_pct = size_usd / snapshot.ask_depth_5c * dec!(100);
    if size_pct < dec!(5) && snapshot.spread_pct < dec!(3) {
        return LiquidityScore::High;
    }
    if size_pct < dec!(15) && snapshot.spread_pct < dec!(8) {
        return LiquidityScore::Medium;
    }
    LiquidityScore::Low
}
