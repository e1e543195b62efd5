//! The three-way constrained sizer and the target-holding DCA sizer.
//!
//! A position is sized as
//! `bankroll * fractional_kelly * kelly_at_lower_bound * confidence * risk_multiplier`
//! then capped by capital, the absolute per-position limit, and book
//! depth. The binding constraint is recorded on the signal for later
//! analysis.

use court_market::LiquiditySnapshot;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::SizingConfig;
use crate::sizing::score::{score_liquidity, LiquidityScore};

/// Which constraint determined the final size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Kelly,
    Capital,
    Liquidity,
    MaxPosition,
}

impl Binding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Binding::Kelly => "kelly",
            Binding::Capital => "capital",
            Binding::Liquidity => "liquidity",
            Binding::MaxPosition => "max_position",
        }
    }
}

/// Inputs to a single sizing decision.
#[derive(Debug, Clone)]
pub struct SizingInputs<'a> {
    pub bankroll_usd: Decimal,
    pub best_ask: Decimal,
    /// Calibration lower-bound win rate.
    pub lower_bound_wr: f64,
    /// Calibration point-estimate win rate.
    pub point_wr: f64,
    /// Circuit-breaker sizing multiplier (1.0 under GREEN).
    pub risk_multiplier: Decimal,
    pub liquidity: Option<&'a LiquiditySnapshot>,
}

/// A sized order with its diagnostic trail.
#[derive(Debug, Clone)]
pub struct SizingResult {
    pub size_usd: Decimal,
    pub shares: Decimal,
    pub raw_kelly_usd: Decimal,
    pub kelly_fraction: Decimal,
    pub confidence_multiplier: Decimal,
    pub binding: Binding,
    pub liquidity_score: LiquidityScore,
}

impl SizingResult {
    fn zero(binding: Binding, score: LiquidityScore) -> Self {
        Self {
            size_usd: Decimal::ZERO,
            shares: Decimal::ZERO,
            raw_kelly_usd: Decimal::ZERO,
            kelly_fraction: Decimal::ZERO,
            confidence_multiplier: Decimal::ZERO,
            binding,
            liquidity_score: score,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.size_usd <= Decimal::ZERO
    }
}

/// Kelly fraction at the lower-bound win rate, clamped to [0, 1].
///
/// For a binary token priced `ask` paying $1:
/// `f = (p * (1 - ask) - (1 - p) * ask) / (1 - ask) = (p - ask) / (1 - ask)`.
pub fn kelly_fraction(win_rate: Decimal, ask: Decimal) -> Decimal {
    if ask <= Decimal::ZERO || ask >= Decimal::ONE {
        return Decimal::ZERO;
    }
    ((win_rate - ask) / (Decimal::ONE - ask)).clamp(Decimal::ZERO, Decimal::ONE)
}

/// Size a single entry under the full constraint stack.
pub fn size_position(inputs: &SizingInputs<'_>, config: &SizingConfig) -> SizingResult {
    let ask = inputs.best_ask;
    let lb = Decimal::from_f64(inputs.lower_bound_wr).unwrap_or(Decimal::ZERO);
    let pt = Decimal::from_f64(inputs.point_wr).unwrap_or(Decimal::ZERO);

    let score = inputs
        .liquidity
        .map(|l| score_liquidity(l, config.max_position_usd))
        .unwrap_or(LiquidityScore::Medium);

    // EV guard at the lower bound.
    if ask <= Decimal::ZERO || ask >= Decimal::ONE || lb <= ask {
        return SizingResult::zero(Binding::Kelly, score);
    }

    // Spread guard before anything else touches the book.
    if let Some(liq) = inputs.liquidity {
        if liq.spread_pct > config.max_spread_pct {
            return SizingResult::zero(Binding::Liquidity, LiquidityScore::Insufficient);
        }
    }

    let f = kelly_fraction(lb, ask);
    // Continuous confidence multiplier: a wide posterior scales size down
    // smoothly instead of the old hard sweet-spot cutoff.
    let confidence = if pt > Decimal::ZERO {
        (lb / pt).clamp(dec!(0.5), Decimal::ONE)
    } else {
        dec!(0.5)
    };

    let raw = inputs.bankroll_usd * config.fractional_kelly * f * confidence
        * inputs.risk_multiplier.clamp(Decimal::ZERO, Decimal::ONE);

    let capital_cap = if inputs.bankroll_usd > Decimal::ZERO {
        inputs.bankroll_usd * config.capital_risk_pct / dec!(100)
    } else {
        Decimal::MAX
    };
    let liquidity_cap = match inputs.liquidity {
        Some(liq) => liq.ask_depth_5c * config.liquidity_fill_pct / dec!(100),
        None => Decimal::MAX,
    };

    let candidates = [
        (raw, Binding::Kelly),
        (capital_cap, Binding::Capital),
        (liquidity_cap, Binding::Liquidity),
        (config.max_position_usd, Binding::MaxPosition),
    ];
    let (mut size, mut binding) = candidates[0];
    for (value, b) in candidates.iter().skip(1) {
        if *value < size {
            size = *value;
            binding = *b;
        }
    }
    let size = size.max(Decimal::ZERO).round_dp(2);

    let shares = if size > Decimal::ZERO {
        (size / ask).round_dp(2)
    } else {
        Decimal::ZERO
    };

    SizingResult {
        size_usd: size,
        shares,
        raw_kelly_usd: raw.round_dp(2),
        kelly_fraction: f,
        confidence_multiplier: confidence,
        binding,
        liquidity_score: score,
    }
}

/// Pre-computed total budget for a DCA group.
#[derive(Debug, Clone)]
pub struct DcaBudget {
    pub total_usd: Decimal,
    pub num_slices: u32,
    pub first_slice_usd: Decimal,
    pub binding: Binding,
}

/// Scale the single-entry constraints across `num_entries` slices and
/// split the first slice evenly.
pub fn dca_budget(single: &SizingResult, num_entries: u32) -> DcaBudget {
    let n = num_entries.max(1);
    let n_dec = Decimal::from(n);
    let total = (single.size_usd * n_dec).round_dp(2);
    DcaBudget {
        total_usd: total,
        num_slices: n,
        first_slice_usd: (total / n_dec).round_dp(2),
        binding: single.binding,
    }
}

/// Why the target-holding sizer declared the group done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    TargetReached,
    BudgetExhausted,
}

/// One target-holding DCA order.
#[derive(Debug, Clone)]
pub struct TargetOrderResult {
    pub order_usd: Decimal,
    pub raw_gap: Decimal,
    pub remaining_budget: Decimal,
    pub per_entry_cap: Decimal,
    pub completion: Option<CompletionReason>,
}

/// Mark-to-market gap-fill sizing for a follow-on entry.
///
/// `order = min(target_gap, remaining_budget, per_entry_cap)`, where the
/// gap is the distance between the group's total budget and the current
/// value of its holdings.
#[allow(clippy::too_many_arguments)]
pub fn target_order_size(
    total_budget: Decimal,
    costs: &[Decimal],
    prices: &[Decimal],
    current_price: Decimal,
    max_entries: u32,
    entries_done: u32,
    cap_mult: Decimal,
    min_order_usd: Decimal,
) -> TargetOrderResult {
    let total_cost: Decimal = costs.iter().copied().sum();
    let remaining_budget = (total_budget - total_cost).max(Decimal::ZERO);

    if remaining_budget < min_order_usd {
        return TargetOrderResult {
            order_usd: Decimal::ZERO,
            raw_gap: Decimal::ZERO,
            remaining_budget,
            per_entry_cap: Decimal::ZERO,
            completion: Some(CompletionReason::BudgetExhausted),
        };
    }

    let total_shares = court_common::shares_from_costs(costs, prices);
    let current_value = if current_price > Decimal::ZERO {
        total_shares * current_price
    } else {
        Decimal::ZERO
    };
    let raw_gap = (total_budget - current_value).max(Decimal::ZERO);

    if raw_gap < min_order_usd {
        return TargetOrderResult {
            order_usd: Decimal::ZERO,
            raw_gap,
            remaining_budget,
            per_entry_cap: Decimal::ZERO,
            completion: Some(CompletionReason::TargetReached),
        };
    }

    let remaining_entries = Decimal::from(max_entries.saturating_sub(entries_done).max(1));
    let per_entry_cap = remaining_budget / remaining_entries * cap_mult;

    let order = raw_gap
        .min(remaining_budget)
        .min(per_entry_cap)
        .max(Decimal::ZERO)
        .round_dp(2);

    if order < min_order_usd {
        return TargetOrderResult {
            order_usd: Decimal::ZERO,
            raw_gap: raw_gap.round_dp(2),
            remaining_budget: remaining_budget.round_dp(2),
            per_entry_cap: per_entry_cap.round_dp(2),
            completion: Some(CompletionReason::BudgetExhausted),
        };
    }

    TargetOrderResult {
        order_usd: order,
        raw_gap: raw_gap.round_dp(2),
        remaining_budget: remaining_budget.round_dp(2),
        per_entry_cap: per_entry_cap.round_dp(2),
        completion: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn liq(depth_5c: Decimal, spread_pct: Decimal) -> LiquiditySnapshot {
        LiquiditySnapshot {
            token_id: "tok".into(),
            best_bid: dec!(0.38),
            best_ask: dec!(0.40),
            midpoint: dec!(0.39),
            spread: dec!(0.02),
            spread_pct,
            ask_depth_5c: depth_5c,
            ask_depth_10c: depth_5c * dec!(2),
            bid_depth_5c: depth_5c,
            ask_levels: 3,
            bid_levels: 3,
        }
    }

    fn config() -> SizingConfig {
        SizingConfig::default()
    }

    #[test]
    fn test_kelly_fraction_formula() {
        // (0.70 - 0.40) / 0.60 = 0.5
        assert_eq!(kelly_fraction(dec!(0.70), dec!(0.40)), dec!(0.5));
        assert_eq!(kelly_fraction(dec!(0.40), dec!(0.40)), Decimal::ZERO);
        assert_eq!(kelly_fraction(dec!(0.30), dec!(0.40)), Decimal::ZERO);
        // ask = 1.0: zero, not a division blowup
        assert_eq!(kelly_fraction(dec!(0.99), dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn test_single_directional_hard_cap() {
        // Bankroll $1000, ask 0.40, depth $5000, lb 0.70, pt 0.75:
        // f = 0.5, m = 0.70/0.75 ≈ 0.9333,
        // raw = 1000 * 0.25 * 0.5 * 0.9333 ≈ $116.67 -> hard cap $100.
        let snapshot = liq(dec!(5000), dec!(2));
        let mut cfg = config();
        cfg.capital_risk_pct = dec!(50); // capital not binding here
        let inputs = SizingInputs {
            bankroll_usd: dec!(1000),
            best_ask: dec!(0.40),
            lower_bound_wr: 0.70,
            point_wr: 0.75,
            risk_multiplier: Decimal::ONE,
            liquidity: Some(&snapshot),
        };
        let result = size_position(&inputs, &cfg);
        assert_eq!(result.raw_kelly_usd, dec!(116.67));
        assert_eq!(result.size_usd, dec!(100));
        assert_eq!(result.binding, Binding::MaxPosition);
        assert_eq!(result.kelly_fraction, dec!(0.5));
    }

    #[test]
    fn test_capital_cap_binds_small_bankroll() {
        let snapshot = liq(dec!(5000), dec!(2));
        let inputs = SizingInputs {
            bankroll_usd: dec!(1000),
            best_ask: dec!(0.40),
            lower_bound_wr: 0.70,
            point_wr: 0.75,
            risk_multiplier: Decimal::ONE,
            liquidity: Some(&snapshot),
        };
        let result = size_position(&inputs, &config());
        // raw kelly ≈ $116.67 but capital cap = 2% of $1000 = $20.
        assert_eq!(result.size_usd, dec!(20));
        assert_eq!(result.binding, Binding::Capital);
        assert_eq!(result.shares, dec!(50));
    }

    #[test]
    fn test_max_position_binds_large_bankroll() {
        let snapshot = liq(dec!(50000), dec!(2));
        let inputs = SizingInputs {
            bankroll_usd: dec!(100000),
            best_ask: dec!(0.40),
            lower_bound_wr: 0.70,
            point_wr: 0.75,
            risk_multiplier: Decimal::ONE,
            liquidity: Some(&snapshot),
        };
        let result = size_position(&inputs, &config());
        // raw = 100000 * 0.25 * 0.5 * 0.9333 ≈ $11,666; capital cap $2,000;
        // liquidity cap $5,000; hard cap $100 wins.
        assert_eq!(result.size_usd, dec!(100));
        assert_eq!(result.binding, Binding::MaxPosition);
    }

    #[test]
    fn test_liquidity_cap_binds_thin_book() {
        let snapshot = liq(dec!(100), dec!(2));
        let mut cfg = config();
        cfg.capital_risk_pct = dec!(50);
        let inputs = SizingInputs {
            bankroll_usd: dec!(10000),
            best_ask: dec!(0.40),
            lower_bound_wr: 0.70,
            point_wr: 0.75,
            risk_multiplier: Decimal::ONE,
            liquidity: Some(&snapshot),
        };
        let result = size_position(&inputs, &cfg);
        // 10% of $100 depth = $10.
        assert_eq!(result.size_usd, dec!(10));
        assert_eq!(result.binding, Binding::Liquidity);
    }

    #[test]
    fn test_negative_ev_returns_zero() {
        let inputs = SizingInputs {
            bankroll_usd: dec!(1000),
            best_ask: dec!(0.80),
            lower_bound_wr: 0.70,
            point_wr: 0.90,
            risk_multiplier: Decimal::ONE,
            liquidity: None,
        };
        assert!(size_position(&inputs, &config()).is_zero());
    }

    #[test]
    fn test_spread_guard_zeroes() {
        let snapshot = liq(dec!(5000), dec!(12));
        let inputs = SizingInputs {
            bankroll_usd: dec!(1000),
            best_ask: dec!(0.40),
            lower_bound_wr: 0.70,
            point_wr: 0.75,
            risk_multiplier: Decimal::ONE,
            liquidity: Some(&snapshot),
        };
        let result = size_position(&inputs, &config());
        assert!(result.is_zero());
        assert_eq!(result.binding, Binding::Liquidity);
        assert_eq!(result.liquidity_score, LiquidityScore::Insufficient);
    }

    #[test]
    fn test_zero_depth_zeroes() {
        let snapshot = liq(dec!(0), dec!(2));
        let inputs = SizingInputs {
            bankroll_usd: dec!(1000),
            best_ask: dec!(0.40),
            lower_bound_wr: 0.70,
            point_wr: 0.75,
            risk_multiplier: Decimal::ONE,
            liquidity: Some(&snapshot),
        };
        let result = size_position(&inputs, &config());
        assert!(result.is_zero());
        assert_eq!(result.binding, Binding::Liquidity);
    }

    #[test]
    fn test_ask_at_one_returns_zero() {
        let inputs = SizingInputs {
            bankroll_usd: dec!(1000),
            best_ask: Decimal::ONE,
            lower_bound_wr: 0.99,
            point_wr: 0.99,
            risk_multiplier: Decimal::ONE,
            liquidity: None,
        };
        assert!(size_position(&inputs, &config()).is_zero());
    }

    #[test]
    fn test_risk_multiplier_scales() {
        let snapshot = liq(dec!(50000), dec!(2));
        let mut cfg = config();
        cfg.capital_risk_pct = dec!(100);
        cfg.max_position_usd = dec!(10000);
        let base = SizingInputs {
            bankroll_usd: dec!(1000),
            best_ask: dec!(0.40),
            lower_bound_wr: 0.70,
            point_wr: 0.75,
            risk_multiplier: Decimal::ONE,
            liquidity: Some(&snapshot),
        };
        let full = size_position(&base, &cfg);
        let halved = size_position(
            &SizingInputs { risk_multiplier: dec!(0.5), ..base.clone() },
            &cfg,
        );
        assert_eq!(full.size_usd, dec!(116.67));
        assert_eq!(halved.size_usd, dec!(58.33));
    }

    #[test]
    fn test_dca_budget_split() {
        let snapshot = liq(dec!(50000), dec!(2));
        let inputs = SizingInputs {
            bankroll_usd: dec!(100000),
            best_ask: dec!(0.40),
            lower_bound_wr: 0.70,
            point_wr: 0.75,
            risk_multiplier: Decimal::ONE,
            liquidity: Some(&snapshot),
        };
        let single = size_position(&inputs, &config());
        let budget = dca_budget(&single, 5);
        assert_eq!(budget.total_usd, dec!(500));
        assert_eq!(budget.first_slice_usd, dec!(100));
        assert_eq!(budget.num_slices, 5);
    }

    #[test]
    fn test_spec_scenario_target_holding_rebalance() {
        // B=$100, entries_done=2 of 5, cost=$40, shares=100, price=0.30:
        // V=$30, gap=$70, remaining=$60, cap=(60/3)*2=$40 -> order $40.
        let result = target_order_size(
            dec!(100),
            &[dec!(25), dec!(15)],
            &[dec!(0.50), dec!(0.30)],
            dec!(0.30),
            5,
            2,
            dec!(2.0),
            dec!(1),
        );
        // shares = 25/0.5 + 15/0.3 = 50 + 50 = 100
        assert_eq!(result.raw_gap, dec!(70));
        assert_eq!(result.remaining_budget, dec!(60));
        assert_eq!(result.per_entry_cap, dec!(40));
        assert_eq!(result.order_usd, dec!(40));
        assert!(result.completion.is_none());
    }

    #[test]
    fn test_target_reached() {
        // Holdings already worth the budget at the current price.
        let result = target_order_size(
            dec!(100),
            &[dec!(50)],
            &[dec!(0.25)],
            dec!(0.55),
            5,
            1,
            dec!(2.0),
            dec!(1),
        );
        assert_eq!(result.order_usd, Decimal::ZERO);
        assert_eq!(result.completion, Some(CompletionReason::TargetReached));
    }

    #[test]
    fn test_budget_exhausted() {
        let result = target_order_size(
            dec!(100),
            &[dec!(60), dec!(39.50)],
            &[dec!(0.50), dec!(0.50)],
            dec!(0.40),
            5,
            2,
            dec!(2.0),
            dec!(1),
        );
        assert_eq!(result.order_usd, Decimal::ZERO);
        assert_eq!(result.completion, Some(CompletionReason::BudgetExhausted));
    }
}
