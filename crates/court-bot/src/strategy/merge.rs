//! Merge (redeem) economics: pure predicates and arithmetic.
//!
//! A matched YES/NO pair redeems for $1 of collateral, so a bothside
//! position profits from merging whenever the combined cost basis plus a
//! margin floor stays under $1. The margin floor makes small merges pay
//! for their own gas and minimum profit.

use court_common::LegSide;
use rust_decimal::Decimal;

use crate::config::MergeConfig;
use crate::store::Signal;

/// Share and VWAP picture of one bothside group.
#[derive(Debug, Clone)]
pub struct MergeEconomics {
    pub dir_shares: Decimal,
    pub hedge_shares: Decimal,
    /// `min(dir, hedge)` - the number of redeemable pairs.
    pub merge_amount: Decimal,
    pub remainder_shares: Decimal,
    pub remainder_side: Option<LegSide>,
    pub dir_vwap: Decimal,
    pub hedge_vwap: Decimal,
    /// `dir_vwap + hedge_vwap`; merging profits when this is under $1.
    pub combined_vwap: Decimal,
}

impl MergeEconomics {
    /// Compute from the two legs' signals, using remaining (unmerged)
    /// inventory only.
    pub fn from_signals(dir: &[Signal], hedge: &[Signal]) -> Self {
        let dir_shares = remaining_shares(dir);
        let hedge_shares = remaining_shares(hedge);
        let merge_amount = dir_shares.min(hedge_shares);
        let remainder = (dir_shares - hedge_shares).abs();
        let remainder_side = if dir_shares > hedge_shares {
            Some(LegSide::Directional)
        } else if hedge_shares > dir_shares {
            Some(LegSide::Hedge)
        } else {
            None
        };

        let dir_vwap = leg_vwap(dir);
        let hedge_vwap = leg_vwap(hedge);

        Self {
            dir_shares,
            hedge_shares,
            merge_amount,
            remainder_shares: remainder,
            remainder_side,
            dir_vwap,
            hedge_vwap,
            combined_vwap: dir_vwap + hedge_vwap,
        }
    }

    /// Collateral recovered per redeemed pair, net of cost basis.
    pub fn recovery_per_share(&self) -> Decimal {
        Decimal::ONE - self.combined_vwap
    }

    pub fn gross_profit(&self) -> Decimal {
        self.merge_amount * self.recovery_per_share()
    }
}

/// Redeemable pairs given each leg's filled shares.
pub fn mergeable_shares(dir_filled: Decimal, hedge_filled: Decimal) -> Decimal {
    dir_filled.min(hedge_filled)
}

/// Combined VWAP from the two legs' `(price, shares)` fills.
pub fn combined_vwap(dir_fills: &[(Decimal, Decimal)], hedge_fills: &[(Decimal, Decimal)]) -> Decimal {
    court_common::vwap(dir_fills) + court_common::vwap(hedge_fills)
}

/// Margin floor per share: the merge must clear its own costs.
///
/// `max(min_profit, est_gas) / max(mergeable, shares_floor)` keeps a tiny
/// merge from looking profitable on rounding alone.
pub fn min_margin(mergeable: Decimal, config: &MergeConfig) -> Decimal {
    let denom = mergeable.max(config.min_shares_floor);
    if denom <= Decimal::ZERO {
        return Decimal::ONE;
    }
    (config.min_profit_usd / denom).max(config.est_gas_usd / denom)
}

/// Outcome of the merge gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    Approved,
    Rejected(&'static str),
}

impl MergeDecision {
    pub fn approved(&self) -> bool {
        matches!(self, MergeDecision::Approved)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            MergeDecision::Approved => "ok",
            MergeDecision::Rejected(r) => r,
        }
    }
}

/// The merge gate: margin after the floor must be positive and the wallet
/// class must support on-chain redemption.
pub fn should_merge(
    economics: &MergeEconomics,
    config: &MergeConfig,
    est_gas_usd: Decimal,
    wallet_supported: bool,
) -> MergeDecision {
    if !config.enabled {
        return MergeDecision::Rejected("merge_disabled");
    }
    if !wallet_supported {
        return MergeDecision::Rejected("unsupported_wallet");
    }
    if economics.merge_amount <= Decimal::ZERO {
        return MergeDecision::Rejected("no_mergeable_shares");
    }

    // A live gas estimate replaces the configured one when available.
    let mut effective = config.clone();
    if est_gas_usd > Decimal::ZERO {
        effective.est_gas_usd = est_gas_usd;
    }
    let margin = min_margin(economics.merge_amount, &effective);

    if Decimal::ONE - economics.combined_vwap - margin <= Decimal::ZERO {
        return MergeDecision::Rejected("insufficient_margin");
    }
    MergeDecision::Approved
}

fn remaining_shares(signals: &[Signal]) -> Decimal {
    signals
        .iter()
        .filter(|s| s.order_status.holds_inventory())
        .map(Signal::remaining_shares)
        .sum()
}

fn leg_vwap(signals: &[Signal]) -> Decimal {
    let filled: Vec<&Signal> = signals
        .iter()
        .filter(|s| s.order_status.holds_inventory())
        .collect();
    let costs: Vec<Decimal> = filled.iter().map(|s| s.size_usd).collect();
    let prices: Vec<Decimal> = filled.iter().map(|s| s.effective_price()).collect();
    court_common::vwap_from_costs(&costs, &prices)
}
