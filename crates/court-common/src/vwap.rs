//! Cost-weighted average price helpers.
//!
//! One VWAP definition is shared by sizing, merge economics, and
//! settlement: `VWAP = total_cost / total_shares`. The merge gate and the
//! per-signal PnL formula both depend on these agreeing exactly.

use rust_decimal::Decimal;

/// VWAP from a sequence of `(price, shares)` fills.
///
/// Returns zero when there are no shares. Zero-priced fills contribute no
/// shares and no cost.
pub fn vwap(fills: &[(Decimal, Decimal)]) -> Decimal {
    let mut total_cost = Decimal::ZERO;
    let mut total_shares = Decimal::ZERO;
    for (price, shares) in fills {
        if *price <= Decimal::ZERO || *shares <= Decimal::ZERO {
            continue;
        }
        total_cost += *price * *shares;
        total_shares += *shares;
    }
    if total_shares <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    total_cost / total_shares
}

/// VWAP from parallel `(cost_usd, price)` pairs, as stored per signal.
///
/// Shares for each entry are `cost / price`; entries with a non-positive
/// price are counted as sunk cost with zero shares.
pub fn vwap_from_costs(costs: &[Decimal], prices: &[Decimal]) -> Decimal {
    let mut total_cost = Decimal::ZERO;
    let mut total_shares = Decimal::ZERO;
    for (cost, price) in costs.iter().zip(prices.iter()) {
        total_cost += *cost;
        if *price > Decimal::ZERO {
            total_shares += *cost / *price;
        }
    }
    if total_shares <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    total_cost / total_shares
}

/// Total shares implied by `(cost_usd, price)` pairs.
pub fn shares_from_costs(costs: &[Decimal], prices: &[Decimal]) -> Decimal {
    costs
        .iter()
        .zip(prices.iter())
        .filter(|(_, p)| **p > Decimal::ZERO)
        .map(|(c, p)| *c / *p)
        .sum()
}
