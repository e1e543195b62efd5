//! Per-signal PnL.
//!
//! One formula settles everything - single entries, DCA groups, bothside
//! pairs, partially merged positions:
//!
//! `pnl = remaining_shares * settlement_price + merge_recovery_usd - cost - fees`
//!
//! where `remaining_shares = filled_shares - shares_merged` and `cost` is
//! the signal's full fill cost. Merge recovery was credited per signal at
//! merge time, so no group context is needed here.

use rust_decimal::Decimal;

use crate::store::Signal;

/// Settlement price of a binary outcome: $1 for the winner, $0 otherwise.
pub fn settlement_price(won: bool) -> Decimal {
    if won {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

/// The uniform per-signal settlement formula.
pub fn signal_pnl(signal: &Signal, won: bool) -> Decimal {
    let price = signal.effective_price();
    if price <= Decimal::ZERO {
        // Degenerate entry: the stake is simply lost.
        return signal.merge_recovery_usd - signal.size_usd - signal.fee_usd;
    }
    let remaining = signal.remaining_shares();
    remaining * settlement_price(won) + signal.merge_recovery_usd - signal.size_usd - signal.fee_usd
}
