//! Maker-price helpers shared by the executors and the order manager.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Price floor: the book does not accept sub-cent limits.
const MIN_PRICE: Decimal = dec!(0.01);

/// One tick below the best ask: rests as a maker order and, as the last
/// dedup layer, cannot self-fill against an in-flight sibling order.
pub fn below_market_price(best_ask: Decimal) -> Decimal {
    (best_ask - dec!(0.01)).max(MIN_PRICE)
}

/// Clamp a price under a ceiling (hedge combined-VWAP constraint).
pub fn apply_price_ceiling(price: Decimal, ceiling: Decimal) -> Decimal {
    price.min(ceiling).max(MIN_PRICE)
}
