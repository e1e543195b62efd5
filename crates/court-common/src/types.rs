//! Core shared types.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side. The engine only ever buys outcome tokens; SELL exists for
/// completeness of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Which leg of a game a job or signal belongs to.
///
/// The directional leg is the favored side of the game; the hedge leg is
/// the opposite side, acquired so matched pairs can later be redeemed back
/// to collateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSide {
    Directional,
    Hedge,
}

impl LegSide {
    pub fn opposite(&self) -> Self {
        match self {
            LegSide::Directional => LegSide::Hedge,
            LegSide::Hedge => LegSide::Directional,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegSide::Directional => "directional",
            LegSide::Hedge => "hedge",
        }
    }
}

impl std::fmt::Display for LegSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LegSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directional" => Ok(LegSide::Directional),
            "hedge" => Ok(LegSide::Hedge),
            _ => Err(format!("Unknown leg side: {}", s)),
        }
    }
}

/// A single level in an order book (price + quantity in shares).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    /// Price in USDC (0.00 to 1.00 for a binary outcome token).
    pub price: Decimal,
    /// Quantity available at this price, in shares.
    pub size: Decimal,
}

impl OrderBookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// USD notional at this level.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_leg_side_opposite() {
        assert_eq!(LegSide::Directional.opposite(), LegSide::Hedge);
        assert_eq!(LegSide::Hedge.opposite(), LegSide::Directional);
    }

    #[test]
    fn test_leg_side_round_trip() {
        for side in [LegSide::Directional, LegSide::Hedge] {
            assert_eq!(side.as_str().parse::<LegSide>().unwrap(), side);
        }
    }

    #[test]
    fn test_order_book_level_notional() {
        let level = OrderBookLevel::new(dec!(0.45), dec!(100));
        assert_eq!(level.notional(), dec!(45));
    }
}
