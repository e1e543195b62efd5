//! Order book state and liquidity extraction.
//!
//! The sizer only ever needs a small summary of the book: best bid/ask,
//! spread, and how much USD is resting within a few cents of the best ask.

use court_common::OrderBookLevel;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Aggregated order book for one token.
///
/// Bids sorted descending, asks ascending; `normalize` enforces this on
/// construction so depth walks can early-exit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

impl OrderBook {
    pub fn new(mut bids: Vec<OrderBookLevel>, mut asks: Vec<OrderBookLevel>) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self { bids, asks }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// USD notional resting on the ask side within `threshold` of best ask.
    pub fn ask_depth_within(&self, threshold: Decimal) -> Decimal {
        let Some(best) = self.best_ask() else {
            return Decimal::ZERO;
        };
        let ceiling = best + threshold;
        let mut total = Decimal::ZERO;
        for level in &self.asks {
            if level.price > ceiling {
                break;
            }
            total += level.notional();
        }
        total
    }

    /// USD notional resting on the bid side within `threshold` of best bid.
    pub fn bid_depth_within(&self, threshold: Decimal) -> Decimal {
        let Some(best) = self.best_bid() else {
            return Decimal::ZERO;
        };
        let floor = best - threshold;
        let mut total = Decimal::ZERO;
        for level in &self.bids {
            if level.price < floor {
                break;
            }
            total += level.notional();
        }
        total
    }
}

/// Liquidity summary for a single token, as consumed by the sizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquiditySnapshot {
    pub token_id: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub midpoint: Decimal,
    /// `best_ask - best_bid`.
    pub spread: Decimal,
    /// Spread as a percentage of the midpoint.
    pub spread_pct: Decimal,
    /// USD available within best_ask + $0.05.
    pub ask_depth_5c: Decimal,
    /// USD available within best_ask + $0.10.
    pub ask_depth_10c: Decimal,
    /// USD available within best_bid - $0.05.
    pub bid_depth_5c: Decimal,
    pub ask_levels: usize,
    pub bid_levels: usize,
}

impl LiquiditySnapshot {
    /// Extract the summary from an order book. Returns `None` for an empty
    /// book — callers treat that the same as zero depth.
    pub fn extract(book: &OrderBook, token_id: &str) -> Option<Self> {
        if book.is_empty() {
            return None;
        }
        let best_ask = book.best_ask().unwrap_or(Decimal::ONE);
        let best_bid = book.best_bid().unwrap_or(Decimal::ZERO);
        let spread = best_ask - best_bid;
        let sum = best_ask + best_bid;
        let midpoint = if sum > Decimal::ZERO { sum / dec!(2) } else { dec!(0.5) };
        let spread_pct = if midpoint > Decimal::ZERO {
            spread / midpoint * dec!(100)
        } else {
            Decimal::ZERO
        };

        Some(Self {
            token_id: token_id.to_string(),
            best_bid,
            best_ask,
            midpoint,
            spread,
            spread_pct,
            ask_depth_5c: book.ask_depth_within(dec!(0.05)),
            ask_depth_10c: book.ask_depth_within(dec!(0.10)),
            bid_depth_5c: book.bid_depth_within(dec!(0.05)),
            ask_levels: book.asks.len(),
            bid_levels: book.bids.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: Decimal, size: Decimal) -> OrderBookLevel {
        OrderBookLevel::new(price, size)
    }

    fn sample_book() -> OrderBook {
        OrderBook::new(
            vec![
                level(dec!(0.38), dec!(200)),
                level(dec!(0.35), dec!(500)),
                level(dec!(0.30), dec!(1000)),
            ],
            vec![
                level(dec!(0.40), dec!(300)),
                level(dec!(0.43), dec!(400)),
                level(dec!(0.47), dec!(800)),
            ],
        )
    }

    #[test]
    fn test_best_prices() {
        let book = sample_book();
        assert_eq!(book.best_bid(), Some(dec!(0.38)));
        assert_eq!(book.best_ask(), Some(dec!(0.40)));
    }

    #[test]
    fn test_ask_depth_within_5c() {
        let book = sample_book();
        // 0.40*300 + 0.43*400 = 120 + 172 = 292; the 0.47 level is outside.
        assert_eq!(book.ask_depth_within(dec!(0.05)), dec!(292));
    }

    #[test]
    fn test_normalize_unsorted_input() {
        let book = OrderBook::new(
            vec![level(dec!(0.30), dec!(10)), level(dec!(0.38), dec!(10))],
            vec![level(dec!(0.47), dec!(10)), level(dec!(0.40), dec!(10))],
        );
        assert_eq!(book.best_bid(), Some(dec!(0.38)));
        assert_eq!(book.best_ask(), Some(dec!(0.40)));
    }

    #[test]
    fn test_extract_snapshot() {
        let book = sample_book();
        let snap = LiquiditySnapshot::extract(&book, "tok").unwrap();
        assert_eq!(snap.best_ask, dec!(0.40));
        assert_eq!(snap.best_bid, dec!(0.38));
        assert_eq!(snap.spread, dec!(0.02));
        assert_eq!(snap.ask_depth_5c, dec!(292));
        assert_eq!(snap.ask_levels, 3);
        // spread_pct = 0.02 / 0.39 * 100 ≈ 5.13%
        assert!(snap.spread_pct > dec!(5.1) && snap.spread_pct < dec!(5.2));
    }

    #[test]
    fn test_extract_empty_book() {
        let book = OrderBook::default();
        assert!(LiquiditySnapshot::extract(&book, "tok").is_none());
    }
}
