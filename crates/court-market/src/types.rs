//! Market-facing data types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A moneyline market for one NBA game: two outcomes, two tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneylineMarket {
    /// Event slug (`nba-{away}-{home}-YYYY-MM-DD`).
    pub event_slug: String,
    /// Human-readable title, e.g. "Celtics vs. Lakers".
    pub title: String,
    /// Condition ID used by the CTF redeem call.
    pub condition_id: String,
    /// Outcome names, index-aligned with `token_ids` and `prices`.
    pub outcomes: Vec<String>,
    /// Outcome token IDs.
    pub token_ids: Vec<String>,
    /// Last-trade or mid prices per outcome.
    pub prices: Vec<Decimal>,
    /// Whether the market is accepting orders.
    pub active: bool,
}

impl MoneylineMarket {
    /// Find `(index, price, token_id)` for an outcome by name.
    pub fn outcome(&self, name: &str) -> Option<(usize, Decimal, &str)> {
        let idx = self.outcomes.iter().position(|o| o == name)?;
        let price = *self.prices.get(idx)?;
        let token_id = self.token_ids.get(idx)?;
        Some((idx, price, token_id))
    }

    /// The outcome opposite to `name`, for hedge-leg selection.
    pub fn opposite_outcome(&self, name: &str) -> Option<(usize, Decimal, &str)> {
        let idx = self.outcomes.iter().position(|o| o != name)?;
        let price = *self.prices.get(idx)?;
        let token_id = self.token_ids.get(idx)?;
        Some((idx, price, token_id))
    }
}

/// Top-of-book quote for a single token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GamePrice {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub mid: Decimal,
}

/// Order status as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderLifecycle {
    Live,
    Filled,
    PartiallyFilled,
    Cancelled,
    Expired,
}

/// Fill state of a single order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderState {
    pub order_id: String,
    pub status: OrderLifecycle,
    /// Shares matched so far.
    pub filled_shares: Decimal,
    /// Average fill price across matched trades, if any.
    pub avg_price: Option<Decimal>,
    /// Maker fee rate in basis points.
    pub fee_rate_bps: Decimal,
    /// Fees accrued in USD.
    pub fee_usd: Decimal,
}

/// Receipt for an on-chain merge (redeem) transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReceipt {
    pub tx_hash: String,
    pub gas_cost_usd: Decimal,
}

/// Game status from the schedule feed.
///
/// The feed's numeric codes are 1 = scheduled, 2 = in progress, 3 = final;
/// postponements are flagged in the status text rather than the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
}

/// One game row from schedule discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameInfo {
    pub away_abbr: String,
    pub home_abbr: String,
    pub tipoff_utc: DateTime<Utc>,
    pub status: GameStatus,
    pub home_score: u32,
    pub away_score: u32,
}

impl GameInfo {
    /// Winner's abbreviation, only meaningful for final games.
    pub fn winner_abbr(&self) -> Option<&str> {
        if self.status != GameStatus::Final {
            return None;
        }
        if self.home_score == self.away_score {
            // NBA games cannot end tied; treat as not-yet-final data.
            return None;
        }
        if self.home_score > self.away_score {
            Some(&self.home_abbr)
        } else {
            Some(&self.away_abbr)
        }
    }
}
