//! The abstract market capability set.
//!
//! Executors and the order manager talk to this trait only; the live CLOB
//! client, the CTF merger, and every test mock implement it. Errors carry
//! a transient/permanent split that the scheduler maps to retry-next-tick
//! versus fail-now.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::orderbook::OrderBook;
use crate::types::{GamePrice, MergeReceipt, MoneylineMarket, OrderState};

/// Errors surfaced by market operations.
#[derive(Debug, Error)]
pub enum MarketError {
    /// Timeouts, 5xx, connection resets, chain reorgs. Retry next tick.
    #[error("transient market error: {0}")]
    Transient(String),

    /// Validation failures, insufficient balance, closed markets. Do not retry.
    #[error("permanent market error: {0}")]
    Permanent(String),

    /// The requested entity does not exist (market, order, token).
    #[error("not found: {0}")]
    NotFound(String),
}

impl MarketError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MarketError::Transient(_))
    }

    /// Classify a reqwest failure: network/timeout/5xx are transient,
    /// everything else permanent.
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return MarketError::Transient(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_server_error() {
                return MarketError::Transient(err.to_string());
            }
        }
        MarketError::Permanent(err.to_string())
    }
}

/// Abstract market client: price, book, order lifecycle, redeem.
#[async_trait]
pub trait MarketClient: Send + Sync {
    /// Look up the moneyline market for a game by teams and ET date.
    async fn get_moneyline(
        &self,
        away_abbr: &str,
        home_abbr: &str,
        game_date: &str,
    ) -> Result<Option<MoneylineMarket>, MarketError>;

    /// Top-of-book quote for a token.
    async fn get_price(&self, token_id: &str) -> Result<GamePrice, MarketError>;

    /// Full aggregated order book for a token.
    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, MarketError>;

    /// Place a maker limit buy. `price` must be below the current best ask;
    /// implementations reject crossing orders.
    async fn place_limit_buy(
        &self,
        token_id: &str,
        price: Decimal,
        size_usd: Decimal,
    ) -> Result<String, MarketError>;

    /// Cancel an open order. Returns whether the exchange acknowledged.
    async fn cancel_order(&self, order_id: &str) -> Result<bool, MarketError>;

    /// Cancel an open order and place a replacement in one step.
    /// Returns the new order id.
    async fn cancel_and_replace(
        &self,
        order_id: &str,
        token_id: &str,
        new_price: Decimal,
        size_usd: Decimal,
    ) -> Result<String, MarketError>;

    /// Fetch fill state for an order.
    async fn get_order(&self, order_id: &str) -> Result<OrderState, MarketError>;

    /// USDC balance of the trading wallet.
    async fn get_balance(&self) -> Result<Decimal, MarketError>;

    /// Redeem `shares` matched YES/NO pairs back to collateral.
    async fn merge_positions(
        &self,
        condition_id: &str,
        shares: Decimal,
    ) -> Result<MergeReceipt, MarketError>;

    /// Estimated USD cost of a merge transaction.
    async fn estimate_merge_gas_usd(
        &self,
        condition_id: &str,
        shares: Decimal,
    ) -> Result<Decimal, MarketError>;
}
