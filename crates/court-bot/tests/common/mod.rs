//! Shared test fixtures: an in-memory market client and store seeding.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use court_common::{LegSide, OrderBookLevel};
use court_market::{
    GamePrice, MarketClient, MarketError, MergeReceipt, MoneylineMarket, OrderBook, OrderLifecycle,
    OrderState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use court_bot::store::{NewJob, Store};

/// Scriptable market client for executor tests.
pub struct MockMarket {
    pub moneyline: Mutex<Option<MoneylineMarket>>,
    pub books: Mutex<HashMap<String, OrderBook>>,
    /// Order states returned by `get_order`, keyed by order id.
    pub orders: Mutex<HashMap<String, OrderState>>,
    /// Every placement: (token_id, price, size).
    pub placed: Mutex<Vec<(String, Decimal, Decimal)>>,
    pub cancelled: Mutex<Vec<String>>,
    pub balance: Decimal,
    next_order: AtomicU64,
}

impl Default for MockMarket {
    fn default() -> Self {
        Self {
            moneyline: Mutex::new(None),
            books: Mutex::new(HashMap::new()),
            orders: Mutex::new(HashMap::new()),
            placed: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            balance: dec!(1000),
            next_order: AtomicU64::new(1),
        }
    }
}

impl MockMarket {
    pub fn with_moneyline(self, market: MoneylineMarket) -> Self {
        *self.moneyline.lock().unwrap() = Some(market);
        self
    }

    pub fn with_book(self, token_id: &str, book: OrderBook) -> Self {
        self.books.lock().unwrap().insert(token_id.to_string(), book);
        self
    }

    pub fn set_resting_order(&self, order_id: &str, state: OrderState) {
        self.orders.lock().unwrap().insert(order_id.to_string(), state);
    }

    pub fn placements(&self) -> Vec<(String, Decimal, Decimal)> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketClient for MockMarket {
    async fn get_moneyline(
        &self,
        _away: &str,
        _home: &str,
        _date: &str,
    ) -> Result<Option<MoneylineMarket>, MarketError> {
        Ok(self.moneyline.lock().unwrap().clone())
    }

    async fn get_price(&self, token_id: &str) -> Result<GamePrice, MarketError> {
        let books = self.books.lock().unwrap();
        let book = books
            .get(token_id)
            .ok_or_else(|| MarketError::NotFound(token_id.to_string()))?;
        let best_bid = book.best_bid().unwrap_or(Decimal::ZERO);
        let best_ask = book.best_ask().unwrap_or(Decimal::ONE);
        Ok(GamePrice {
            best_bid,
            best_ask,
            mid: (best_bid + best_ask) / dec!(2),
        })
    }

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, MarketError> {
        Ok(self
            .books
            .lock()
            .unwrap()
            .get(token_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn place_limit_buy(
        &self,
        token_id: &str,
        price: Decimal,
        size_usd: Decimal,
    ) -> Result<String, MarketError> {
        let id = format!("ord-{}", self.next_order.fetch_add(1, Ordering::SeqCst));
        self.placed
            .lock()
            .unwrap()
            .push((token_id.to_string(), price, size_usd));
        self.orders.lock().unwrap().insert(
            id.clone(),
            OrderState {
                order_id: id.clone(),
                status: OrderLifecycle::Live,
                filled_shares: Decimal::ZERO,
                avg_price: None,
                fee_rate_bps: Decimal::ZERO,
                fee_usd: Decimal::ZERO,
            },
        );
        Ok(id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, MarketError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(true)
    }

    async fn cancel_and_replace(
        &self,
        order_id: &str,
        token_id: &str,
        new_price: Decimal,
        size_usd: Decimal,
    ) -> Result<String, MarketError> {
        self.cancel_order(order_id).await?;
        self.place_limit_buy(token_id, new_price, size_usd).await
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderState, MarketError> {
        self.orders
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| MarketError::NotFound(order_id.to_string()))
    }

    async fn get_balance(&self) -> Result<Decimal, MarketError> {
        Ok(self.balance)
    }

    async fn merge_positions(
        &self,
        _condition_id: &str,
        _shares: Decimal,
    ) -> Result<MergeReceipt, MarketError> {
        Ok(MergeReceipt {
            tx_hash: "0xtest".into(),
            gas_cost_usd: dec!(0.04),
        })
    }

    async fn estimate_merge_gas_usd(
        &self,
        _condition_id: &str,
        _shares: Decimal,
    ) -> Result<Decimal, MarketError> {
        Ok(dec!(0.05))
    }
}

/// A moneyline where the 0.38 underdog is the calibrated edge.
pub fn sample_moneyline() -> MoneylineMarket {
    MoneylineMarket {
        event_slug: "nba-bos-lal-2026-01-15".into(),
        title: "Celtics vs. Lakers".into(),
        condition_id: "0xc0nd".into(),
        outcomes: vec!["BOS".into(), "LAL".into()],
        token_ids: vec!["tok-bos".into(), "tok-lal".into()],
        prices: vec![dec!(0.62), dec!(0.38)],
        active: true,
    }
}

/// A deep, tight book around a 0.38/0.40 market.
pub fn deep_book() -> OrderBook {
    OrderBook::new(
        vec![
            OrderBookLevel::new(dec!(0.38), dec!(2000)),
            OrderBookLevel::new(dec!(0.36), dec!(3000)),
        ],
        vec![
            OrderBookLevel::new(dec!(0.40), dec!(2000)),
            OrderBookLevel::new(dec!(0.43), dec!(3000)),
        ],
    )
}

/// Insert a pending directional job whose window is open now.
pub fn seed_directional_job(store: &Store, slug: &str, tipoff_in: Duration) -> i64 {
    let tipoff = Utc::now() + tipoff_in;
    seed_job_at(store, slug, tipoff, LegSide::Directional)
}

pub fn seed_job_at(store: &Store, slug: &str, tipoff: DateTime<Utc>, leg: LegSide) -> i64 {
    store
        .upsert_trade_job(&NewJob {
            game_date: "2026-01-15".into(),
            event_slug: slug.into(),
            home_team: "LAL".into(),
            away_team: "BOS".into(),
            tipoff_utc: tipoff,
            execute_after: tipoff - Duration::hours(8),
            execute_before: tipoff,
            leg_side: leg,
        })
        .unwrap();
    store
        .jobs_for_date("2026-01-15")
        .unwrap()
        .into_iter()
        .find(|j| j.event_slug == slug && j.leg_side == leg)
        .map(|j| j.id)
        .expect("job just inserted")
}
