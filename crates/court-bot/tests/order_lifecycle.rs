//! Order-manager lifecycle: TTL reprice ladder, replace budget, and fill
//! detection, driven against the mock exchange.

mod common;

use chrono::{Duration, Utc};
use common::{seed_directional_job, MockMarket};
use court_common::OrderBookLevel;
use court_market::{OrderBook, OrderLifecycle, OrderState};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use court_bot::config::{BotConfig, ExecutionMode};
use court_bot::notify::Notifier;
use court_bot::order_manager::manage_orders;
use court_bot::store::{NewSignal, OrderStatus, Store};

fn live_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.mode = ExecutionMode::Live;
    config.orders.rate_limit_sleep_ms = 0;
    config
}

fn book_at(ask: Decimal) -> OrderBook {
    OrderBook::new(
        vec![OrderBookLevel::new(ask - dec!(0.02), dec!(1000))],
        vec![OrderBookLevel::new(ask, dec!(1000))],
    )
}

/// Insert a signal with a resting order placed `age` ago at `price`.
fn seed_resting_order(store: &Store, job_id: i64, price: Decimal, age: Duration) -> i64 {
    let signal_id = store
        .insert_signal(&NewSignal {
            job_id,
            event_slug: "nba-bos-lal-2026-01-15".into(),
            game_title: "Celtics vs. Lakers".into(),
            team: "LAL".into(),
            price,
            size_usd: dec!(100),
            token_id: "tok-lal".into(),
            condition_id: Some("0xc0nd".into()),
            signal_role: court_common::LegSide::Directional,
            dca_group_id: "dca-1".into(),
            dca_sequence: 1,
            bothside_group_id: None,
            expected_win_rate: 0.7,
            edge_pct: dec!(10),
            price_band: "0.40-0.45".into(),
            in_sweet_spot: true,
            liquidity_score: "high".into(),
            ask_depth_5c: None,
            spread_pct: None,
            balance_usd_at_trade: None,
            constraint_binding: "kelly".into(),
            order_status: OrderStatus::Pending,
        })
        .unwrap();
    store
        .mark_order_placed(signal_id, "ord-1", price, Utc::now() - age)
        .unwrap();
    store
        .log_order_event(
            signal_id,
            court_bot::store::OrderEventType::Placed,
            Some("ord-1"),
            Some(price),
            None,
            None,
        )
        .unwrap();
    signal_id
}

#[tokio::test]
async fn ttl_expired_order_is_repriced_below_new_ask() {
    let store = Store::open_in_memory().unwrap();
    let config = live_config();
    let notifier = Notifier::disabled();
    let job_id = seed_directional_job(&store, "nba-bos-lal-2026-01-15", Duration::hours(2));

    // Placed at 0.40 six minutes ago; ask has moved to 0.43.
    let signal_id = seed_resting_order(&store, job_id, dec!(0.40), Duration::minutes(6));
    let client = MockMarket::default().with_book("tok-lal", book_at(dec!(0.43)));
    client.set_resting_order(
        "ord-1",
        OrderState {
            order_id: "ord-1".into(),
            status: OrderLifecycle::Live,
            filled_shares: Decimal::ZERO,
            avg_price: None,
            fee_rate_bps: Decimal::ZERO,
            fee_usd: Decimal::ZERO,
        },
    );

    let summary = manage_orders(&store, &client, &config, &notifier).await.unwrap();
    assert_eq!(summary.replaced, 1);

    // New maker order one tick under the ask.
    let placements = client.placements();
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].1, dec!(0.42));
    assert_eq!(client.cancelled.lock().unwrap().len(), 1);

    let signal = store.get_signal(signal_id).unwrap();
    assert_eq!(signal.order_replace_count, 1);
    assert_eq!(signal.order_status, OrderStatus::Placed);
    assert_eq!(store.last_placed_price(signal_id).unwrap(), Some(dec!(0.42)));
}

#[tokio::test]
async fn young_order_is_kept() {
    let store = Store::open_in_memory().unwrap();
    let config = live_config();
    let notifier = Notifier::disabled();
    let job_id = seed_directional_job(&store, "nba-bos-lal-2026-01-15", Duration::hours(2));

    let _ = seed_resting_order(&store, job_id, dec!(0.40), Duration::minutes(2));
    let client = MockMarket::default().with_book("tok-lal", book_at(dec!(0.45)));
    client.set_resting_order(
        "ord-1",
        OrderState {
            order_id: "ord-1".into(),
            status: OrderLifecycle::Live,
            filled_shares: Decimal::ZERO,
            avg_price: None,
            fee_rate_bps: Decimal::ZERO,
            fee_usd: Decimal::ZERO,
        },
    );

    let summary = manage_orders(&store, &client, &config, &notifier).await.unwrap();
    assert_eq!(summary.kept, 1);
    assert!(client.placements().is_empty());
}

#[tokio::test]
async fn replace_budget_exhausted_expires_order() {
    let store = Store::open_in_memory().unwrap();
    let config = live_config();
    let notifier = Notifier::disabled();
    let job_id = seed_directional_job(&store, "nba-bos-lal-2026-01-15", Duration::hours(2));

    let signal_id = seed_resting_order(&store, job_id, dec!(0.40), Duration::minutes(20));
    // Burn the replace budget.
    for i in 0..3 {
        store
            .record_order_replacement(signal_id, &format!("ord-{}", i + 2), Utc::now() - Duration::minutes(6))
            .unwrap();
    }
    let client = MockMarket::default().with_book("tok-lal", book_at(dec!(0.45)));
    client.set_resting_order(
        "ord-4",
        OrderState {
            order_id: "ord-4".into(),
            status: OrderLifecycle::Live,
            filled_shares: Decimal::ZERO,
            avg_price: None,
            fee_rate_bps: Decimal::ZERO,
            fee_usd: Decimal::ZERO,
        },
    );

    let summary = manage_orders(&store, &client, &config, &notifier).await.unwrap();
    assert_eq!(summary.expired, 1);
    assert_eq!(store.get_signal(signal_id).unwrap().order_status, OrderStatus::Expired);
    // Cancelled on the exchange, no replacement placed.
    assert_eq!(client.cancelled.lock().unwrap().len(), 1);
    assert!(client.placements().is_empty());
}

#[tokio::test]
async fn filled_order_is_detected_and_recorded() {
    let store = Store::open_in_memory().unwrap();
    let config = live_config();
    let notifier = Notifier::disabled();
    let job_id = seed_directional_job(&store, "nba-bos-lal-2026-01-15", Duration::hours(2));

    let signal_id = seed_resting_order(&store, job_id, dec!(0.39), Duration::minutes(1));
    let client = MockMarket::default().with_book("tok-lal", book_at(dec!(0.40)));
    client.set_resting_order(
        "ord-1",
        OrderState {
            order_id: "ord-1".into(),
            status: OrderLifecycle::Filled,
            filled_shares: dec!(256.41),
            avg_price: Some(dec!(0.39)),
            fee_rate_bps: Decimal::ZERO,
            fee_usd: Decimal::ZERO,
        },
    );

    let summary = manage_orders(&store, &client, &config, &notifier).await.unwrap();
    assert_eq!(summary.filled, 1);

    let signal = store.get_signal(signal_id).unwrap();
    assert_eq!(signal.order_status, OrderStatus::Filled);
    assert_eq!(signal.fill_price, Some(dec!(0.39)));
}

#[tokio::test]
async fn paper_mode_order_manager_is_a_noop() {
    let store = Store::open_in_memory().unwrap();
    let mut config = live_config();
    config.mode = ExecutionMode::Paper;
    let notifier = Notifier::disabled();
    let client = MockMarket::default();

    let summary = manage_orders(&store, &client, &config, &notifier).await.unwrap();
    assert_eq!(summary.checked, 0);
}
