//! Circuit-breaker walk: loss streaks escalate the level, sizing and DCA
//! permissions follow, and snapshots carry state across ticks.

mod common;

use chrono::{Duration, Utc};
use common::seed_job_at;
use court_common::LegSide;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use court_bot::config::BotConfig;
use court_bot::risk::{evaluate_risk, evaluate_risk_or_degrade};
use court_bot::store::{NewSignal, OrderStatus, RiskLevel, Store};

fn seed_settlements(store: &Store, outcomes: &[(bool, Decimal)]) {
    let tipoff = Utc::now() + Duration::hours(2);
    let job_id = seed_job_at(store, "nba-bos-lal-2026-01-15", tipoff, LegSide::Directional);
    let existing = store.unsettled_signals().unwrap().len() as u32;
    for (i, (won, pnl)) in outcomes.iter().enumerate() {
        let signal_id = store
            .insert_signal(&NewSignal {
                job_id,
                event_slug: "nba-bos-lal-2026-01-15".into(),
                game_title: "Celtics vs. Lakers".into(),
                team: "LAL".into(),
                price: dec!(0.40),
                size_usd: dec!(20),
                token_id: "tok-lal".into(),
                condition_id: None,
                signal_role: LegSide::Directional,
                dca_group_id: "dca-1".into(),
                dca_sequence: existing + i as u32 + 1,
                bothside_group_id: None,
                expected_win_rate: 0.7,
                edge_pct: dec!(10),
                price_band: String::new(),
                in_sweet_spot: true,
                liquidity_score: "high".into(),
                ask_depth_5c: None,
                spread_pct: None,
                balance_usd_at_trade: None,
                constraint_binding: "kelly".into(),
                order_status: OrderStatus::Paper,
            })
            .unwrap();
        store
            .insert_result(
                signal_id,
                *won,
                *pnl,
                if *won { dec!(1) } else { dec!(0) },
                None,
                None,
                "box_score",
            )
            .unwrap();
    }
}

#[test]
fn green_until_losses_accumulate() {
    let store = Store::open_in_memory().unwrap();
    let config = BotConfig::default();
    let now = Utc::now();

    // -$15 on a $1000 bankroll: 1.5% daily loss = YELLOW (half of 3%).
    // Stay just under with two small losses and a win.
    seed_settlements(&store, &[(true, dec!(8)), (false, dec!(-5)), (false, dec!(-5))]);
    let verdict = evaluate_risk(&store, &config.risk, Some(dec!(1000)), now).unwrap();
    assert_eq!(verdict.level(), RiskLevel::Green);
    assert_eq!(verdict.sizing_multiplier(), Decimal::ONE);
    store.insert_risk_snapshot(&verdict.snapshot).unwrap();
}

#[test]
fn five_consecutive_losses_go_yellow() {
    let store = Store::open_in_memory().unwrap();
    let config = BotConfig::default();
    let now = Utc::now();

    // Five losses, small enough to stay under the daily-loss tiers on a
    // large bankroll - the streak alone trips YELLOW.
    seed_settlements(
        &store,
        &[
            (false, dec!(-1)),
            (false, dec!(-1)),
            (false, dec!(-1)),
            (false, dec!(-1)),
            (false, dec!(-1)),
        ],
    );
    let verdict = evaluate_risk(&store, &config.risk, Some(dec!(10000)), now).unwrap();
    assert_eq!(verdict.level(), RiskLevel::Yellow);
    assert_eq!(verdict.sizing_multiplier(), dec!(0.5));

    // YELLOW: new initial entries allowed, new DCA entries blocked.
    assert!(verdict.allows_new_positions());
    assert!(!verdict.allows_dca_entries(&config.risk));
}

#[test]
fn daily_loss_over_limit_goes_orange() {
    let store = Store::open_in_memory().unwrap();
    let config = BotConfig::default();
    let now = Utc::now();

    // -$35 on $1000 = 3.5% > 3% daily limit.
    seed_settlements(&store, &[(false, dec!(-35))]);
    let verdict = evaluate_risk(&store, &config.risk, Some(dec!(1000)), now).unwrap();
    assert_eq!(verdict.level(), RiskLevel::Orange);
    assert_eq!(verdict.sizing_multiplier(), Decimal::ZERO);
    assert!(!verdict.allows_new_positions());
    assert!(!verdict.allows_dca_entries(&config.risk));

    // Configured ORANGE-continues-DCA mode.
    let mut relaxed = config.risk.clone();
    relaxed.orange_allows_dca = true;
    assert!(verdict.allows_dca_entries(&relaxed));
}

#[test]
fn weekly_loss_over_limit_goes_red_and_sticks() {
    let store = Store::open_in_memory().unwrap();
    let config = BotConfig::default();
    let now = Utc::now();

    // -$60 on $1000 = 6% weekly > 5%: RED with a lockout.
    seed_settlements(&store, &[(false, dec!(-60))]);
    let verdict = evaluate_risk(&store, &config.risk, Some(dec!(1000)), now).unwrap();
    assert_eq!(verdict.level(), RiskLevel::Red);
    assert!(verdict.snapshot.lockout_until.is_some());
    store.insert_risk_snapshot(&verdict.snapshot).unwrap();

    // Next tick, even with improving metrics, RED holds without a manual
    // acknowledgement (the loss is still inside the weekly window here,
    // but the point is the floor: no skip past ORANGE).
    let verdict2 = evaluate_risk(&store, &config.risk, Some(dec!(1000)), now + Duration::hours(1)).unwrap();
    assert_eq!(verdict2.level(), RiskLevel::Red);
}

#[test]
fn snapshot_round_trip_carries_level_between_ticks() {
    let store = Store::open_in_memory().unwrap();
    let config = BotConfig::default();
    let now = Utc::now();

    seed_settlements(&store, &[(false, dec!(-35))]);
    let verdict = evaluate_risk(&store, &config.risk, Some(dec!(1000)), now).unwrap();
    assert_eq!(verdict.level(), RiskLevel::Orange);
    store.insert_risk_snapshot(&verdict.snapshot).unwrap();

    // The next evaluation sees the previous level and keeps level_since.
    let next = evaluate_risk(&store, &config.risk, Some(dec!(1000)), now + Duration::minutes(15)).unwrap();
    assert_eq!(next.previous_level, Some(RiskLevel::Orange));
    assert_eq!(next.snapshot.level_since, verdict.snapshot.level_since);
}

#[test]
fn degraded_mode_never_blocks_outright() {
    let store = Store::open_in_memory().unwrap();
    let config = BotConfig::default();
    // Balance absent and no history: full evaluation still succeeds, so
    // force the degraded path shape directly.
    let verdict = evaluate_risk_or_degrade(&store, &config.risk, None, Utc::now());
    // Either a clean GREEN or the degraded YELLOW sentinel - never a stop.
    assert!(verdict.allows_new_positions());
    assert!(verdict.sizing_multiplier() >= dec!(0.5));
}
