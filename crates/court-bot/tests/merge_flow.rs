//! Merge executor flow: simulation, per-signal credit conservation, and
//! the settlement arithmetic that follows.

mod common;

use chrono::Duration;
use common::{sample_moneyline, seed_job_at, MockMarket};
use court_common::LegSide;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use court_bot::calibration::{default_artifact, CalibrationCurve};
use court_bot::config::{BotConfig, ExecutionMode};
use court_bot::notify::Notifier;
use court_bot::scheduler::merge::process_merges;
use court_bot::scheduler::TickContext;
use court_bot::settlement::signal_pnl;
use court_bot::store::{JobStatus, MergeStatus, NewSignal, OrderStatus, Store};

fn paper_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.mode = ExecutionMode::Paper;
    config
}

/// Seed a fully-bought bothside pair: 100 shares at 0.42 directional,
/// 100 shares at 0.55 hedge. Returns (dir_job, hedge_job, dir_sig, hedge_sig).
fn seed_bothside_pair(store: &Store) -> (i64, i64, i64, i64) {
    let tipoff = chrono::Utc::now() + Duration::hours(2);
    let dir_id = seed_job_at(store, "nba-bos-lal-2026-01-15", tipoff, LegSide::Directional);
    let dir = store.get_job(dir_id).unwrap();
    let hedge_id = store
        .insert_hedge_job(&dir, chrono::Utc::now(), "bs-1")
        .unwrap()
        .unwrap();

    // Walk both jobs to executed through the legal path.
    for id in [dir_id, hedge_id] {
        store.claim_job(id).unwrap();
        store
            .update_job_status(id, JobStatus::Executed, None, None, false)
            .unwrap();
    }

    let base = |role: LegSide, job_id: i64, team: &str, price: Decimal, size: Decimal| NewSignal {
        job_id,
        event_slug: "nba-bos-lal-2026-01-15".into(),
        game_title: "Celtics vs. Lakers".into(),
        team: team.into(),
        price,
        size_usd: size,
        token_id: format!("tok-{}", team.to_lowercase()),
        condition_id: Some("0xc0nd".into()),
        signal_role: role,
        dca_group_id: format!("dca-{}", role),
        dca_sequence: 1,
        bothside_group_id: Some("bs-1".into()),
        expected_win_rate: 0.7,
        edge_pct: dec!(10),
        price_band: "0.40-0.45".into(),
        in_sweet_spot: true,
        liquidity_score: "high".into(),
        ask_depth_5c: None,
        spread_pct: None,
        balance_usd_at_trade: None,
        constraint_binding: "kelly".into(),
        order_status: OrderStatus::Paper,
    };

    let dir_sig = store
        .insert_signal(&base(LegSide::Directional, dir_id, "LAL", dec!(0.42), dec!(42)))
        .unwrap();
    let hedge_sig = store
        .insert_signal(&base(LegSide::Hedge, hedge_id, "BOS", dec!(0.55), dec!(55)))
        .unwrap();
    (dir_id, hedge_id, dir_sig, hedge_sig)
}

#[tokio::test]
async fn paper_merge_simulates_and_credits_proportionally() {
    let store = Store::open_in_memory().unwrap();
    let config = paper_config();
    let curve = CalibrationCurve::fit(&default_artifact(), 0.90).unwrap();
    let notifier = Notifier::disabled();
    let client = MockMarket::default().with_moneyline(sample_moneyline());
    let ctx = TickContext {
        store: &store,
        client: &client,
        config: &config,
        curve: &curve,
        notifier: &notifier,
    };

    let (dir_id, hedge_id, dir_sig, hedge_sig) = seed_bothside_pair(&store);
    let outcomes = process_merges(&ctx).await.unwrap();
    assert_eq!(outcomes.len(), 1);

    // Jobs carry the simulation status.
    assert_eq!(store.get_job(dir_id).unwrap().merge_status, MergeStatus::Simulated);
    assert_eq!(store.get_job(hedge_id).unwrap().merge_status, MergeStatus::Simulated);

    // 100 pairs at combined 0.97: gross recovery $3.00, split evenly
    // across the two equal legs.
    let dir = store.get_signal(dir_sig).unwrap();
    let hedge = store.get_signal(hedge_sig).unwrap();
    assert_eq!(dir.shares_merged, dec!(100));
    assert_eq!(hedge.shares_merged, dec!(100));
    assert_eq!(dir.merge_recovery_usd, dec!(1.50));
    assert_eq!(hedge.merge_recovery_usd, dec!(1.50));

    // Merge conservation: total credited = shares * (1 - combined_vwap).
    let total_credit = dir.merge_recovery_usd + hedge.merge_recovery_usd;
    assert!((total_credit - dec!(100) * (Decimal::ONE - dec!(0.97))).abs() < dec!(0.000001));

    // The operation row records the economics.
    let op = store.get_merge_operation(1).unwrap();
    assert_eq!(op.merge_amount, dec!(100));
    assert_eq!(op.combined_vwap, dec!(0.97));

    // Settlement after the merge: fully merged pair, winner irrelevant.
    let total = signal_pnl(&dir, true) + signal_pnl(&hedge, false);
    assert_eq!(total, dec!(-94.00));
}

#[tokio::test]
async fn merge_does_not_rerun_after_simulation() {
    let store = Store::open_in_memory().unwrap();
    let config = paper_config();
    let curve = CalibrationCurve::fit(&default_artifact(), 0.90).unwrap();
    let notifier = Notifier::disabled();
    let client = MockMarket::default();
    let ctx = TickContext {
        store: &store,
        client: &client,
        config: &config,
        curve: &curve,
        notifier: &notifier,
    };

    seed_bothside_pair(&store);
    assert_eq!(process_merges(&ctx).await.unwrap().len(), 1);
    // Second pass finds no candidates.
    assert!(process_merges(&ctx).await.unwrap().is_empty());
}

#[tokio::test]
async fn thin_margin_pair_is_skipped() {
    let store = Store::open_in_memory().unwrap();
    let config = paper_config();
    let curve = CalibrationCurve::fit(&default_artifact(), 0.90).unwrap();
    let notifier = Notifier::disabled();
    let client = MockMarket::default();
    let ctx = TickContext {
        store: &store,
        client: &client,
        config: &config,
        curve: &curve,
        notifier: &notifier,
    };

    let (dir_id, hedge_id, dir_sig, hedge_sig) = seed_bothside_pair(&store);
    // Re-price the hedge to make combined VWAP ~1.00.
    store
        .resize_signal_to_fill(hedge_sig, dec!(58), dec!(0.58))
        .unwrap();

    let outcomes = process_merges(&ctx).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(store.get_job(dir_id).unwrap().merge_status, MergeStatus::Skipped);
    assert_eq!(store.get_job(hedge_id).unwrap().merge_status, MergeStatus::Skipped);

    // No credits on a skip.
    assert_eq!(store.get_signal(dir_sig).unwrap().shares_merged, Decimal::ZERO);
}

#[tokio::test]
async fn unequal_legs_merge_min_and_leave_remainder() {
    let store = Store::open_in_memory().unwrap();
    let config = paper_config();
    let curve = CalibrationCurve::fit(&default_artifact(), 0.90).unwrap();
    let notifier = Notifier::disabled();
    let client = MockMarket::default();
    let ctx = TickContext {
        store: &store,
        client: &client,
        config: &config,
        curve: &curve,
        notifier: &notifier,
    };

    let (_, _, dir_sig, hedge_sig) = seed_bothside_pair(&store);
    // Shrink the hedge to 60 shares at 0.55 ($33).
    store
        .resize_signal_to_fill(hedge_sig, dec!(33), dec!(0.55))
        .unwrap();

    process_merges(&ctx).await.unwrap();

    let op = store.get_merge_operation(1).unwrap();
    assert_eq!(op.merge_amount, dec!(60));
    assert_eq!(op.remainder_shares, dec!(40));
    assert_eq!(op.remainder_side, Some(LegSide::Directional));

    // Directional merged 60 of its 100; 40 remain for settlement.
    let dir = store.get_signal(dir_sig).unwrap();
    assert_eq!(dir.shares_merged, dec!(60));
    assert_eq!(dir.remaining_shares(), dec!(40));
    let hedge = store.get_signal(hedge_sig).unwrap();
    assert_eq!(hedge.remaining_shares(), Decimal::ZERO);
}
