//! Order lifecycle manager.
//!
//! Runs on its own heartbeat (~2 min), live mode only. For every resting
//! maker order: detect fills, enforce the TTL with cancel-and-reprice one
//! tick under the new best ask, and give up after the replace budget or
//! tipoff. Hedge orders re-check merge economics before any reprice.
//!
//! The scheduler owns `trade_jobs.status`; this module only ever writes
//! the order columns of `signals`, so the two heartbeats never contend on
//! a row's same columns.

use chrono::{Duration, Utc};
use court_common::LegSide;
use court_market::{MarketClient, OrderLifecycle};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::notify::Notifier;
use crate::scheduler::pricing::below_market_price;
use crate::store::{OrderEventType, OrderStatus, Signal, Store, StoreError};
use crate::strategy::min_margin;

/// Counters for one order-manager tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderTickSummary {
    pub checked: usize,
    pub filled: usize,
    pub replaced: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub kept: usize,
    pub errors: usize,
}

/// What happened to one order this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderAction {
    Filled,
    Replaced,
    Expired,
    Cancelled,
    Kept,
    Error,
}

/// Check and manage all resting orders. Bounded work per tick.
pub async fn manage_orders(
    store: &Store,
    client: &dyn MarketClient,
    config: &BotConfig,
    notifier: &Notifier,
) -> Result<OrderTickSummary, StoreError> {
    let mut summary = OrderTickSummary::default();
    if !config.mode.is_live() {
        debug!(mode = %config.mode, "Order manager skipped");
        return Ok(summary);
    }
    if !config.orders.enabled {
        debug!("Order manager disabled");
        return Ok(summary);
    }

    let resting = store.active_placed_orders()?;
    if resting.is_empty() {
        return Ok(summary);
    }
    let batch: Vec<Signal> = resting
        .into_iter()
        .take(config.orders.check_batch_size)
        .collect();
    info!(checking = batch.len(), "Order manager tick");

    for signal in &batch {
        let action = check_single_order(store, client, config, notifier, signal).await;
        summary.checked += 1;
        match action {
            OrderAction::Filled => summary.filled += 1,
            OrderAction::Replaced => summary.replaced += 1,
            OrderAction::Expired => summary.expired += 1,
            OrderAction::Cancelled => summary.cancelled += 1,
            OrderAction::Kept => summary.kept += 1,
            OrderAction::Error => summary.errors += 1,
        }
        // Deliberate pacing between exchange calls.
        tokio::time::sleep(config.orders.rate_limit_sleep()).await;
    }

    if summary.filled + summary.replaced + summary.expired > 0 {
        info!(
            checked = summary.checked,
            filled = summary.filled,
            replaced = summary.replaced,
            expired = summary.expired,
            kept = summary.kept,
            errors = summary.errors,
            "Order manager tick complete"
        );
    }
    Ok(summary)
}

async fn check_single_order(
    store: &Store,
    client: &dyn MarketClient,
    config: &BotConfig,
    notifier: &Notifier,
    signal: &Signal,
) -> OrderAction {
    let Some(order_id) = signal.order_id.clone() else {
        warn!(signal_id = signal.id, "Placed signal without an order id");
        return OrderAction::Error;
    };
    let now = Utc::now();

    // 1. Exchange truth first.
    let state = match client.get_order(&order_id).await {
        Ok(state) => state,
        Err(e) => {
            warn!(signal_id = signal.id, order_id = %order_id, error = %e, "Order status fetch failed");
            return OrderAction::Error;
        }
    };

    match state.status {
        OrderLifecycle::Filled => {
            let fill_price = state.avg_price.unwrap_or(signal.price);
            if let Err(e) = store.transition_order_status(signal.id, OrderStatus::Filled, Some(fill_price)) {
                warn!(signal_id = signal.id, error = %e, "Fill transition failed");
                return OrderAction::Error;
            }
            let _ = store.update_signal_fee(signal.id, state.fee_rate_bps, state.fee_usd);
            let _ = store.log_order_event(
                signal.id,
                OrderEventType::Filled,
                Some(&order_id),
                Some(fill_price),
                None,
                None,
            );
            info!(signal_id = signal.id, order_id = %order_id, price = %fill_price, "Order filled");
            notifier
                .notify_order_filled(&signal.event_slug, &signal.team, fill_price, signal.id)
                .await;
            return OrderAction::Filled;
        }
        OrderLifecycle::PartiallyFilled => {
            // Record the partial once, keep the order working.
            if signal.order_status == OrderStatus::Placed {
                let _ = store.transition_order_status(signal.id, OrderStatus::PartiallyFilled, state.avg_price);
                let _ = store.log_order_event(
                    signal.id,
                    OrderEventType::PartiallyFilled,
                    Some(&order_id),
                    state.avg_price,
                    None,
                    None,
                );
            }
        }
        OrderLifecycle::Cancelled | OrderLifecycle::Expired => {
            return finalize_dead_order(store, signal, &order_id, &state.filled_shares, state.avg_price, OrderStatus::Cancelled);
        }
        OrderLifecycle::Live => {}
    }

    // 2. TTL: young orders rest.
    if let Some(placed_at) = signal.order_placed_at {
        if now - placed_at < Duration::minutes(config.orders.ttl_min) {
            return OrderAction::Kept;
        }
    }

    // 3. Replace budget and tipoff cutoff end the chase.
    let past_tipoff = match store.get_job(signal.job_id) {
        Ok(job) => now >= job.tipoff_utc,
        Err(e) => {
            warn!(signal_id = signal.id, error = %e, "Job lookup failed for tipoff check");
            false
        }
    };
    if signal.order_replace_count >= config.orders.max_replaces || past_tipoff {
        if client.cancel_order(&order_id).await.unwrap_or(false) {
            return finalize_dead_order(store, signal, &order_id, &state.filled_shares, state.avg_price, OrderStatus::Expired);
        }
        return OrderAction::Error;
    }

    // 4. Reprice one tick under the current best ask.
    let best_ask = match client.get_price(&signal.token_id).await {
        Ok(quote) if quote.best_ask > Decimal::ZERO => quote.best_ask,
        _ => return OrderAction::Kept,
    };
    let new_price = below_market_price(best_ask);
    let current_price = store
        .last_placed_price(signal.id)
        .ok()
        .flatten()
        .or(signal.order_original_price)
        .unwrap_or(signal.price);
    if (new_price - current_price).abs() < config.orders.min_price_move {
        return OrderAction::Kept;
    }

    // 5. Hedge legs re-check merge economics at the new price.
    if signal.signal_role == LegSide::Hedge && !hedge_reprice_ok(store, config, signal, new_price) {
        info!(
            signal_id = signal.id,
            new_price = %new_price,
            "Hedge reprice blocked by combined ceiling - expiring order"
        );
        if client.cancel_order(&order_id).await.unwrap_or(false) {
            return finalize_dead_order(store, signal, &order_id, &state.filled_shares, state.avg_price, OrderStatus::Expired);
        }
        return OrderAction::Error;
    }

    // 6. Cancel old, place new.
    match client
        .cancel_and_replace(&order_id, &signal.token_id, new_price, signal.size_usd)
        .await
    {
        Ok(new_order_id) => {
            if let Err(e) = store.record_order_replacement(signal.id, &new_order_id, now) {
                warn!(signal_id = signal.id, error = %e, "Replacement bookkeeping failed");
                return OrderAction::Error;
            }
            let _ = store.log_order_event(
                signal.id,
                OrderEventType::Cancelled,
                Some(&order_id),
                None,
                None,
                Some(best_ask),
            );
            let _ = store.log_order_event(
                signal.id,
                OrderEventType::Placed,
                Some(&new_order_id),
                Some(new_price),
                Some(current_price),
                Some(best_ask),
            );
            info!(
                signal_id = signal.id,
                old = %order_id,
                new = %new_order_id,
                price = %new_price,
                best_ask = %best_ask,
                replace = signal.order_replace_count + 1,
                of = config.orders.max_replaces,
                "Order replaced"
            );
            notifier
                .notify_order_replaced(
                    &signal.event_slug,
                    &signal.team,
                    current_price,
                    new_price,
                    signal.order_replace_count + 1,
                    config.orders.max_replaces,
                )
                .await;
            OrderAction::Replaced
        }
        Err(e) => {
            warn!(signal_id = signal.id, order_id = %order_id, error = %e, "Cancel-and-replace failed");
            OrderAction::Error
        }
    }
}

/// Close the books on an order that will not fill further. Partial fills
/// shrink the signal to the filled portion and settle as a fill.
fn finalize_dead_order(
    store: &Store,
    signal: &Signal,
    order_id: &str,
    filled_shares: &Decimal,
    avg_price: Option<Decimal>,
    final_status: OrderStatus,
) -> OrderAction {
    let event_type = match final_status {
        OrderStatus::Expired => OrderEventType::Expired,
        _ => OrderEventType::Cancelled,
    };
    if *filled_shares > Decimal::ZERO {
        let price = avg_price.unwrap_or(signal.price);
        let filled_cost = (*filled_shares * price).round_dp(2);
        if let Err(e) = store.resize_signal_to_fill(signal.id, filled_cost, price) {
            warn!(signal_id = signal.id, error = %e, "Partial-fill resize failed");
            return OrderAction::Error;
        }
        if let Err(e) = store.transition_order_status(signal.id, OrderStatus::Filled, Some(price)) {
            warn!(signal_id = signal.id, error = %e, "Partial-fill finalize failed");
            return OrderAction::Error;
        }
        let _ = store.log_order_event(signal.id, event_type, Some(order_id), Some(price), None, None);
        info!(
            signal_id = signal.id,
            order_id,
            filled = %filled_shares,
            "Order closed with partial fill"
        );
        return OrderAction::Filled;
    }

    if let Err(e) = store.transition_order_status(signal.id, final_status, None) {
        warn!(signal_id = signal.id, error = %e, "Dead-order transition failed");
        return OrderAction::Error;
    }
    let _ = store.log_order_event(signal.id, event_type, Some(order_id), None, None, None);
    info!(signal_id = signal.id, order_id, status = final_status.as_str(), "Order closed unfilled");
    match final_status {
        OrderStatus::Expired => OrderAction::Expired,
        _ => OrderAction::Cancelled,
    }
}

/// The merge-economics guard for a hedge reprice:
/// `dir_vwap + new_price <= 1 - min_margin`.
fn hedge_reprice_ok(store: &Store, config: &BotConfig, signal: &Signal, new_price: Decimal) -> bool {
    let Some(group) = signal.bothside_group_id.as_deref() else {
        return true;
    };
    let Ok(all) = store.signals_for_bothside_group(group) else {
        // Fail open: a bookkeeping hiccup should not strand the order.
        return true;
    };
    let dir: Vec<&Signal> = all
        .iter()
        .filter(|s| s.signal_role == LegSide::Directional && s.order_status.holds_inventory())
        .collect();
    if dir.is_empty() {
        return true;
    }
    let costs: Vec<Decimal> = dir.iter().map(|s| s.size_usd).collect();
    let prices: Vec<Decimal> = dir.iter().map(|s| s.effective_price()).collect();
    let dir_vwap = court_common::vwap_from_costs(&costs, &prices);
    let dir_shares = court_common::shares_from_costs(&costs, &prices);
    let margin = min_margin(dir_shares, &config.merge);
    dir_vwap + new_price <= Decimal::ONE - margin
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::store::signals::tests::{sample_signal, seed_job};
    use rust_decimal_macros::dec;

    fn live_config() -> BotConfig {
        let mut c = BotConfig::default();
        c.mode = ExecutionMode::Live;
        c.orders.rate_limit_sleep_ms = 0;
        c
    }

    #[test]
    fn test_hedge_reprice_guard() {
        let store = Store::open_in_memory().unwrap();
        let config = live_config();
        let job_id = seed_job(&store, "nba-bos-lal-2026-01-15");

        // Directional inventory: $42 at 0.42 (100 shares).
        let mut dir = sample_signal(job_id, "nba-bos-lal-2026-01-15", 1);
        dir.price = dec!(0.42);
        dir.size_usd = dec!(42);
        dir.bothside_group_id = Some("bs-1".into());
        dir.order_status = OrderStatus::Paper;
        store.insert_signal(&dir).unwrap();

        let mut hedge = sample_signal(job_id, "nba-bos-lal-2026-01-15", 2);
        hedge.signal_role = LegSide::Hedge;
        hedge.bothside_group_id = Some("bs-1".into());
        store.insert_signal(&hedge).unwrap();
        let hedge = store.get_signal(2).unwrap();

        // margin on 100 shares = max(0.10, 0.05)/100 = 0.001; ceiling 0.579.
        assert!(hedge_reprice_ok(&store, &config, &hedge, dec!(0.55)));
        assert!(!hedge_reprice_ok(&store, &config, &hedge, dec!(0.60)));
    }

    #[test]
    fn test_finalize_unfilled_expires() {
        let store = Store::open_in_memory().unwrap();
        let job_id = seed_job(&store, "nba-bos-lal-2026-01-15");
        let id = store
            .insert_signal(&sample_signal(job_id, "nba-bos-lal-2026-01-15", 1))
            .unwrap();
        store.mark_order_placed(id, "ord-1", dec!(0.39), Utc::now()).unwrap();
        let sig = store.get_signal(id).unwrap();

        let action = finalize_dead_order(&store, &sig, "ord-1", &Decimal::ZERO, None, OrderStatus::Expired);
        assert_eq!(action, OrderAction::Expired);
        assert_eq!(store.get_signal(id).unwrap().order_status, OrderStatus::Expired);
    }

    #[test]
    fn test_finalize_partial_fill_shrinks_signal() {
        let store = Store::open_in_memory().unwrap();
        let job_id = seed_job(&store, "nba-bos-lal-2026-01-15");
        let id = store
            .insert_signal(&sample_signal(job_id, "nba-bos-lal-2026-01-15", 1))
            .unwrap();
        store.mark_order_placed(id, "ord-1", dec!(0.39), Utc::now()).unwrap();
        let sig = store.get_signal(id).unwrap();

        // 60 of ~128 shares filled at 0.39 before the cancel.
        let action =
            finalize_dead_order(&store, &sig, "ord-1", &dec!(60), Some(dec!(0.39)), OrderStatus::Expired);
        assert_eq!(action, OrderAction::Filled);
        let after = store.get_signal(id).unwrap();
        assert_eq!(after.order_status, OrderStatus::Filled);
        assert_eq!(after.size_usd, dec!(23.40));
        assert_eq!(after.fill_price, Some(dec!(0.39)));
        assert_eq!(after.shares(), dec!(60));
    }
}
