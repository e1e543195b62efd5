//! signals and order_events queries.

use chrono::{DateTime, Utc};
use court_common::LegSide;
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::debug;

use super::models::{OrderEventType, OrderStatus, Signal};
use super::{
    dec_str, dec_str_opt, get_decimal, get_decimal_opt, get_parsed, get_ts, get_ts_opt, ts, Store,
    StoreError, StoreResult,
};

/// Fields for a new signal row.
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub job_id: i64,
    pub event_slug: String,
    pub game_title: String,
    pub team: String,
    pub price: Decimal,
    pub size_usd: Decimal,
    pub token_id: String,
    pub condition_id: Option<String>,
    pub signal_role: LegSide,
    pub dca_group_id: String,
    pub dca_sequence: u32,
    pub bothside_group_id: Option<String>,
    pub expected_win_rate: f64,
    pub edge_pct: Decimal,
    pub price_band: String,
    pub in_sweet_spot: bool,
    pub liquidity_score: String,
    pub ask_depth_5c: Option<Decimal>,
    pub spread_pct: Option<Decimal>,
    pub balance_usd_at_trade: Option<Decimal>,
    pub constraint_binding: String,
    pub order_status: OrderStatus,
}

impl Store {
    /// Layer-4 duplicate guard: does this job already have a live entry
    /// at this DCA sequence? Dead signals (failed placement, cancelled,
    /// expired) do not count - the retry path gets a fresh row.
    pub fn has_signal_for_sequence(&self, job_id: i64, dca_sequence: u32) -> StoreResult<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM signals
             WHERE job_id = ?1 AND dca_sequence = ?2
               AND order_status IN ('pending', 'placed', 'partially_filled', 'filled', 'paper')",
            params![job_id, dca_sequence],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Does the slug/leg already have any live-ish signal? Used by crash
    /// recovery to decide whether an order went out before the crash.
    pub fn has_signal_for_slug_and_role(&self, event_slug: &str, role: LegSide) -> StoreResult<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM signals
             WHERE event_slug = ?1 AND signal_role = ?2
               AND order_status IN ('placed', 'partially_filled', 'filled', 'paper')",
            params![event_slug, role.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_signal(&self, sig: &NewSignal) -> StoreResult<i64> {
        self.conn().execute(
            "INSERT INTO signals
               (job_id, event_slug, game_title, team, side, price, size_usd, token_id,
                condition_id, signal_role, dca_group_id, dca_sequence, bothside_group_id,
                expected_win_rate, edge_pct, price_band, in_sweet_spot, liquidity_score,
                ask_depth_5c, spread_pct, balance_usd_at_trade, constraint_binding,
                order_status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'BUY', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                sig.job_id,
                sig.event_slug,
                sig.game_title,
                sig.team,
                dec_str(sig.price),
                dec_str(sig.size_usd),
                sig.token_id,
                sig.condition_id,
                sig.signal_role.as_str(),
                sig.dca_group_id,
                sig.dca_sequence,
                sig.bothside_group_id,
                sig.expected_win_rate,
                dec_str(sig.edge_pct),
                sig.price_band,
                sig.in_sweet_spot,
                sig.liquidity_score,
                dec_str_opt(sig.ask_depth_5c),
                dec_str_opt(sig.spread_pct),
                dec_str_opt(sig.balance_usd_at_trade),
                sig.constraint_binding,
                sig.order_status.as_str(),
                ts(Utc::now()),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn get_signal(&self, id: i64) -> StoreResult<Signal> {
        self.conn()
            .query_row("SELECT * FROM signals WHERE id = ?1", params![id], signal_from_row)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("signal {}", id)))
    }

    /// All entries of a DCA group, in sequence order.
    pub fn signals_for_dca_group(&self, group_id: &str) -> StoreResult<Vec<Signal>> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM signals WHERE dca_group_id = ?1 ORDER BY dca_sequence ASC",
        )?;
        let rows = stmt.query_map(params![group_id], signal_from_row)?;
        collect(rows)
    }

    /// Both legs' signals for a bothside group.
    pub fn signals_for_bothside_group(&self, group_id: &str) -> StoreResult<Vec<Signal>> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM signals WHERE bothside_group_id = ?1 ORDER BY signal_role, dca_sequence",
        )?;
        let rows = stmt.query_map(params![group_id], signal_from_row)?;
        collect(rows)
    }

    /// Signals with a resting exchange order, oldest placement first.
    /// Partial fills stay in the working set until they finish or die.
    pub fn active_placed_orders(&self) -> StoreResult<Vec<Signal>> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM signals WHERE order_status IN ('placed', 'partially_filled')
             ORDER BY order_placed_at ASC NULLS FIRST",
        )?;
        let rows = stmt.query_map([], signal_from_row)?;
        collect(rows)
    }

    /// Shrink a signal to its actually-filled portion when its order dies
    /// with partial fills, so `shares = size / price` stays truthful.
    pub fn resize_signal_to_fill(
        &self,
        signal_id: i64,
        filled_cost_usd: Decimal,
        avg_price: Decimal,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE signals SET size_usd = ?1, fill_price = ?2 WHERE id = ?3",
            params![dec_str(filled_cost_usd), dec_str(avg_price), signal_id],
        )?;
        Ok(())
    }

    /// Record a successful placement on a pending signal.
    pub fn mark_order_placed(
        &self,
        signal_id: i64,
        order_id: &str,
        limit_price: Decimal,
        placed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.transition_order_status(signal_id, OrderStatus::Placed, None)?;
        self.conn().execute(
            "UPDATE signals
             SET order_id = ?1, order_placed_at = ?2, order_original_price = ?3
             WHERE id = ?4",
            params![order_id, ts(placed_at), dec_str(limit_price), signal_id],
        )?;
        Ok(())
    }

    /// Move a signal's order status, enforcing monotonicity.
    pub fn transition_order_status(
        &self,
        signal_id: i64,
        next: OrderStatus,
        fill_price: Option<Decimal>,
    ) -> StoreResult<()> {
        let current = self.get_signal(signal_id)?.order_status;
        if current != next && !current.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                entity: "signal",
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
                id: signal_id,
            });
        }
        self.conn().execute(
            "UPDATE signals
             SET order_status = ?1, fill_price = COALESCE(?2, fill_price)
             WHERE id = ?3",
            params![next.as_str(), dec_str_opt(fill_price), signal_id],
        )?;
        debug!(signal_id, from = current.as_str(), to = next.as_str(), "Order status moved");
        Ok(())
    }

    /// Swap in a replacement order after cancel-and-replace. The price
    /// history lives in order_events.
    pub fn record_order_replacement(
        &self,
        signal_id: i64,
        new_order_id: &str,
        replaced_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE signals
             SET order_id = ?1, order_placed_at = ?2,
                 order_replace_count = order_replace_count + 1
             WHERE id = ?3",
            params![new_order_id, ts(replaced_at), signal_id],
        )?;
        Ok(())
    }

    /// Back-fill the bothside group on a signal placed before its hedge
    /// job (and therefore the group id) existed.
    pub fn set_signal_bothside_group(&self, signal_id: i64, group_id: &str) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE signals SET bothside_group_id = ?1 WHERE id = ?2",
            params![group_id, signal_id],
        )?;
        Ok(())
    }

    pub fn update_signal_fee(
        &self,
        signal_id: i64,
        fee_rate_bps: Decimal,
        fee_usd: Decimal,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE signals SET fee_rate_bps = ?1, fee_usd = ?2 WHERE id = ?3",
            params![dec_str(fee_rate_bps), dec_str(fee_usd), signal_id],
        )?;
        Ok(())
    }

    /// Accumulate merged shares and recovery credit on one signal.
    pub fn credit_signal_merge(
        &self,
        signal_id: i64,
        shares_merged_add: Decimal,
        recovery_usd_add: Decimal,
    ) -> StoreResult<()> {
        let sig = self.get_signal(signal_id)?;
        let new_shares = sig.shares_merged + shares_merged_add;
        let new_recovery = sig.merge_recovery_usd + recovery_usd_add;
        self.conn().execute(
            "UPDATE signals SET shares_merged = ?1, merge_recovery_usd = ?2 WHERE id = ?3",
            params![dec_str(new_shares), dec_str(new_recovery), signal_id],
        )?;
        Ok(())
    }

    /// Signals holding inventory with no results row yet.
    pub fn unsettled_signals(&self) -> StoreResult<Vec<Signal>> {
        let mut stmt = self.conn().prepare(
            "SELECT s.* FROM signals s
             LEFT JOIN results r ON r.signal_id = s.id
             WHERE r.id IS NULL AND s.order_status IN ('filled', 'paper')
             ORDER BY s.id ASC",
        )?;
        let rows = stmt.query_map([], signal_from_row)?;
        collect(rows)
    }

    /// Append to the order lifecycle log.
    #[allow(clippy::too_many_arguments)]
    pub fn log_order_event(
        &self,
        signal_id: i64,
        event_type: OrderEventType,
        order_id: Option<&str>,
        price: Option<Decimal>,
        old_price: Option<Decimal>,
        best_ask: Option<Decimal>,
    ) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO order_events
               (signal_id, event_type, order_id, price, old_price, best_ask, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                signal_id,
                event_type.as_str(),
                order_id,
                dec_str_opt(price),
                dec_str_opt(old_price),
                dec_str_opt(best_ask),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Full lifecycle log of one signal's orders, oldest first.
    pub fn order_events(&self, signal_id: i64) -> StoreResult<Vec<super::models::OrderEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM order_events WHERE signal_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![signal_id], |row| {
            Ok(super::models::OrderEvent {
                id: row.get("id")?,
                signal_id: row.get("signal_id")?,
                event_type: row.get("event_type")?,
                order_id: row.get("order_id")?,
                price: get_decimal_opt(row, "price")?,
                old_price: get_decimal_opt(row, "old_price")?,
                best_ask: get_decimal_opt(row, "best_ask")?,
                created_at: get_ts(row, "created_at")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Price of the most recent `placed` event, i.e. the resting limit.
    pub fn last_placed_price(&self, signal_id: i64) -> StoreResult<Option<Decimal>> {
        let raw: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT price FROM order_events
                 WHERE signal_id = ?1 AND event_type = 'placed'
                 ORDER BY id DESC LIMIT 1",
                params![signal_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.flatten().and_then(|s| s.parse().ok()))
    }

    /// Live orders placed on a given ET date (preflight daily cap).
    pub fn live_order_count_for_date(&self, date_prefix: &str) -> StoreResult<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM signals
             WHERE created_at LIKE ?1 || '%'
               AND order_status IN ('placed', 'partially_filled', 'filled')",
            params![date_prefix],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// USD placed today across live-ish signals (preflight exposure cap).
    pub fn exposure_for_date(&self, date_prefix: &str) -> StoreResult<Decimal> {
        self.sum_sizes(
            "SELECT size_usd FROM signals
             WHERE created_at LIKE ?1 || '%'
               AND order_status IN ('placed', 'partially_filled', 'filled', 'paper')",
            params![date_prefix],
        )
    }

    /// Unspent remainder of every open DCA group's budget.
    pub fn pending_dca_remainder(&self) -> StoreResult<Decimal> {
        let mut stmt = self.conn().prepare(
            "SELECT j.dca_total_budget, j.dca_group_id FROM trade_jobs j
             WHERE j.status = 'dca_active' AND j.dca_total_budget IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut remainder = Decimal::ZERO;
        for row in rows {
            let (budget_raw, group_id) = row?;
            let Ok(budget) = budget_raw.parse::<Decimal>() else {
                continue;
            };
            let spent = match group_id {
                Some(gid) => self
                    .signals_for_dca_group(&gid)?
                    .iter()
                    .map(|s| s.size_usd)
                    .sum(),
                None => Decimal::ZERO,
            };
            remainder += (budget - spent).max(Decimal::ZERO);
        }
        Ok(remainder)
    }

    /// Cost basis committed to one game across both legs.
    pub fn game_exposure(&self, event_slug: &str) -> StoreResult<Decimal> {
        self.sum_sizes(
            "SELECT size_usd FROM signals
             WHERE event_slug = ?1
               AND order_status IN ('placed', 'partially_filled', 'filled', 'paper')",
            params![event_slug],
        )
    }

    /// Cost basis of all unsettled inventory.
    pub fn open_exposure(&self) -> StoreResult<Decimal> {
        self.sum_sizes(
            "SELECT s.size_usd FROM signals s
             LEFT JOIN results r ON r.signal_id = s.id
             WHERE r.id IS NULL
               AND s.order_status IN ('placed', 'partially_filled', 'filled', 'paper')",
            params![],
        )
    }

    fn sum_sizes(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Decimal> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut total = Decimal::ZERO;
        for row in rows {
            if let Ok(v) = row?.parse::<Decimal>() {
                total += v;
            }
        }
        Ok(total)
    }
}

fn collect(rows: impl Iterator<Item = rusqlite::Result<Signal>>) -> StoreResult<Vec<Signal>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn signal_from_row(row: &Row<'_>) -> rusqlite::Result<Signal> {
    Ok(Signal {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        event_slug: row.get("event_slug")?,
        game_title: row.get("game_title")?,
        team: row.get("team")?,
        price: get_decimal(row, "price")?,
        size_usd: get_decimal(row, "size_usd")?,
        token_id: row.get("token_id")?,
        condition_id: row.get("condition_id")?,
        signal_role: get_parsed(row, "signal_role")?,
        dca_group_id: row.get("dca_group_id")?,
        dca_sequence: row.get("dca_sequence")?,
        bothside_group_id: row.get("bothside_group_id")?,
        expected_win_rate: row.get("expected_win_rate")?,
        edge_pct: get_decimal(row, "edge_pct")?,
        price_band: row.get("price_band")?,
        in_sweet_spot: row.get("in_sweet_spot")?,
        liquidity_score: row.get("liquidity_score")?,
        constraint_binding: row.get("constraint_binding")?,
        order_id: row.get("order_id")?,
        order_status: get_parsed(row, "order_status")?,
        fill_price: get_decimal_opt(row, "fill_price")?,
        order_placed_at: get_ts_opt(row, "order_placed_at")?,
        order_original_price: get_decimal_opt(row, "order_original_price")?,
        order_replace_count: row.get("order_replace_count")?,
        fee_rate_bps: get_decimal(row, "fee_rate_bps")?,
        fee_usd: get_decimal(row, "fee_usd")?,
        shares_merged: get_decimal(row, "shares_merged")?,
        merge_recovery_usd: get_decimal(row, "merge_recovery_usd")?,
        created_at: get_ts(row, "created_at")?,
    })
}
