//! risk_snapshots queries.
//!
//! The latest snapshot is the authoritative circuit-breaker state between
//! ticks; the engine reads it at the top of a tick and writes a fresh one
//! at the bottom.

use rusqlite::{params, OptionalExtension, Row};

use super::models::RiskSnapshot;
use super::{dec_str, dec_str_opt, get_decimal, get_decimal_opt, get_parsed, get_ts, get_ts_opt, ts, Store, StoreResult};

impl Store {
    pub fn insert_risk_snapshot(&self, snap: &RiskSnapshot) -> StoreResult<i64> {
        self.conn().execute(
            "INSERT INTO risk_snapshots
               (checked_at, level, level_since, sizing_multiplier, daily_pnl, weekly_pnl,
                consecutive_losses, max_drawdown_pct, drift_z_max, degraded, manual_ack,
                lockout_until, last_balance_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                ts(snap.checked_at),
                snap.level.as_str(),
                ts(snap.level_since),
                dec_str(snap.sizing_multiplier),
                dec_str(snap.daily_pnl),
                dec_str(snap.weekly_pnl),
                snap.consecutive_losses,
                dec_str(snap.max_drawdown_pct),
                snap.drift_z_max,
                snap.degraded,
                snap.manual_ack,
                snap.lockout_until.map(ts),
                dec_str_opt(snap.last_balance_usd),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn latest_risk_snapshot(&self) -> StoreResult<Option<RiskSnapshot>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT * FROM risk_snapshots ORDER BY id DESC LIMIT 1",
                [],
                snapshot_from_row,
            )
            .optional()?)
    }

    /// Operator acknowledgement for RED recovery. Marks the latest
    /// snapshot; the next tick's engine run sees the flag.
    pub fn acknowledge_red(&self) -> StoreResult<bool> {
        let changed = self.conn().execute(
            "UPDATE risk_snapshots SET manual_ack = 1
             WHERE id = (SELECT id FROM risk_snapshots ORDER BY id DESC LIMIT 1)
               AND level = 'RED'",
            [],
        )?;
        Ok(changed > 0)
    }
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<RiskSnapshot> {
    Ok(RiskSnapshot {
        id: row.get("id")?,
        checked_at: get_ts(row, "checked_at")?,
        level: get_parsed(row, "level")?,
        level_since: get_ts(row, "level_since")?,
        sizing_multiplier: get_decimal(row, "sizing_multiplier")?,
        daily_pnl: get_decimal(row, "daily_pnl")?,
        weekly_pnl: get_decimal(row, "weekly_pnl")?,
        consecutive_losses: row.get("consecutive_losses")?,
        max_drawdown_pct: get_decimal(row, "max_drawdown_pct")?,
        drift_z_max: row.get("drift_z_max")?,
        degraded: row.get("degraded")?,
        manual_ack: row.get("manual_ack")?,
        lockout_until: get_ts_opt(row, "lockout_until")?,
        last_balance_usd: get_decimal_opt(row, "last_balance_usd")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::RiskLevel;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot(level: RiskLevel) -> RiskSnapshot {
        let now = Utc::now();
        RiskSnapshot {
            id: 0,
            checked_at: now,
            level,
            level_since: now,
            sizing_multiplier: dec!(1),
            daily_pnl: dec!(0),
            weekly_pnl: dec!(0),
            consecutive_losses: 0,
            max_drawdown_pct: dec!(0),
            drift_z_max: 0.0,
            degraded: false,
            manual_ack: false,
            lockout_until: None,
            last_balance_usd: Some(dec!(1000)),
        }
    }

    #[test]
    fn test_latest_snapshot_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest_risk_snapshot().unwrap().is_none());

        store.insert_risk_snapshot(&snapshot(RiskLevel::Green)).unwrap();
        store.insert_risk_snapshot(&snapshot(RiskLevel::Yellow)).unwrap();

        let latest = store.latest_risk_snapshot().unwrap().unwrap();
        assert_eq!(latest.level, RiskLevel::Yellow);
        assert_eq!(latest.last_balance_usd, Some(dec!(1000)));
    }

    #[test]
    fn test_ack_only_applies_to_red() {
        let store = Store::open_in_memory().unwrap();
        store.insert_risk_snapshot(&snapshot(RiskLevel::Yellow)).unwrap();
        assert!(!store.acknowledge_red().unwrap());

        store.insert_risk_snapshot(&snapshot(RiskLevel::Red)).unwrap();
        assert!(store.acknowledge_red().unwrap());
        assert!(store.latest_risk_snapshot().unwrap().unwrap().manual_ack);
    }
}
