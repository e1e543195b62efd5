//! results queries and realized-PnL aggregates for the risk engine.

use chrono::Utc;
use rusqlite::{params, Row};
use rust_decimal::Decimal;

use super::models::TradeResult;
use super::{dec_str, get_decimal, get_ts, ts, Store, StoreResult};

/// Band-level outcome counts for the drift detector.
#[derive(Debug, Clone)]
pub struct BandOutcome {
    pub price_band: String,
    pub expected_win_rate: f64,
    pub wins: u32,
    pub total: u32,
}

impl Store {
    /// Record a settlement. The UNIQUE(signal_id) constraint makes
    /// double-settlement a hard error rather than a silent overwrite.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_result(
        &self,
        signal_id: i64,
        won: bool,
        pnl_usd: Decimal,
        settlement_price: Decimal,
        score_home: Option<u32>,
        score_away: Option<u32>,
        method: &str,
    ) -> StoreResult<i64> {
        self.conn().execute(
            "INSERT INTO results
               (signal_id, won, pnl_usd, settlement_price, score_home, score_away, method, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                signal_id,
                won,
                dec_str(pnl_usd),
                dec_str(settlement_price),
                score_home,
                score_away,
                method,
                ts(Utc::now()),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Realized PnL for one ET date (settled_at prefix match).
    pub fn realized_pnl_for_date(&self, date_prefix: &str) -> StoreResult<Decimal> {
        self.sum_pnl(
            "SELECT pnl_usd FROM results WHERE settled_at LIKE ?1 || '%'",
            params![date_prefix],
        )
    }

    /// Realized PnL over the trailing 7 days (inclusive of today).
    pub fn realized_pnl_since(&self, since_prefix: &str) -> StoreResult<Decimal> {
        self.sum_pnl(
            "SELECT pnl_usd FROM results WHERE settled_at >= ?1",
            params![since_prefix],
        )
    }

    /// Current consecutive-loss streak, newest settlement first.
    pub fn consecutive_losses(&self) -> StoreResult<u32> {
        let mut stmt = self
            .conn()
            .prepare("SELECT won FROM results ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, bool>(0))?;
        let mut streak = 0;
        for row in rows {
            if row? {
                break;
            }
            streak += 1;
        }
        Ok(streak)
    }

    /// The last `n` settlements, newest first.
    pub fn last_results(&self, n: usize) -> StoreResult<Vec<TradeResult>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM results ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![n as i64], result_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count of consecutive calendar days (ending most recently) whose
    /// realized PnL was positive. Used by YELLOW -> GREEN recovery.
    pub fn positive_pnl_day_streak(&self) -> StoreResult<u32> {
        let mut stmt = self.conn().prepare(
            "SELECT substr(settled_at, 1, 10) AS day, SUM(CAST(pnl_usd AS REAL)) AS pnl
             FROM results GROUP BY day ORDER BY day DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>("day")?, row.get::<_, f64>("pnl")?))
        })?;
        let mut streak = 0;
        for row in rows {
            let (_, pnl) = row?;
            if pnl > 0.0 {
                streak += 1;
            } else {
                break;
            }
        }
        Ok(streak)
    }

    /// Win/total counts per price band over the most recent `lookback`
    /// settlements, with the mean expected win rate recorded at entry.
    pub fn band_outcomes(&self, lookback: usize) -> StoreResult<Vec<BandOutcome>> {
        let mut stmt = self.conn().prepare(
            "SELECT s.price_band AS band,
                    AVG(s.expected_win_rate) AS expected,
                    SUM(r.won) AS wins,
                    COUNT(*) AS total
             FROM (SELECT * FROM results ORDER BY id DESC LIMIT ?1) r
             JOIN signals s ON s.id = r.signal_id
             WHERE s.price_band != ''
             GROUP BY s.price_band",
        )?;
        let rows = stmt.query_map(params![lookback as i64], |row| {
            Ok(BandOutcome {
                price_band: row.get("band")?,
                expected_win_rate: row.get("expected")?,
                wins: row.get("wins")?,
                total: row.get("total")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn sum_pnl(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Decimal> {
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

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<TradeResult> {
    Ok(TradeResult {
        id: row.get("id")?,
        signal_id: row.get("signal_id")?,
        won: row.get("won")?,
        pnl_usd: get_decimal(row, "pnl_usd")?,
        settlement_price: get_decimal(row, "settlement_price")?,
        score_home: row.get("score_home")?,
        score_away: row.get("score_away")?,
        settled_at: get_ts(row, "settled_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::signals::tests::{sample_signal, seed_job};
    use rust_decimal_macros::dec;

    fn store_with_results(outcomes: &[(bool, Decimal)]) -> Store {
        let store = Store::open_in_memory().unwrap();
        let job_id = seed_job(&store, "nba-bos-lal-2026-01-15");
        for (i, (won, pnl)) in outcomes.iter().enumerate() {
            let sig_id = store
                .insert_signal(&sample_signal(job_id, "nba-bos-lal-2026-01-15", i as u32 + 1))
                .unwrap();
            store
                .insert_result(sig_id, *won, *pnl, if *won { dec!(1) } else { dec!(0) }, None, None, "box_score")
                .unwrap();
        }
        store
    }

    #[test]
    fn test_double_settlement_rejected() {
        let store = Store::open_in_memory().unwrap();
        let job_id = seed_job(&store, "nba-bos-lal-2026-01-15");
        let sig_id = store
            .insert_signal(&sample_signal(job_id, "nba-bos-lal-2026-01-15", 1))
            .unwrap();
        store
            .insert_result(sig_id, true, dec!(10), dec!(1), None, None, "box_score")
            .unwrap();
        assert!(store
            .insert_result(sig_id, true, dec!(10), dec!(1), None, None, "box_score")
            .is_err());
    }

    #[test]
    fn test_consecutive_losses() {
        let store = store_with_results(&[
            (true, dec!(5)),
            (false, dec!(-10)),
            (false, dec!(-10)),
            (false, dec!(-10)),
        ]);
        assert_eq!(store.consecutive_losses().unwrap(), 3);
    }

    #[test]
    fn test_consecutive_losses_resets_on_win() {
        let store = store_with_results(&[(false, dec!(-10)), (true, dec!(5))]);
        assert_eq!(store.consecutive_losses().unwrap(), 0);
    }

    #[test]
    fn test_daily_pnl_sum() {
        let store = store_with_results(&[(true, dec!(12.50)), (false, dec!(-4.25))]);
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(store.realized_pnl_for_date(&today).unwrap(), dec!(8.25));
        assert_eq!(store.realized_pnl_for_date("1999-01-01").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_last_results_order() {
        let store = store_with_results(&[(true, dec!(1)), (false, dec!(-2)), (true, dec!(3))]);
        let last2 = store.last_results(2).unwrap();
        assert_eq!(last2.len(), 2);
        assert_eq!(last2[0].pnl_usd, dec!(3));
        assert_eq!(last2[1].pnl_usd, dec!(-2));
    }

    #[test]
    fn test_band_outcomes() {
        let store = store_with_results(&[(true, dec!(1)), (true, dec!(1)), (false, dec!(-1))]);
        let bands = store.band_outcomes(100).unwrap();
        // All sample signals carry band "0.40-0.45".
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].wins, 2);
        assert_eq!(bands[0].total, 3);
        assert!((bands[0].expected_win_rate - 0.7).abs() < 1e-9);
    }
}
