//! trade_jobs queries.

use chrono::{DateTime, Utc};
use court_common::LegSide;
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::models::{JobStatus, MergeStatus, TradeJob};
use super::{dec_str_opt, get_decimal_opt, get_parsed, get_ts, ts, Store, StoreError, StoreResult};

/// Fields for a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub game_date: String,
    pub event_slug: String,
    pub home_team: String,
    pub away_team: String,
    pub tipoff_utc: DateTime<Utc>,
    pub execute_after: DateTime<Utc>,
    pub execute_before: DateTime<Utc>,
    pub leg_side: LegSide,
}

/// One bothside pair that may be ready to merge.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub bothside_group_id: String,
    pub dir_job_id: i64,
    pub hedge_job_id: i64,
    pub dir_status: JobStatus,
    pub hedge_status: JobStatus,
    pub execute_before: DateTime<Utc>,
}

/// Per-date job counts for the tick summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobSummary {
    pub pending: u32,
    pub executing: u32,
    pub dca_active: u32,
    pub executed: u32,
    pub skipped: u32,
    pub failed: u32,
    pub expired: u32,
}

impl Store {
    /// Insert a job if its `(event_slug, leg_side)` key is new.
    /// Returns whether a row was inserted (layer 3 of the dedup guards).
    pub fn upsert_trade_job(&self, job: &NewJob) -> StoreResult<bool> {
        let now = ts(Utc::now());
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO trade_jobs
               (game_date, event_slug, home_team, away_team, tipoff_utc,
                execute_after, execute_before, leg_side, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?9)",
            params![
                job.game_date,
                job.event_slug,
                job.home_team,
                job.away_team,
                ts(job.tipoff_utc),
                ts(job.execute_after),
                ts(job.execute_before),
                job.leg_side.as_str(),
                now,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Insert the hedge-side job for a directional, linking the pair.
    /// Returns the hedge job id, or None when it already exists.
    pub fn insert_hedge_job(
        &self,
        directional: &TradeJob,
        execute_after: DateTime<Utc>,
        bothside_group_id: &str,
    ) -> StoreResult<Option<i64>> {
        let now = ts(Utc::now());
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO trade_jobs
               (game_date, event_slug, home_team, away_team, tipoff_utc,
                execute_after, execute_before, leg_side, status,
                paired_job_id, bothside_group_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'hedge', 'pending', ?8, ?9, ?10, ?10)",
            params![
                directional.game_date,
                directional.event_slug,
                directional.home_team,
                directional.away_team,
                ts(directional.tipoff_utc),
                ts(execute_after),
                ts(directional.execute_before),
                directional.id,
                bothside_group_id,
                now,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let id = self.conn().last_insert_rowid();
        // Back-link the directional to its pair.
        self.conn().execute(
            "UPDATE trade_jobs SET paired_job_id = ?1, bothside_group_id = ?2, updated_at = ?3
             WHERE id = ?4",
            params![id, bothside_group_id, now, directional.id],
        )?;
        Ok(Some(id))
    }

    pub fn get_job(&self, id: i64) -> StoreResult<TradeJob> {
        self.conn()
            .query_row("SELECT * FROM trade_jobs WHERE id = ?1", params![id], job_from_row)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("trade_job {}", id)))
    }

    /// Atomic claim: `pending -> executing` via row-level CAS. Exactly one
    /// of two racing ticks sees `true` here.
    pub fn claim_job(&self, id: i64) -> StoreResult<bool> {
        let changed = self.conn().execute(
            "UPDATE trade_jobs SET status = 'executing', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![ts(Utc::now()), id],
        )?;
        Ok(changed == 1)
    }

    /// Transition a job's status, enforcing the state machine.
    pub fn update_job_status(
        &self,
        id: i64,
        next: JobStatus,
        error_message: Option<&str>,
        signal_id: Option<i64>,
        increment_retry: bool,
    ) -> StoreResult<()> {
        let current = self.get_job(id)?.status;
        if current != next && !current.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                entity: "trade_job",
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
                id,
            });
        }
        let retry_add = i64::from(increment_retry);
        self.conn().execute(
            "UPDATE trade_jobs
             SET status = ?1,
                 error_message = COALESCE(?2, error_message),
                 signal_id = COALESCE(?3, signal_id),
                 retry_count = retry_count + ?4,
                 updated_at = ?5
             WHERE id = ?6",
            params![next.as_str(), error_message, signal_id, retry_add, ts(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Record DCA bookkeeping on a job.
    #[allow(clippy::too_many_arguments)]
    pub fn update_dca_job(
        &self,
        id: i64,
        entries_count: u32,
        max_entries: u32,
        group_id: &str,
        total_budget: Option<Decimal>,
        slice_size: Option<Decimal>,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE trade_jobs
             SET dca_entries_count = ?1, dca_max_entries = ?2, dca_group_id = ?3,
                 dca_total_budget = COALESCE(?4, dca_total_budget),
                 dca_slice_size = COALESCE(?5, dca_slice_size),
                 updated_at = ?6
             WHERE id = ?7",
            params![
                entries_count,
                max_entries,
                group_id,
                dec_str_opt(total_budget),
                dec_str_opt(slice_size),
                ts(Utc::now()),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn increment_dca_entries(&self, id: i64, new_count: u32) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE trade_jobs SET dca_entries_count = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_count, ts(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Jobs whose execution window is currently open, deterministic order.
    pub fn eligible_jobs(&self, now: DateTime<Utc>) -> StoreResult<Vec<TradeJob>> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM trade_jobs
             WHERE status = 'pending' AND execute_after <= ?1 AND execute_before > ?1
             ORDER BY tipoff_utc ASC, event_slug ASC",
        )?;
        let rows = stmt.query_map(params![ts(now)], job_from_row)?;
        collect_jobs(rows)
    }

    /// DCA-active jobs still inside their window.
    pub fn dca_active_jobs(&self, now: DateTime<Utc>) -> StoreResult<Vec<TradeJob>> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM trade_jobs
             WHERE status = 'dca_active' AND execute_before > ?1
             ORDER BY tipoff_utc ASC, event_slug ASC",
        )?;
        let rows = stmt.query_map(params![ts(now)], job_from_row)?;
        collect_jobs(rows)
    }

    /// Jobs stuck in `executing` (crash leftovers).
    pub fn executing_jobs(&self) -> StoreResult<Vec<TradeJob>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT * FROM trade_jobs WHERE status = 'executing'")?;
        let rows = stmt.query_map([], job_from_row)?;
        collect_jobs(rows)
    }

    /// Expire jobs past their window.
    ///
    /// `pending`/`failed` become `expired`; `dca_active` groups are treated
    /// as complete and become `executed` so DCA accounting never shows a
    /// spurious expiry. Returns (expired, dca_completed).
    pub fn expire_stale_jobs(&self, now: DateTime<Utc>) -> StoreResult<(usize, usize)> {
        let now_s = ts(now);
        let expired = self.conn().execute(
            "UPDATE trade_jobs SET status = 'expired', updated_at = ?1
             WHERE status IN ('pending', 'failed') AND execute_before < ?1",
            params![now_s],
        )?;
        let completed = self.conn().execute(
            "UPDATE trade_jobs SET status = 'executed', updated_at = ?1
             WHERE status = 'dca_active' AND execute_before < ?1",
            params![now_s],
        )?;
        if expired > 0 || completed > 0 {
            info!(expired, dca_completed = completed, "Stale jobs expired");
        }
        Ok((expired, completed))
    }

    /// Bothside pairs with both legs done buying and no merge yet.
    ///
    /// With `include_dca_active`, pairs where one leg is still DCA-ing are
    /// also returned (early-partial merging).
    pub fn merge_candidate_pairs(&self, include_dca_active: bool) -> StoreResult<Vec<MergeCandidate>> {
        let statuses = if include_dca_active {
            "('executed', 'dca_active')"
        } else {
            "('executed')"
        };
        let sql = format!(
            "SELECT d.bothside_group_id AS gid, d.id AS dir_id, h.id AS hedge_id,
                    d.status AS dir_status, h.status AS hedge_status,
                    d.execute_before AS execute_before
             FROM trade_jobs d
             JOIN trade_jobs h
               ON h.bothside_group_id = d.bothside_group_id AND h.leg_side = 'hedge'
             WHERE d.leg_side = 'directional'
               AND d.bothside_group_id IS NOT NULL
               AND d.status IN {statuses} AND h.status IN {statuses}
               AND d.merge_status IN ('none', 'failed')
               AND h.merge_status IN ('none', 'failed')"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>("gid")?,
                row.get::<_, i64>("dir_id")?,
                row.get::<_, i64>("hedge_id")?,
                row.get::<_, String>("dir_status")?,
                row.get::<_, String>("hedge_status")?,
                row.get::<_, String>("execute_before")?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (gid, dir_id, hedge_id, dir_status, hedge_status, before) = row?;
            let Ok(dir_status) = dir_status.parse() else {
                warn!(gid, "Corrupt dir status in merge candidate, skipping");
                continue;
            };
            let Ok(hedge_status) = hedge_status.parse() else {
                warn!(gid, "Corrupt hedge status in merge candidate, skipping");
                continue;
            };
            let Ok(before) = DateTime::parse_from_rfc3339(&before) else {
                warn!(gid, "Corrupt execute_before in merge candidate, skipping");
                continue;
            };
            out.push(MergeCandidate {
                bothside_group_id: gid,
                dir_job_id: dir_id,
                hedge_job_id: hedge_id,
                dir_status,
                hedge_status,
                execute_before: before.with_timezone(&Utc),
            });
        }
        Ok(out)
    }

    /// Set merge progress on one leg's job.
    pub fn update_job_merge_status(
        &self,
        id: i64,
        status: MergeStatus,
        merge_operation_id: Option<i64>,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE trade_jobs
             SET merge_status = ?1, merge_operation_id = COALESCE(?2, merge_operation_id),
                 retry_count = CASE WHEN ?1 = 'failed' THEN retry_count + 1 ELSE retry_count END,
                 updated_at = ?3
             WHERE id = ?4",
            params![status.as_str(), merge_operation_id, ts(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Status counts for one game date.
    pub fn job_summary(&self, game_date: &str) -> StoreResult<JobSummary> {
        let mut stmt = self.conn().prepare(
            "SELECT status, COUNT(*) FROM trade_jobs WHERE game_date = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![game_date], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;
        let mut summary = JobSummary::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => summary.pending = count,
                "executing" => summary.executing = count,
                "dca_active" => summary.dca_active = count,
                "executed" => summary.executed = count,
                "skipped" => summary.skipped = count,
                "failed" => summary.failed = count,
                "expired" => summary.expired = count,
                _ => {}
            }
        }
        Ok(summary)
    }

    /// All jobs for a date, for the status command.
    pub fn jobs_for_date(&self, game_date: &str) -> StoreResult<Vec<TradeJob>> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM trade_jobs WHERE game_date = ?1 ORDER BY tipoff_utc, event_slug, leg_side",
        )?;
        let rows = stmt.query_map(params![game_date], job_from_row)?;
        collect_jobs(rows)
    }
}

fn collect_jobs(
    rows: impl Iterator<Item = rusqlite::Result<TradeJob>>,
) -> StoreResult<Vec<TradeJob>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<TradeJob> {
    Ok(TradeJob {
        id: row.get("id")?,
        game_date: row.get("game_date")?,
        event_slug: row.get("event_slug")?,
        home_team: row.get("home_team")?,
        away_team: row.get("away_team")?,
        tipoff_utc: get_ts(row, "tipoff_utc")?,
        execute_after: get_ts(row, "execute_after")?,
        execute_before: get_ts(row, "execute_before")?,
        leg_side: get_parsed(row, "leg_side")?,
        status: get_parsed(row, "status")?,
        signal_id: row.get("signal_id")?,
        retry_count: row.get("retry_count")?,
        error_message: row.get("error_message")?,
        dca_entries_count: row.get("dca_entries_count")?,
        dca_max_entries: row.get("dca_max_entries")?,
        dca_group_id: row.get("dca_group_id")?,
        dca_total_budget: get_decimal_opt(row, "dca_total_budget")?,
        dca_slice_size: get_decimal_opt(row, "dca_slice_size")?,
        paired_job_id: row.get("paired_job_id")?,
        bothside_group_id: row.get("bothside_group_id")?,
        merge_status: get_parsed(row, "merge_status")?,
        merge_operation_id: row.get("merge_operation_id")?,
    })
}
