//! Schedule refresh and crash recovery.
//!
//! Discovery creates one directional job per game with an execution
//! window ending at tipoff; hedge jobs are created later by the
//! directional executor. Jobs stuck in `executing` after a crash are
//! resolved by checking whether their order actually went out.

use chrono::{Duration, Utc};
use court_common::{build_event_slug, LegSide};
use court_market::{fetch_games_for_date, DiscoveryConfig, GameStatus};
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::store::{JobStatus, NewJob, Store, StoreResult};

/// Fetch the schedule for one ET date and upsert trade jobs.
/// Returns the number of newly created jobs.
pub async fn refresh_schedule(
    store: &Store,
    discovery: &DiscoveryConfig,
    config: &BotConfig,
    game_date: &str,
) -> StoreResult<usize> {
    let games = match fetch_games_for_date(discovery, game_date).await {
        Ok(games) => games,
        Err(e) => {
            // Discovery failures are transient: existing jobs still run.
            warn!(game_date, error = %e, "Schedule fetch failed, skipping refresh");
            return Ok(0);
        }
    };

    if games.is_empty() {
        info!(game_date, "No games scheduled");
        return Ok(0);
    }

    let window = Duration::hours(config.schedule.window_hours);
    let mut inserted = 0;
    for game in &games {
        // Finished games get no job; postponed ones wait for a reschedule.
        if matches!(game.status, GameStatus::Final | GameStatus::Postponed) {
            continue;
        }

        let slug = build_event_slug(&game.away_abbr, &game.home_abbr, game.tipoff_utc);
        let job = NewJob {
            game_date: game_date.to_string(),
            event_slug: slug.clone(),
            home_team: game.home_abbr.clone(),
            away_team: game.away_abbr.clone(),
            tipoff_utc: game.tipoff_utc,
            execute_after: game.tipoff_utc - window,
            execute_before: game.tipoff_utc,
            leg_side: LegSide::Directional,
        };
        if store.upsert_trade_job(&job)? {
            inserted += 1;
            info!(
                slug = %slug,
                execute_after = %job.execute_after,
                execute_before = %job.execute_before,
                "Job created"
            );
        }
    }

    let summary = store.job_summary(game_date)?;
    info!(
        game_date,
        new = inserted,
        pending = summary.pending,
        dca_active = summary.dca_active,
        executed = summary.executed,
        skipped = summary.skipped,
        failed = summary.failed,
        expired = summary.expired,
        "Schedule refreshed"
    );
    Ok(inserted)
}

/// Resolve jobs stuck in `executing` from a crashed tick.
///
/// If a live-ish signal exists for the slug and leg, the order went out
/// before the crash: mark `executed`. Otherwise nothing was placed:
/// return the job to `pending` for a clean retry.
pub fn recover_executing_jobs(store: &Store) -> StoreResult<usize> {
    let stuck = store.executing_jobs()?;
    let mut recovered = 0;
    for job in stuck {
        let placed = store.has_signal_for_slug_and_role(&job.event_slug, job.leg_side)?;
        let next = if placed { JobStatus::Executed } else { JobStatus::Pending };
        store.update_job_status(job.id, next, None, None, false)?;
        info!(
            job_id = job.id,
            slug = %job.event_slug,
            leg = %job.leg_side,
            resolved_to = next.as_str(),
            "Recovered stuck executing job"
        );
        recovered += 1;
    }
    Ok(recovered)
}
