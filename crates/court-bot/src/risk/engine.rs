//! Circuit-breaker evaluation.
//!
//! One pass per tick: read the previous snapshot, recompute metrics from
//! settled results, map to a level (highest severity wins), apply the
//! graded-recovery clamps, and hand back a fresh snapshot for the caller
//! to persist at the end of the tick. The snapshot in the store is the
//! only carrier of circuit-breaker state between ticks.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use crate::config::RiskConfig;
use crate::risk::drift::max_drift_z;
use crate::store::{RiskLevel, RiskSnapshot, Store, StoreError};

/// Dwell requirements for graded recovery.
const RED_LOCKOUT_HOURS: i64 = 72;
const ORANGE_DWELL_HOURS: i64 = 24;
const YELLOW_RECOVERY_POSITIVE_DAYS: u32 = 3;
const ORANGE_RECOVERY_MIN_WIN_RATE: f64 = 0.60;
const ORANGE_RECOVERY_LOOKBACK: usize = 5;
const CONSECUTIVE_LOSS_TRIGGER: u32 = 5;

/// Result of a risk evaluation, ready to persist.
#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub snapshot: RiskSnapshot,
    /// The level before this evaluation, for transition notifications.
    pub previous_level: Option<RiskLevel>,
    pub trigger: String,
}

impl RiskVerdict {
    pub fn level(&self) -> RiskLevel {
        self.snapshot.level
    }

    pub fn sizing_multiplier(&self) -> Decimal {
        self.snapshot.sizing_multiplier
    }

    pub fn level_changed(&self) -> bool {
        self.previous_level != Some(self.snapshot.level)
    }

    /// New initial entries are allowed under GREEN and YELLOW.
    pub fn allows_new_positions(&self) -> bool {
        self.snapshot.level <= RiskLevel::Yellow
    }

    /// Follow-on DCA entries: GREEN always; ORANGE only when configured
    /// to let existing groups finish; YELLOW and RED block.
    pub fn allows_dca_entries(&self, config: &RiskConfig) -> bool {
        match self.snapshot.level {
            RiskLevel::Green => true,
            RiskLevel::Yellow => false,
            RiskLevel::Orange => config.orange_allows_dca,
            RiskLevel::Red => false,
        }
    }
}

/// Evaluate the circuit breaker; any internal failure degrades instead of
/// blocking the tick.
pub fn evaluate_risk_or_degrade(
    store: &Store,
    config: &RiskConfig,
    balance: Option<Decimal>,
    now: DateTime<Utc>,
) -> RiskVerdict {
    match evaluate_risk(store, config, balance, now) {
        Ok(verdict) => verdict,
        Err(e) => {
            error!(error = %e, "Risk evaluation failed - degraded mode");
            degraded_verdict(store, now)
        }
    }
}

/// The degraded sentinel: half sizing, never a full stop, never GREEN.
fn degraded_verdict(store: &Store, now: DateTime<Utc>) -> RiskVerdict {
    let previous = store.latest_risk_snapshot().ok().flatten();
    let previous_level = previous.as_ref().map(|s| s.level);
    let level_since = previous
        .as_ref()
        .filter(|s| s.level == RiskLevel::Yellow)
        .map(|s| s.level_since)
        .unwrap_or(now);
    RiskVerdict {
        snapshot: RiskSnapshot {
            id: 0,
            checked_at: now,
            level: RiskLevel::Yellow,
            level_since,
            sizing_multiplier: dec!(0.5),
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            max_drawdown_pct: Decimal::ZERO,
            drift_z_max: 0.0,
            degraded: true,
            manual_ack: false,
            lockout_until: previous.as_ref().and_then(|s| s.lockout_until),
            last_balance_usd: previous.and_then(|s| s.last_balance_usd),
        },
        previous_level,
        trigger: "degraded_mode".to_string(),
    }
}

/// Full evaluation against the store.
pub fn evaluate_risk(
    store: &Store,
    config: &RiskConfig,
    balance: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<RiskVerdict, StoreError> {
    let previous = store.latest_risk_snapshot()?;
    let previous_level = previous.as_ref().map(|s| s.level);

    let balance = balance
        .or_else(|| previous.as_ref().and_then(|s| s.last_balance_usd))
        .unwrap_or(Decimal::ZERO);

    let today = now.format("%Y-%m-%d").to_string();
    let week_ago = (now - Duration::days(7)).format("%Y-%m-%d").to_string();
    let daily_pnl = store.realized_pnl_for_date(&today)?;
    let weekly_pnl = store.realized_pnl_since(&week_ago)?;
    let consecutive_losses = store.consecutive_losses()?;

    let daily_loss_pct = loss_pct(daily_pnl, balance);
    let weekly_loss_pct = loss_pct(weekly_pnl, balance);
    // Weekly cumulative loss approximates drawdown from the high-water
    // mark between full equity-curve rebuilds.
    let drawdown_pct = weekly_loss_pct;

    let drift_z_max = max_drift_z(&store.band_outcomes(200)?);

    let (raw_level, trigger) = classify(
        config,
        daily_loss_pct,
        weekly_loss_pct,
        drawdown_pct,
        consecutive_losses,
        drift_z_max,
    );

    let (level, level_since, lockout_until, trigger) = apply_hysteresis(
        store,
        previous.as_ref(),
        raw_level,
        trigger,
        now,
    )?;

    let snapshot = RiskSnapshot {
        id: 0,
        checked_at: now,
        level,
        level_since,
        sizing_multiplier: multiplier_for(level),
        daily_pnl,
        weekly_pnl,
        consecutive_losses,
        max_drawdown_pct: drawdown_pct,
        drift_z_max,
        degraded: false,
        manual_ack: false,
        lockout_until,
        last_balance_usd: if balance > Decimal::ZERO { Some(balance) } else { None },
    };

    if previous_level != Some(level) {
        info!(
            from = previous_level.map(|l| l.as_str()).unwrap_or("none"),
            to = level.as_str(),
            trigger = %trigger,
            "Circuit breaker level changed"
        );
    }

    Ok(RiskVerdict {
        snapshot,
        previous_level,
        trigger,
    })
}

/// Priority mapping, highest severity first.
fn classify(
    config: &RiskConfig,
    daily_loss_pct: Decimal,
    weekly_loss_pct: Decimal,
    drawdown_pct: Decimal,
    consecutive_losses: u32,
    drift_z_max: f64,
) -> (RiskLevel, String) {
    if weekly_loss_pct >= config.weekly_loss_limit_pct {
        return (
            RiskLevel::Red,
            format!("weekly_loss={weekly_loss_pct:.1}%>={}%", config.weekly_loss_limit_pct),
        );
    }
    if drawdown_pct >= config.max_drawdown_limit_pct {
        return (
            RiskLevel::Red,
            format!("drawdown={drawdown_pct:.1}%>={}%", config.max_drawdown_limit_pct),
        );
    }
    if daily_loss_pct >= config.daily_loss_limit_pct {
        return (
            RiskLevel::Orange,
            format!("daily_loss={daily_loss_pct:.1}%>={}%", config.daily_loss_limit_pct),
        );
    }
    if drift_z_max > config.drift_threshold_sigma {
        return (
            RiskLevel::Orange,
            format!("calibration_drift z={drift_z_max:.2}"),
        );
    }
    let half_limit = config.daily_loss_limit_pct / dec!(2);
    if consecutive_losses >= CONSECUTIVE_LOSS_TRIGGER {
        return (
            RiskLevel::Yellow,
            format!("consecutive_losses={consecutive_losses}"),
        );
    }
    if daily_loss_pct >= half_limit {
        return (
            RiskLevel::Yellow,
            format!("daily_loss={daily_loss_pct:.1}%>={half_limit:.1}%"),
        );
    }
    (RiskLevel::Green, String::new())
}

/// Graded recovery: the level never improves faster than the dwell
/// windows allow, and never skips a step downward.
fn apply_hysteresis(
    store: &Store,
    previous: Option<&RiskSnapshot>,
    raw: RiskLevel,
    trigger: String,
    now: DateTime<Utc>,
) -> Result<(RiskLevel, DateTime<Utc>, Option<DateTime<Utc>>, String), StoreError> {
    let Some(prev) = previous else {
        // First snapshot ever: take the raw level.
        let lockout = lockout_for(raw, now);
        return Ok((raw, now, lockout, trigger));
    };

    if raw >= prev.level {
        // Escalation (or no change) applies immediately.
        let since = if raw == prev.level { prev.level_since } else { now };
        let lockout = if raw == prev.level {
            prev.lockout_until
        } else {
            lockout_for(raw, now)
        };
        return Ok((raw, since, lockout, trigger));
    }

    // Metrics improved; recover one step at a time with dwell checks.
    let dwell = now - prev.level_since;
    match prev.level {
        RiskLevel::Red => {
            let lock_ok = dwell >= Duration::hours(RED_LOCKOUT_HOURS);
            if prev.manual_ack && lock_ok {
                Ok((RiskLevel::Orange, now, None, "red_recovery_acknowledged".into()))
            } else {
                let why = if lock_ok { "awaiting_manual_ack" } else { "red_lockout" };
                Ok((RiskLevel::Red, prev.level_since, prev.lockout_until, why.into()))
            }
        }
        RiskLevel::Orange => {
            if dwell < Duration::hours(ORANGE_DWELL_HOURS) {
                return Ok((RiskLevel::Orange, prev.level_since, prev.lockout_until, "orange_dwell".into()));
            }
            let recent = store.last_results(ORANGE_RECOVERY_LOOKBACK)?;
            let wins = recent.iter().filter(|r| r.won).count();
            let win_rate = if recent.is_empty() {
                0.0
            } else {
                wins as f64 / recent.len() as f64
            };
            if recent.len() >= ORANGE_RECOVERY_LOOKBACK && win_rate >= ORANGE_RECOVERY_MIN_WIN_RATE {
                Ok((RiskLevel::Yellow, now, None, "orange_recovery".into()))
            } else {
                warn!(win_rate, "ORANGE recovery blocked on recent win rate");
                Ok((RiskLevel::Orange, prev.level_since, prev.lockout_until, "orange_win_rate".into()))
            }
        }
        RiskLevel::Yellow => {
            if store.positive_pnl_day_streak()? >= YELLOW_RECOVERY_POSITIVE_DAYS {
                Ok((RiskLevel::Green, now, None, "yellow_recovery".into()))
            } else {
                Ok((RiskLevel::Yellow, prev.level_since, None, "yellow_needs_positive_days".into()))
            }
        }
        RiskLevel::Green => Ok((RiskLevel::Green, prev.level_since, None, trigger)),
    }
}

fn multiplier_for(level: RiskLevel) -> Decimal {
    match level {
        RiskLevel::Green => Decimal::ONE,
        RiskLevel::Yellow => dec!(0.5),
        RiskLevel::Orange | RiskLevel::Red => Decimal::ZERO,
    }
}

fn lockout_for(level: RiskLevel, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match level {
        RiskLevel::Red => Some(now + Duration::hours(RED_LOCKOUT_HOURS)),
        RiskLevel::Orange => Some(now + Duration::hours(ORANGE_DWELL_HOURS)),
        _ => None,
    }
}

fn loss_pct(pnl: Decimal, balance: Decimal) -> Decimal {
    if balance <= Decimal::ZERO || pnl >= Decimal::ZERO {
        return Decimal::ZERO;
    }
    pnl.abs() / balance * dec!(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RiskSnapshot;

    fn cfg() -> RiskConfig {
        RiskConfig::default()
    }

    fn snapshot(level: RiskLevel, since: DateTime<Utc>, ack: bool) -> RiskSnapshot {
        RiskSnapshot {
            id: 0,
            checked_at: since,
            level,
            level_since: since,
            sizing_multiplier: multiplier_for(level),
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            max_drawdown_pct: Decimal::ZERO,
            drift_z_max: 0.0,
            degraded: false,
            manual_ack: ack,
            lockout_until: None,
            last_balance_usd: Some(dec!(1000)),
        }
    }

    #[test]
    fn test_classify_priority() {
        let c = cfg();
        let (level, _) = classify(&c, dec!(0), dec!(6), dec!(6), 0, 0.0);
        assert_eq!(level, RiskLevel::Red);
        let (level, _) = classify(&c, dec!(4), dec!(0), dec!(0), 0, 0.0);
        assert_eq!(level, RiskLevel::Orange);
        let (level, _) = classify(&c, dec!(0), dec!(0), dec!(0), 0, 2.5);
        assert_eq!(level, RiskLevel::Orange);
        let (level, _) = classify(&c, dec!(0), dec!(0), dec!(0), 5, 0.0);
        assert_eq!(level, RiskLevel::Yellow);
        let (level, _) = classify(&c, dec!(1.6), dec!(0), dec!(0), 0, 0.0);
        assert_eq!(level, RiskLevel::Yellow);
        let (level, _) = classify(&c, dec!(1.0), dec!(1.0), dec!(1.0), 2, 1.0);
        assert_eq!(level, RiskLevel::Green);
    }

    #[test]
    fn test_drawdown_triggers_red() {
        let (level, trigger) = classify(&cfg(), dec!(0), dec!(0), dec!(15), 0, 0.0);
        assert_eq!(level, RiskLevel::Red);
        assert!(trigger.contains("drawdown"));
    }

    #[test]
    fn test_multipliers() {
        assert_eq!(multiplier_for(RiskLevel::Green), Decimal::ONE);
        assert_eq!(multiplier_for(RiskLevel::Yellow), dec!(0.5));
        assert_eq!(multiplier_for(RiskLevel::Orange), Decimal::ZERO);
        assert_eq!(multiplier_for(RiskLevel::Red), Decimal::ZERO);
    }

    #[test]
    fn test_escalation_is_immediate() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.insert_risk_snapshot(&snapshot(RiskLevel::Green, now, false)).unwrap();

        let prev = store.latest_risk_snapshot().unwrap();
        let (level, since, lockout, _) =
            apply_hysteresis(&store, prev.as_ref(), RiskLevel::Red, "t".into(), now).unwrap();
        assert_eq!(level, RiskLevel::Red);
        assert_eq!(since, now);
        assert!(lockout.is_some());
    }

    #[test]
    fn test_red_requires_ack_and_dwell() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        // Dwell satisfied but no ack.
        let old = snapshot(RiskLevel::Red, now - Duration::hours(80), false);
        let (level, _, _, why) =
            apply_hysteresis(&store, Some(&old), RiskLevel::Green, String::new(), now).unwrap();
        assert_eq!(level, RiskLevel::Red);
        assert_eq!(why, "awaiting_manual_ack");

        // Ack but inside the 72h lockout.
        let recent = snapshot(RiskLevel::Red, now - Duration::hours(10), true);
        let (level, _, _, why) =
            apply_hysteresis(&store, Some(&recent), RiskLevel::Green, String::new(), now).unwrap();
        assert_eq!(level, RiskLevel::Red);
        assert_eq!(why, "red_lockout");

        // Both: one step down to ORANGE, never further.
        let ready = snapshot(RiskLevel::Red, now - Duration::hours(80), true);
        let (level, _, _, _) =
            apply_hysteresis(&store, Some(&ready), RiskLevel::Green, String::new(), now).unwrap();
        assert_eq!(level, RiskLevel::Orange);
    }

    #[test]
    fn test_orange_recovery_needs_dwell_and_win_rate() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        // Not enough dwell.
        let recent = snapshot(RiskLevel::Orange, now - Duration::hours(3), false);
        let (level, _, _, _) =
            apply_hysteresis(&store, Some(&recent), RiskLevel::Green, String::new(), now).unwrap();
        assert_eq!(level, RiskLevel::Orange);

        // Dwell ok, but no settlement history -> stays ORANGE.
        let old = snapshot(RiskLevel::Orange, now - Duration::hours(30), false);
        let (level, _, _, _) =
            apply_hysteresis(&store, Some(&old), RiskLevel::Green, String::new(), now).unwrap();
        assert_eq!(level, RiskLevel::Orange);

        // With 4 wins in the last 5, recovery proceeds one step.
        seed_results(&store, &[true, true, false, true, true]);
        let (level, _, _, _) =
            apply_hysteresis(&store, Some(&old), RiskLevel::Green, String::new(), now).unwrap();
        assert_eq!(level, RiskLevel::Yellow);
    }

    #[test]
    fn test_yellow_recovery_needs_positive_days() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let prev = snapshot(RiskLevel::Yellow, now - Duration::days(5), false);

        // All results settle "today" in this store, so at most one
        // positive day exists - not enough.
        seed_results(&store, &[true, true]);
        let (level, _, _, _) =
            apply_hysteresis(&store, Some(&prev), RiskLevel::Green, String::new(), now).unwrap();
        assert_eq!(level, RiskLevel::Yellow);
    }

    #[test]
    fn test_degraded_verdict_shape() {
        let store = Store::open_in_memory().unwrap();
        let v = degraded_verdict(&store, Utc::now());
        assert_eq!(v.level(), RiskLevel::Yellow);
        assert_eq!(v.sizing_multiplier(), dec!(0.5));
        assert!(v.snapshot.degraded);
        assert!(v.allows_new_positions());
    }

    #[test]
    fn test_verdict_gating() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut config = cfg();

        let make = |level| RiskVerdict {
            snapshot: snapshot(level, now, false),
            previous_level: None,
            trigger: String::new(),
        };

        assert!(make(RiskLevel::Green).allows_new_positions());
        assert!(make(RiskLevel::Yellow).allows_new_positions());
        assert!(!make(RiskLevel::Orange).allows_new_positions());
        assert!(!make(RiskLevel::Red).allows_new_positions());

        assert!(make(RiskLevel::Green).allows_dca_entries(&config));
        assert!(!make(RiskLevel::Yellow).allows_dca_entries(&config));
        assert!(!make(RiskLevel::Orange).allows_dca_entries(&config));
        config.orange_allows_dca = true;
        assert!(make(RiskLevel::Orange).allows_dca_entries(&config));
        assert!(!make(RiskLevel::Red).allows_dca_entries(&config));
        let _ = store;
    }

    #[test]
    fn test_evaluate_risk_full_pass_green() {
        let store = Store::open_in_memory().unwrap();
        let v = evaluate_risk(&store, &cfg(), Some(dec!(1000)), Utc::now()).unwrap();
        assert_eq!(v.level(), RiskLevel::Green);
        assert_eq!(v.sizing_multiplier(), Decimal::ONE);
        assert!(!v.snapshot.degraded);
    }

    fn seed_results(store: &Store, outcomes: &[bool]) {
        use crate::store::signals::tests::{sample_signal, seed_job};
        let job_id = seed_job(store, "nba-bos-lal-2026-01-15");
        for (i, won) in outcomes.iter().enumerate() {
            let sig = store
                .insert_signal(&sample_signal(job_id, "nba-bos-lal-2026-01-15", i as u32 + 1))
                .unwrap();
            store
                .insert_result(
                    sig,
                    *won,
                    if *won { dec!(5) } else { dec!(-5) },
                    if *won { dec!(1) } else { dec!(0) },
                    None,
                    None,
                    "box_score",
                )
                .unwrap();
        }
    }
}
