//! The per-tick job scheduler.
//!
//! Each tick: refresh the schedule, recover crash leftovers, expire stale
//! jobs, check the circuit breaker, then drive eligible jobs through the
//! directional / hedge / DCA / merge executors and settle finished games.
//! Everything runs single-threaded inside the tick; the store's CAS claim
//! is the guard against a second tick racing this one.

pub mod dca;
pub mod directional;
pub mod hedge;
pub mod merge;
pub mod preflight;
pub mod pricing;
pub mod refresh;

use chrono::Utc;
use court_market::{DiscoveryConfig, MarketClient, MarketError};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::calibration::CalibrationCurve;
use crate::config::{BotConfig, ExecutionMode};
use crate::notify::Notifier;
use crate::risk::{evaluate_risk_or_degrade, RiskVerdict};
use crate::settlement;
use crate::store::{JobStatus, NewSignal, OrderEventType, OrderStatus, RiskLevel, Store, StoreError, TradeJob};

/// Shared references threaded through one tick.
pub struct TickContext<'a> {
    pub store: &'a Store,
    pub client: &'a dyn MarketClient,
    pub config: &'a BotConfig,
    pub curve: &'a CalibrationCurve,
    pub notifier: &'a Notifier,
}

/// How one job left an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// An order was placed (or paper-filled).
    Executed,
    /// Nothing to do for this job; terminal skip.
    Skipped,
    /// An error moved the job to failed.
    Failed,
    /// The job stays pending for a later tick.
    Deferred,
}

/// Executor result for one job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: i64,
    pub event_slug: String,
    pub disposition: Disposition,
    pub signal_id: Option<i64>,
    pub note: Option<String>,
}

impl JobOutcome {
    pub fn new(job: &TradeJob, disposition: Disposition) -> Self {
        Self {
            job_id: job.id,
            event_slug: job.event_slug.clone(),
            disposition,
            signal_id: None,
            note: None,
        }
    }

    pub fn with_signal(mut self, signal_id: i64) -> Self {
        self.signal_id = Some(signal_id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Totals for the tick summary notification.
#[derive(Debug, Default)]
pub struct TickReport {
    pub games_found: usize,
    pub recovered: usize,
    pub expired: usize,
    pub entries: Vec<JobOutcome>,
    pub dca: Vec<JobOutcome>,
    pub merges: Vec<JobOutcome>,
    pub settled: usize,
    pub settled_pnl: Decimal,
    pub risk_level: RiskLevel,
}

/// One full scheduler tick. Order matters: settlement runs even when the
/// circuit breaker forbids new entries.
pub async fn run_tick(
    ctx: &TickContext<'_>,
    discovery: &DiscoveryConfig,
    dates: &[String],
    skip_settle: bool,
) -> Result<TickReport, StoreError> {
    let now = Utc::now();
    let mut report = TickReport::default();

    // 1. Discovery -> job table.
    for date in dates {
        report.games_found +=
            refresh::refresh_schedule(ctx.store, discovery, ctx.config, date).await?;
    }

    // 2. Crash recovery, then window expiry.
    report.recovered = refresh::recover_executing_jobs(ctx.store)?;
    let (expired, _dca_completed) = ctx.store.expire_stale_jobs(now)?;
    report.expired = expired;

    // 3. Circuit breaker. Balance only exists in live mode.
    let balance = fetch_balance(ctx).await;
    let risk = evaluate_risk_or_degrade(ctx.store, &ctx.config.risk, balance, now);
    report.risk_level = risk.level();
    info!(
        level = risk.level().as_str(),
        multiplier = %risk.sizing_multiplier(),
        degraded = risk.snapshot.degraded,
        trigger = %risk.trigger,
        "Risk state"
    );
    if risk.level_changed() {
        ctx.notifier
            .notify_risk_transition(risk.previous_level, risk.level(), &risk.trigger)
            .await;
    }

    // 4. Entry executors, unless RED locked everything down.
    if risk.level() < RiskLevel::Red {
        report.entries = dispatch_eligible(ctx, &risk).await?;
        report.dca = dca::process_dca_jobs(ctx, &risk).await?;
    } else {
        warn!("Circuit breaker RED - settle-only tick");
    }

    // 5. Merges reconcile filled inventory; no new risk taken.
    if risk.level() < RiskLevel::Red {
        report.merges = merge::process_merges(ctx).await?;
    }

    // 6. Settlement.
    if !skip_settle {
        let settle = settlement::auto_settle(ctx, discovery).await?;
        report.settled = settle.settled.len();
        report.settled_pnl = settle.total_pnl();
        if !settle.settled.is_empty() {
            ctx.notifier.notify_settlement(&settle).await;
        }
    }

    // 7. Persist the snapshot that carries circuit-breaker state to the
    //    next tick.
    ctx.store.insert_risk_snapshot(&risk.snapshot)?;

    Ok(report)
}

/// Dispatch eligible jobs through the directional / hedge executors,
/// bounded by the per-tick order quota.
async fn dispatch_eligible(
    ctx: &TickContext<'_>,
    risk: &RiskVerdict,
) -> Result<Vec<JobOutcome>, StoreError> {
    let now = Utc::now();
    let eligible = ctx.store.eligible_jobs(now)?;
    if eligible.is_empty() {
        info!("No eligible jobs in execution window");
        return Ok(Vec::new());
    }
    info!(count = eligible.len(), "Eligible jobs found");

    if !risk.allows_new_positions() {
        info!(level = risk.level().as_str(), "Risk level blocks new entries");
        return Ok(Vec::new());
    }

    let max_per_tick = ctx.config.schedule.max_orders_per_tick;
    let mut outcomes = Vec::new();
    let mut orders_this_tick = 0usize;

    for job in eligible {
        if orders_this_tick >= max_per_tick {
            warn!(max_per_tick, "Per-tick order quota reached, deferring remaining jobs");
            break;
        }
        let outcome = match job.leg_side {
            court_common::LegSide::Directional => {
                directional::process_directional_job(ctx, &job, risk).await?
            }
            court_common::LegSide::Hedge => hedge::process_hedge_job(ctx, &job, risk).await?,
        };
        if outcome.disposition == Disposition::Executed {
            orders_this_tick += 1;
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

pub(crate) async fn fetch_balance(ctx: &TickContext<'_>) -> Option<Decimal> {
    if ctx.config.mode != ExecutionMode::Live {
        return Some(ctx.config.sizing.paper_bankroll_usd);
    }
    match ctx.client.get_balance().await {
        Ok(balance) => Some(balance),
        Err(e) => {
            warn!(error = %e, "Balance fetch failed, falling back to last snapshot");
            None
        }
    }
}

/// Place (or paper-fill) one entry order for a signal that was just
/// inserted in `pending`. Returns the terminal order status.
pub(crate) async fn submit_entry(
    ctx: &TickContext<'_>,
    signal_id: i64,
    token_id: &str,
    limit_price: Decimal,
    size_usd: Decimal,
    best_ask: Option<Decimal>,
) -> Result<OrderStatus, MarketError> {
    match ctx.config.mode {
        ExecutionMode::Paper => {
            // Paper fills at the signal price immediately.
            ctx.store
                .transition_order_status(signal_id, OrderStatus::Paper, None)
                .map_err(|e| MarketError::Permanent(e.to_string()))?;
            Ok(OrderStatus::Paper)
        }
        ExecutionMode::Live => {
            let order_id = ctx
                .client
                .place_limit_buy(token_id, limit_price, size_usd)
                .await?;
            let now = Utc::now();
            ctx.store
                .mark_order_placed(signal_id, &order_id, limit_price, now)
                .map_err(|e| MarketError::Permanent(e.to_string()))?;
            ctx.store
                .log_order_event(
                    signal_id,
                    OrderEventType::Placed,
                    Some(&order_id),
                    Some(limit_price),
                    None,
                    best_ask,
                )
                .map_err(|e| MarketError::Permanent(e.to_string()))?;
            Ok(OrderStatus::Placed)
        }
        ExecutionMode::DryRun => {
            // Dry-run never inserts signals; reaching here is a bug.
            Err(MarketError::Permanent("submit_entry called in dry-run".into()))
        }
    }
}

/// Map a market error on a claimed job back onto the state machine:
/// transient errors requeue (up to the retry budget), permanent ones fail.
pub(crate) fn fail_or_requeue(
    ctx: &TickContext<'_>,
    job: &TradeJob,
    err: &MarketError,
) -> Result<Disposition, StoreError> {
    if err.is_transient() && job.retry_count + 1 < ctx.config.schedule.max_retries {
        ctx.store.update_job_status(
            job.id,
            JobStatus::Pending,
            Some(&err.to_string()),
            None,
            true,
        )?;
        Ok(Disposition::Deferred)
    } else {
        ctx.store.update_job_status(
            job.id,
            JobStatus::Failed,
            Some(&err.to_string()),
            None,
            true,
        )?;
        Ok(Disposition::Failed)
    }
}

/// Build the shared fields of a first-entry signal.
#[allow(clippy::too_many_arguments)]
pub(crate) fn first_entry_signal(
    job: &TradeJob,
    title: &str,
    team: &str,
    token_id: &str,
    condition_id: Option<String>,
    price: Decimal,
    size_usd: Decimal,
    role: court_common::LegSide,
    dca_group_id: String,
    estimate: &crate::calibration::WinRateEstimate,
    edge_pct: Decimal,
    in_sweet_spot: bool,
    liquidity: Option<&court_market::LiquiditySnapshot>,
    liquidity_score: &str,
    balance: Option<Decimal>,
    binding: &str,
) -> NewSignal {
    NewSignal {
        job_id: job.id,
        event_slug: job.event_slug.clone(),
        game_title: title.to_string(),
        team: team.to_string(),
        price,
        size_usd,
        token_id: token_id.to_string(),
        condition_id,
        signal_role: role,
        dca_group_id,
        dca_sequence: 1,
        bothside_group_id: job.bothside_group_id.clone(),
        expected_win_rate: estimate.lower_bound,
        edge_pct,
        price_band: estimate.band_label.clone(),
        in_sweet_spot,
        liquidity_score: liquidity_score.to_string(),
        ask_depth_5c: liquidity.map(|l| l.ask_depth_5c),
        spread_pct: liquidity.map(|l| l.spread_pct),
        balance_usd_at_trade: balance,
        constraint_binding: binding.to_string(),
        order_status: OrderStatus::Pending,
    }
}
