//! Hedge-leg executor.
//!
//! The hedge is a free option on merge economics: it only ever buys at a
//! price that keeps `dir_vwap + hedge_price` under $1 minus the margin
//! floor. A hedge never executes before its directional holds inventory,
//! and in live mode an unaffordable ask parks the job for a later tick
//! rather than killing it.

use court_common::LegSide;
use court_market::MarketError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ExecutionMode;
use crate::risk::RiskVerdict;
use crate::scheduler::directional::fetch_liquidity;
use crate::scheduler::preflight::preflight_check;
use crate::scheduler::pricing::below_market_price;
use crate::scheduler::{
    fail_or_requeue, first_entry_signal, submit_entry, Disposition, JobOutcome, TickContext,
};
use crate::sizing::{dca_budget, size_position, SizingInputs, SizingResult};
use crate::store::{JobStatus, Signal, StoreError, TradeJob};
use crate::strategy::{ev_per_dollar, min_margin};

pub async fn process_hedge_job(
    ctx: &TickContext<'_>,
    job: &TradeJob,
    risk: &RiskVerdict,
) -> Result<JobOutcome, StoreError> {
    if !ctx.store.claim_job(job.id)? {
        return Ok(JobOutcome::new(job, Disposition::Deferred).with_note("claim_lost"));
    }

    match run(ctx, job, risk).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(job_id = job.id, slug = %job.event_slug, error = %err, "Hedge job errored");
            let disposition = fail_or_requeue(ctx, job, &err)?;
            Ok(JobOutcome::new(job, disposition).with_note(err.to_string()))
        }
    }
}

async fn run(
    ctx: &TickContext<'_>,
    job: &TradeJob,
    risk: &RiskVerdict,
) -> Result<JobOutcome, MarketError> {
    let skip = |note: &str| -> Result<JobOutcome, MarketError> {
        ctx.store
            .update_job_status(job.id, JobStatus::Skipped, Some(note), None, false)
            .map_err(store_err)?;
        info!(job_id = job.id, slug = %job.event_slug, note, "Hedge job skipped");
        Ok(JobOutcome::new(job, Disposition::Skipped).with_note(note.to_string()))
    };
    let park = |note: &str| -> Result<JobOutcome, MarketError> {
        // Back to pending without burning a retry; the window expiry is
        // the eventual backstop.
        ctx.store
            .update_job_status(job.id, JobStatus::Pending, Some(note), None, false)
            .map_err(store_err)?;
        info!(job_id = job.id, slug = %job.event_slug, note, "Hedge job parked");
        Ok(JobOutcome::new(job, Disposition::Deferred).with_note(note.to_string()))
    };

    // 1. The directional leg must hold inventory first.
    let dir_signals = directional_signals(ctx, job).map_err(store_err)?;
    let filled: Vec<&Signal> = dir_signals
        .iter()
        .filter(|s| s.order_status.holds_inventory())
        .collect();
    if filled.is_empty() {
        return park("directional has no filled inventory");
    }
    let dir_team = filled[0].team.clone();
    let dir_cost: Decimal = filled.iter().map(|s| s.size_usd).sum();
    let dir_costs: Vec<Decimal> = filled.iter().map(|s| s.size_usd).collect();
    let dir_prices: Vec<Decimal> = filled.iter().map(|s| s.effective_price()).collect();
    let dir_vwap = court_common::vwap_from_costs(&dir_costs, &dir_prices);
    let dir_shares = court_common::shares_from_costs(&dir_costs, &dir_prices);

    // 2. Market and the opposite outcome.
    let Some(market) = ctx
        .client
        .get_moneyline(&job.away_team, &job.home_team, &job.game_date)
        .await?
    else {
        return skip("no moneyline market");
    };
    let Some((_, hedge_price, hedge_token)) = market.opposite_outcome(&dir_team) else {
        return skip("cannot find hedge outcome");
    };
    let hedge_token = hedge_token.to_string();
    let hedge_outcome = market
        .outcomes
        .iter()
        .find(|o| **o != dir_team)
        .cloned()
        .unwrap_or_default();

    // 3. Max acceptable price from merge economics, re-derived at
    //    dispatch time from actual directional inventory.
    let margin = min_margin(dir_shares, &ctx.config.merge);
    let mut max_hedge = Decimal::ONE - dir_vwap - margin;
    max_hedge = max_hedge.min(ctx.config.bothside.max_combined_vwap - dir_vwap);
    if max_hedge < dec!(0.01) {
        return skip(&format!("max_hedge {:.3} below price floor (dir_vwap={:.3})", max_hedge, dir_vwap));
    }

    // 4. Book and order price.
    let liquidity = fetch_liquidity(ctx, &hedge_token).await;
    let best_ask = liquidity
        .as_ref()
        .map(|l| l.best_ask)
        .filter(|a| *a > Decimal::ZERO)
        .unwrap_or(hedge_price);
    let order_price = below_market_price(best_ask);

    if order_price > max_hedge {
        let note = format!("ask {:.3} above max_hedge {:.3}", best_ask, max_hedge);
        return if ctx.config.mode == ExecutionMode::Live {
            park(&note)
        } else {
            skip(&note)
        };
    }

    let combined = dir_vwap + order_price;
    if combined >= ctx.config.bothside.max_combined_vwap {
        return skip(&format!("combined vwap {:.4} over ceiling", combined));
    }

    // 5. Sizing. Positive calibration EV sizes by Kelly x hedge
    //    multiplier; a non-positive hedge is still worth holding for the
    //    merge and sizes from the directional cost basis instead.
    let estimate = ctx.curve.estimate(to_f64(order_price));
    let balance = super::fetch_balance(ctx).await;
    let sized: SizingResult;
    let in_domain_estimate;
    match estimate {
        Some(est) if ev_per_dollar(est.lower_bound, to_f64(order_price)) > 0.0 => {
            let mut s = size_position(
                &SizingInputs {
                    bankroll_usd: balance.unwrap_or(ctx.config.sizing.paper_bankroll_usd),
                    best_ask: order_price,
                    lower_bound_wr: est.lower_bound,
                    point_wr: est.point_estimate,
                    risk_multiplier: risk.sizing_multiplier(),
                    liquidity: liquidity.as_ref(),
                },
                &ctx.config.sizing,
            );
            s.size_usd = (s.size_usd * ctx.config.bothside.hedge_kelly_mult).round_dp(2);
            sized = s;
            in_domain_estimate = est;
        }
        Some(est) => {
            info!(
                job_id = job.id,
                price = %order_price,
                "Hedge EV non-positive - merge-only sizing from directional cost"
            );
            sized = merge_only_size(dir_cost, ctx, &combined);
            in_domain_estimate = est;
        }
        None => {
            // Outside the curve: no estimate exists; merge economics are
            // still intact, so size from the directional cost and record
            // a flat estimate.
            sized = merge_only_size(dir_cost, ctx, &combined);
            in_domain_estimate = crate::calibration::WinRateEstimate {
                price: to_f64(order_price),
                point_estimate: 0.0,
                lower_bound: 0.0,
                band_label: format!("{:.2}", order_price),
                effective_n: 0,
            };
        }
    }
    if sized.is_zero() {
        return skip("hedge size is zero");
    }
    let budget = dca_budget(&sized, ctx.config.dca.max_entries);

    if ctx.config.mode == ExecutionMode::DryRun {
        info!(
            job_id = job.id,
            slug = %job.event_slug,
            outcome = %hedge_outcome,
            price = %order_price,
            best_ask = %best_ask,
            slice = %budget.first_slice_usd,
            combined = %combined,
            "[dry-run] would place hedge entry"
        );
        return skip("dry-run mode");
    }

    if ctx.config.mode == ExecutionMode::Live {
        if let Err(veto) = preflight_check(
            ctx.store,
            ctx.client,
            ctx.config,
            &job.event_slug,
            budget.first_slice_usd,
            chrono::Utc::now(),
        )
        .await
        {
            ctx.store
                .update_job_status(job.id, JobStatus::Failed, Some(veto.message()), None, true)
                .map_err(store_err)?;
            return Ok(JobOutcome::new(job, Disposition::Failed).with_note(veto.message().to_string()));
        }
    }

    if ctx.store.has_signal_for_sequence(job.id, 1).map_err(store_err)? {
        return skip("entry already recorded");
    }

    let edge = Decimal::try_from(in_domain_estimate.lower_bound - to_f64(order_price))
        .map(|d| (d * dec!(100)).round_dp(2))
        .unwrap_or(Decimal::ZERO);
    let dca_group_id = Uuid::new_v4().to_string();
    let signal = first_entry_signal(
        job,
        &market.title,
        &hedge_outcome,
        &hedge_token,
        Some(market.condition_id.clone()),
        order_price,
        budget.first_slice_usd,
        LegSide::Hedge,
        dca_group_id.clone(),
        &in_domain_estimate,
        edge,
        false,
        liquidity.as_ref(),
        sized.liquidity_score.as_str(),
        balance,
        budget.binding.as_str(),
    );
    let signal_id = ctx.store.insert_signal(&signal).map_err(store_err)?;

    if let Err(e) = submit_entry(
        ctx,
        signal_id,
        &hedge_token,
        order_price,
        budget.first_slice_usd,
        Some(best_ask),
    )
    .await
    {
        let _ = ctx
            .store
            .transition_order_status(signal_id, crate::store::OrderStatus::Failed, None);
        return Err(e);
    }
    ctx.store
        .update_signal_fee(signal_id, Decimal::ZERO, Decimal::ZERO)
        .map_err(store_err)?;

    let next = if ctx.config.dca.max_entries > 1 {
        ctx.store
            .update_dca_job(
                job.id,
                1,
                ctx.config.dca.max_entries,
                &dca_group_id,
                Some(budget.total_usd),
                Some(budget.first_slice_usd),
            )
            .map_err(store_err)?;
        JobStatus::DcaActive
    } else {
        JobStatus::Executed
    };
    ctx.store
        .update_job_status(job.id, next, None, Some(signal_id), false)
        .map_err(store_err)?;

    info!(
        job_id = job.id,
        slug = %job.event_slug,
        outcome = %hedge_outcome,
        price = %order_price,
        best_ask = %best_ask,
        slice = %budget.first_slice_usd,
        combined = %combined,
        signal_id,
        mode = %ctx.config.mode,
        "Hedge entry placed"
    );

    ctx.notifier
        .notify_hedge(
            &hedge_outcome,
            &job.event_slug,
            order_price,
            best_ask,
            budget.first_slice_usd,
            dir_vwap,
            combined,
        )
        .await;

    Ok(JobOutcome::new(job, Disposition::Executed).with_signal(signal_id))
}

/// Signals of the paired directional job's DCA group.
fn directional_signals(ctx: &TickContext<'_>, job: &TradeJob) -> Result<Vec<Signal>, StoreError> {
    let Some(paired_id) = job.paired_job_id else {
        return Ok(Vec::new());
    };
    let paired = ctx.store.get_job(paired_id)?;
    match paired.dca_group_id {
        Some(group) => ctx.store.signals_for_dca_group(&group),
        None => Ok(Vec::new()),
    }
}

/// Merge-only sizing: hold enough of the other side to pair off the
/// directional inventory, capped like any other position.
fn merge_only_size(dir_cost: Decimal, ctx: &TickContext<'_>, _combined: &Decimal) -> SizingResult {
    let size = dir_cost
        .min(ctx.config.sizing.max_position_usd)
        .max(Decimal::ZERO)
        .round_dp(2);
    SizingResult {
        size_usd: size,
        shares: Decimal::ZERO,
        raw_kelly_usd: Decimal::ZERO,
        kelly_fraction: Decimal::ZERO,
        confidence_multiplier: Decimal::ZERO,
        binding: crate::sizing::Binding::MaxPosition,
        liquidity_score: crate::sizing::LiquidityScore::Medium,
    }
}

fn to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

fn store_err(e: StoreError) -> MarketError {
    MarketError::Permanent(e.to_string())
}
