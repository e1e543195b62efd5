//! DCA follow-on executor.
//!
//! Walks every `dca_active` job still inside its window, asks the cadence
//! logic whether an entry fires, sizes it with the target-holding sizer,
//! and places the order. Completion (max entries, cutoff, target reached,
//! or budget exhausted) always lands the job in `executed`.

use chrono::Utc;
use court_common::LegSide;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::ExecutionMode;
use crate::risk::RiskVerdict;
use crate::scheduler::directional::fetch_liquidity;
use crate::scheduler::pricing::{apply_price_ceiling, below_market_price};
use crate::scheduler::{submit_entry, Disposition, JobOutcome, TickContext};
use crate::sizing::target_order_size;
use crate::store::{JobStatus, NewSignal, OrderStatus, Signal, StoreError, TradeJob};
use crate::strategy::dca::{should_add_entry, DcaEntry, DcaTrigger};
use crate::strategy::min_margin;

/// Process all DCA-active jobs for this tick.
pub async fn process_dca_jobs(
    ctx: &TickContext<'_>,
    risk: &RiskVerdict,
) -> Result<Vec<JobOutcome>, StoreError> {
    let now = Utc::now();
    let jobs = ctx.store.dca_active_jobs(now)?;
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    if !risk.allows_dca_entries(&ctx.config.risk) {
        info!(
            level = risk.level().as_str(),
            count = jobs.len(),
            "Risk level blocks DCA entries this tick"
        );
        return Ok(Vec::new());
    }

    info!(count = jobs.len(), "DCA-active jobs found");
    let max_per_tick = ctx.config.schedule.max_orders_per_tick;
    let mut outcomes = Vec::new();
    let mut orders_this_tick = 0usize;

    for job in jobs {
        if orders_this_tick >= max_per_tick {
            warn!("Per-tick order quota reached during DCA pass");
            break;
        }
        match process_one(ctx, &job).await {
            Ok(Some(outcome)) => {
                if outcome.disposition == Disposition::Executed {
                    orders_this_tick += 1;
                }
                outcomes.push(outcome);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(job_id = job.id, slug = %job.event_slug, error = %e, "DCA pass errored");
                outcomes.push(
                    JobOutcome::new(&job, Disposition::Failed).with_note(e.to_string()),
                );
            }
        }
    }
    Ok(outcomes)
}

async fn process_one(
    ctx: &TickContext<'_>,
    job: &TradeJob,
) -> Result<Option<JobOutcome>, StoreError> {
    let now = Utc::now();
    let Some(group_id) = job.dca_group_id.clone() else {
        warn!(job_id = job.id, "DCA job without group id, skipping");
        return Ok(None);
    };
    let signals = ctx.store.signals_for_dca_group(&group_id)?;
    let Some(first) = signals.first() else {
        warn!(job_id = job.id, group = %group_id, "DCA group has no signals");
        return Ok(None);
    };
    let first = first.clone();

    // Latest price for the held outcome.
    let market = match ctx
        .client
        .get_moneyline(&job.away_team, &job.home_team, &job.game_date)
        .await
    {
        Ok(Some(m)) => m,
        Ok(None) => return Ok(None),
        Err(e) => {
            debug!(job_id = job.id, error = %e, "DCA price fetch failed this tick");
            return Ok(None);
        }
    };
    let (current_price, token_id) = match market
        .token_ids
        .iter()
        .position(|t| *t == first.token_id)
        .and_then(|i| market.prices.get(i).map(|p| (*p, market.token_ids[i].clone())))
        .or_else(|| {
            // Token rotation fallback: match by outcome name.
            market
                .outcome(&first.team)
                .map(|(_, p, t)| (p, t.to_string()))
        }) {
        Some(found) => found,
        None => {
            warn!(job_id = job.id, team = %first.team, "Cannot find current price for DCA job");
            return Ok(None);
        }
    };

    // Hedge legs keep respecting the combined ceiling while they average.
    if job.leg_side == LegSide::Hedge {
        if let Some(max_hedge) = hedge_ceiling(ctx, job)? {
            if current_price > max_hedge {
                debug!(
                    job_id = job.id,
                    price = %current_price,
                    max_hedge = %max_hedge,
                    "Hedge DCA deferred above combined ceiling"
                );
                return Ok(None);
            }
        }
    }

    // Cadence decision.
    let entries: Vec<DcaEntry> = signals
        .iter()
        .map(|s| DcaEntry {
            price: s.price,
            size_usd: s.size_usd,
            created_at: s.created_at,
        })
        .collect();
    let decision = should_add_entry(current_price, &entries, job.tipoff_utc, now, &ctx.config.dca);

    if !decision.should_buy {
        debug!(
            job_id = job.id,
            slug = %job.event_slug,
            trigger = decision.trigger.as_str(),
            price = %current_price,
            vwap = %decision.vwap,
            "No DCA entry"
        );
        if decision.trigger == DcaTrigger::MaxReached {
            complete_job(ctx, job, "max entries reached")?;
            return Ok(Some(JobOutcome::new(job, Disposition::Skipped).with_note("max_reached")));
        }
        if decision.trigger == DcaTrigger::WindowClosed {
            // Tipoff cutoff ends the group as complete, never expired.
            complete_job(ctx, job, "tipoff cutoff")?;
            return Ok(Some(JobOutcome::new(job, Disposition::Skipped).with_note("window_closed")));
        }
        return Ok(None);
    }

    // Target-holding sizing against the pre-computed budget.
    let Some(total_budget) = job.dca_total_budget else {
        warn!(job_id = job.id, "DCA job missing total budget, completing group");
        complete_job(ctx, job, "missing budget")?;
        return Ok(Some(JobOutcome::new(job, Disposition::Skipped).with_note("missing_budget")));
    };
    let costs: Vec<Decimal> = signals.iter().map(|s| s.size_usd).collect();
    let prices: Vec<Decimal> = signals.iter().map(|s| s.effective_price()).collect();
    let target = target_order_size(
        total_budget,
        &costs,
        &prices,
        current_price,
        job.dca_max_entries,
        signals.len() as u32,
        ctx.config.dca.per_entry_cap_mult,
        ctx.config.dca.min_order_usd,
    );
    if let Some(reason) = target.completion {
        complete_job(ctx, job, &format!("{:?}", reason))?;
        return Ok(Some(
            JobOutcome::new(job, Disposition::Skipped).with_note(format!("{:?}", reason)),
        ));
    }

    if ctx.config.mode == ExecutionMode::DryRun {
        info!(
            job_id = job.id,
            seq = decision.next_sequence,
            team = %first.team,
            price = %current_price,
            size = %target.order_usd,
            "[dry-run] would place DCA entry"
        );
        return Ok(Some(JobOutcome::new(job, Disposition::Skipped).with_note("dry-run")));
    }

    // Duplicate guard on (job, sequence).
    if ctx.store.has_signal_for_sequence(job.id, decision.next_sequence)? {
        debug!(job_id = job.id, seq = decision.next_sequence, "DCA sequence already recorded");
        return Ok(None);
    }

    // Order price: below-market, hedge ceiling still applied.
    let liquidity = fetch_liquidity(ctx, &token_id).await;
    let best_ask = liquidity
        .as_ref()
        .map(|l| l.best_ask)
        .filter(|a| *a > Decimal::ZERO)
        .unwrap_or(current_price);
    let mut order_price = below_market_price(best_ask);
    if job.leg_side == LegSide::Hedge {
        if let Some(max_hedge) = hedge_ceiling(ctx, job)? {
            order_price = apply_price_ceiling(order_price, max_hedge);
        }
    }

    let signal_id = ctx.store.insert_signal(&follow_on_signal(
        job,
        &first,
        &token_id,
        order_price,
        target.order_usd,
        decision.next_sequence,
    ))?;

    match submit_entry(ctx, signal_id, &token_id, order_price, target.order_usd, Some(best_ask)).await {
        Ok(_) => {}
        Err(e) => {
            warn!(job_id = job.id, signal_id, error = %e, "DCA order failed");
            let _ = ctx
                .store
                .transition_order_status(signal_id, OrderStatus::Failed, None);
            return Ok(Some(JobOutcome::new(job, Disposition::Failed).with_note(e.to_string())));
        }
    }
    ctx.store.update_signal_fee(signal_id, Decimal::ZERO, Decimal::ZERO)?;

    // Count the entry; completion by count lands in executed.
    let new_count = job.dca_entries_count + 1;
    ctx.store.increment_dca_entries(job.id, new_count)?;
    if new_count >= job.dca_max_entries {
        complete_job(ctx, job, "max entries reached")?;
    }

    info!(
        job_id = job.id,
        slug = %job.event_slug,
        seq = decision.next_sequence,
        of = job.dca_max_entries,
        trigger = decision.trigger.as_str(),
        price = %order_price,
        size = %target.order_usd,
        signal_id,
        mode = %ctx.config.mode,
        "DCA entry placed"
    );

    ctx.notifier
        .notify_dca(
            &first.team,
            &job.event_slug,
            order_price,
            target.order_usd,
            decision.vwap,
            decision.next_sequence,
            job.dca_max_entries,
            decision.trigger.as_str(),
        )
        .await;

    Ok(Some(JobOutcome::new(job, Disposition::Executed).with_signal(signal_id)))
}

/// Max hedge price from live directional inventory, as at first placement.
fn hedge_ceiling(ctx: &TickContext<'_>, job: &TradeJob) -> Result<Option<Decimal>, StoreError> {
    let Some(paired_id) = job.paired_job_id else {
        return Ok(None);
    };
    let paired = ctx.store.get_job(paired_id)?;
    let Some(group) = paired.dca_group_id else {
        return Ok(None);
    };
    let signals = ctx.store.signals_for_dca_group(&group)?;
    let filled: Vec<&Signal> = signals
        .iter()
        .filter(|s| s.order_status.holds_inventory())
        .collect();
    if filled.is_empty() {
        return Ok(None);
    }
    let costs: Vec<Decimal> = filled.iter().map(|s| s.size_usd).collect();
    let prices: Vec<Decimal> = filled.iter().map(|s| s.effective_price()).collect();
    let dir_vwap = court_common::vwap_from_costs(&costs, &prices);
    let dir_shares = court_common::shares_from_costs(&costs, &prices);
    if dir_vwap <= Decimal::ZERO {
        return Ok(None);
    }
    let margin = min_margin(dir_shares, &ctx.config.merge);
    let ceiling = (Decimal::ONE - dir_vwap - margin)
        .min(ctx.config.bothside.max_combined_vwap - dir_vwap);
    Ok(Some(ceiling))
}

fn complete_job(ctx: &TickContext<'_>, job: &TradeJob, why: &str) -> Result<(), StoreError> {
    ctx.store
        .update_job_status(job.id, JobStatus::Executed, None, None, false)?;
    info!(job_id = job.id, slug = %job.event_slug, why, "DCA group complete");
    Ok(())
}

fn follow_on_signal(
    job: &TradeJob,
    first: &Signal,
    token_id: &str,
    price: Decimal,
    size_usd: Decimal,
    sequence: u32,
) -> NewSignal {
    NewSignal {
        job_id: job.id,
        event_slug: first.event_slug.clone(),
        game_title: first.game_title.clone(),
        team: first.team.clone(),
        price,
        size_usd,
        token_id: token_id.to_string(),
        condition_id: first.condition_id.clone(),
        signal_role: job.leg_side,
        dca_group_id: first.dca_group_id.clone(),
        dca_sequence: sequence,
        bothside_group_id: first.bothside_group_id.clone(),
        expected_win_rate: first.expected_win_rate,
        edge_pct: first.edge_pct,
        price_band: first.price_band.clone(),
        in_sweet_spot: first.in_sweet_spot,
        liquidity_score: first.liquidity_score.clone(),
        ask_depth_5c: None,
        spread_pct: None,
        balance_usd_at_trade: None,
        constraint_binding: first.constraint_binding.clone(),
        order_status: OrderStatus::Pending,
    }
}
