//! Directional (initial entry) executor.

use chrono::{Duration, Utc};
use court_market::{LiquiditySnapshot, MarketError};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ExecutionMode;
use crate::risk::RiskVerdict;
use crate::scheduler::preflight::preflight_check;
use crate::scheduler::pricing::below_market_price;
use crate::scheduler::{
    fail_or_requeue, first_entry_signal, submit_entry, Disposition, JobOutcome, TickContext,
};
use crate::sizing::{dca_budget, size_position, SizingInputs};
use crate::store::{JobStatus, OrderStatus, StoreError, TradeJob};
use crate::strategy::evaluate_game;

/// Drive one directional job from `pending` to a terminal-or-parked state.
pub async fn process_directional_job(
    ctx: &TickContext<'_>,
    job: &TradeJob,
    risk: &RiskVerdict,
) -> Result<JobOutcome, StoreError> {
    // CAS claim: the loser of a race sees zero rows and walks away.
    if !ctx.store.claim_job(job.id)? {
        return Ok(JobOutcome::new(job, Disposition::Deferred).with_note("claim_lost"));
    }

    match run(ctx, job, risk).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(job_id = job.id, slug = %job.event_slug, error = %err, "Directional job errored");
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
        info!(job_id = job.id, slug = %job.event_slug, note, "Directional job skipped");
        Ok(JobOutcome::new(job, Disposition::Skipped).with_note(note.to_string()))
    };

    // 1. Latest market.
    let Some(market) = ctx
        .client
        .get_moneyline(&job.away_team, &job.home_team, &job.game_date)
        .await?
    else {
        return skip("no moneyline market");
    };

    // 2. Calibration pass over both outcomes.
    let Some(eval) = evaluate_game(&market, ctx.curve) else {
        return skip("no positive EV");
    };
    let opp = &eval.directional;

    // 3. Book snapshot for the chosen side.
    let liquidity = fetch_liquidity(ctx, &opp.token_id).await;
    let best_ask = liquidity
        .as_ref()
        .map(|l| l.best_ask)
        .filter(|a| *a > Decimal::ZERO)
        .unwrap_or(opp.price);

    // 4. Size the whole DCA budget up front.
    let balance = super::fetch_balance(ctx).await;
    let sized = size_position(
        &SizingInputs {
            bankroll_usd: balance.unwrap_or(ctx.config.sizing.paper_bankroll_usd),
            best_ask,
            lower_bound_wr: opp.estimate.lower_bound,
            point_wr: opp.estimate.point_estimate,
            risk_multiplier: risk.sizing_multiplier(),
            liquidity: liquidity.as_ref(),
        },
        &ctx.config.sizing,
    );
    if sized.is_zero() {
        return skip(&format!("zero size ({})", sized.binding.as_str()));
    }
    let budget = dca_budget(&sized, ctx.config.dca.max_entries);
    if budget.first_slice_usd <= Decimal::ZERO {
        return skip("DCA budget is zero");
    }

    let limit_price = below_market_price(best_ask);

    // 5. Dry-run stops before any side effects.
    if ctx.config.mode == ExecutionMode::DryRun {
        info!(
            job_id = job.id,
            slug = %job.event_slug,
            outcome = %opp.outcome_name,
            price = %limit_price,
            slice = %budget.first_slice_usd,
            total = %budget.total_usd,
            binding = budget.binding.as_str(),
            "[dry-run] would place directional entry"
        );
        return skip("dry-run mode");
    }

    // 6. Live-mode preflight; veto fails the job without a signal.
    if ctx.config.mode == ExecutionMode::Live {
        if let Err(veto) = preflight_check(
            ctx.store,
            ctx.client,
            ctx.config,
            &job.event_slug,
            budget.first_slice_usd,
            Utc::now(),
        )
        .await
        {
            ctx.store
                .update_job_status(job.id, JobStatus::Failed, Some(veto.message()), None, true)
                .map_err(store_err)?;
            return Ok(JobOutcome::new(job, Disposition::Failed).with_note(veto.message().to_string()));
        }
    }

    // 7. Duplicate guard, then the signal row.
    if ctx.store.has_signal_for_sequence(job.id, 1).map_err(store_err)? {
        return skip("entry already recorded");
    }
    let dca_group_id = Uuid::new_v4().to_string();
    let signal = first_entry_signal(
        job,
        &market.title,
        &opp.outcome_name,
        &opp.token_id,
        Some(market.condition_id.clone()),
        limit_price,
        budget.first_slice_usd,
        court_common::LegSide::Directional,
        dca_group_id.clone(),
        &opp.estimate,
        opp.edge_pct(),
        opp.in_sweet_spot,
        liquidity.as_ref(),
        sized.liquidity_score.as_str(),
        balance,
        budget.binding.as_str(),
    );
    let signal_id = ctx.store.insert_signal(&signal).map_err(store_err)?;

    // 8. Place (or paper-fill). A failed placement closes the signal so
    //    the job's retry gets a fresh row.
    if let Err(e) = submit_entry(
        ctx,
        signal_id,
        &opp.token_id,
        limit_price,
        budget.first_slice_usd,
        liquidity.as_ref().map(|l| l.best_ask),
    )
    .await
    {
        let _ = ctx
            .store
            .transition_order_status(signal_id, OrderStatus::Failed, None);
        return Err(e);
    }
    ctx.store
        .update_signal_fee(signal_id, Decimal::ZERO, Decimal::ZERO)
        .map_err(store_err)?;

    // 9. Queue the hedge leg. The hedge executor re-derives its own
    //    ceiling at dispatch time, so it is scheduled unconditionally.
    //    The signal above predates the group id; back-fill it so merge
    //    reconciliation sees both legs.
    if ctx.config.bothside.enabled {
        let hedge_after = Utc::now() + Duration::minutes(ctx.config.bothside.hedge_delay_min);
        let group = Uuid::new_v4().to_string();
        if let Some(hedge_id) = ctx
            .store
            .insert_hedge_job(job, hedge_after, &group)
            .map_err(store_err)?
        {
            ctx.store
                .set_signal_bothside_group(signal_id, &group)
                .map_err(store_err)?;
            info!(
                hedge_job_id = hedge_id,
                slug = %job.event_slug,
                execute_after = %hedge_after,
                "Hedge job scheduled"
            );
        }
    }

    // 10. Terminal transition for this tick.
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
        outcome = %opp.outcome_name,
        price = %limit_price,
        slice = %budget.first_slice_usd,
        total = %budget.total_usd,
        signal_id,
        next = next.as_str(),
        mode = %ctx.config.mode,
        "Directional entry placed"
    );

    ctx.notifier
        .notify_trade(
            &opp.outcome_name,
            &job.event_slug,
            limit_price,
            best_ask,
            budget.first_slice_usd,
            opp.edge_pct(),
            1,
            ctx.config.dca.max_entries,
        )
        .await;

    Ok(JobOutcome::new(job, Disposition::Executed).with_signal(signal_id))
}

pub(crate) async fn fetch_liquidity(
    ctx: &TickContext<'_>,
    token_id: &str,
) -> Option<LiquiditySnapshot> {
    if !ctx.config.sizing.check_liquidity {
        return None;
    }
    match ctx.client.get_order_book(token_id).await {
        Ok(book) => LiquiditySnapshot::extract(&book, token_id),
        Err(e) => {
            warn!(token_id, error = %e, "Order book fetch failed, sizing without liquidity");
            None
        }
    }
}

fn store_err(e: StoreError) -> MarketError {
    MarketError::Permanent(e.to_string())
}
