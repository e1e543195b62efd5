//! Merge (redeem) executor.
//!
//! For every bothside pair with both legs done buying, compute the
//! matched inventory and combined VWAP, run the economics gate, then
//! redeem on-chain (live) or simulate (paper / dry-run). Recovery profit
//! is credited per signal in proportion to each signal's contribution to
//! the merged shares, so settlement later needs no group context.

use court_common::LegSide;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::config::ExecutionMode;
use crate::scheduler::{Disposition, JobOutcome, TickContext};
use crate::store::{
    MergeCandidate, MergeOpStatus, MergeStatus, NewMergeOperation, Signal, Store, StoreError,
    TradeJob,
};
use crate::strategy::{should_merge, MergeEconomics};

/// Process all merge-eligible bothside pairs.
pub async fn process_merges(ctx: &TickContext<'_>) -> Result<Vec<JobOutcome>, StoreError> {
    if !ctx.config.merge.enabled {
        return Ok(Vec::new());
    }
    let candidates = ctx.store.merge_candidate_pairs(false)?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    info!(count = candidates.len(), "Merge candidate pairs found");

    let mut outcomes = Vec::new();
    for candidate in candidates {
        match process_pair(ctx, &candidate).await {
            Ok(Some(outcome)) => outcomes.push(outcome),
            Ok(None) => {}
            Err(e) => {
                warn!(group = %candidate.bothside_group_id, error = %e, "Merge pass errored");
            }
        }
    }
    Ok(outcomes)
}

async fn process_pair(
    ctx: &TickContext<'_>,
    candidate: &MergeCandidate,
) -> Result<Option<JobOutcome>, StoreError> {
    let dir_job = ctx.store.get_job(candidate.dir_job_id)?;
    let hedge_job = ctx.store.get_job(candidate.hedge_job_id)?;

    // A previous on-chain failure retries until the budget is spent.
    if dir_job.merge_status == MergeStatus::Failed
        && dir_job.retry_count >= ctx.config.merge.max_retries
    {
        mark_pair(ctx.store, &dir_job, &hedge_job, MergeStatus::Skipped, None)?;
        return Ok(Some(
            JobOutcome::new(&dir_job, Disposition::Skipped).with_note("merge retries exhausted"),
        ));
    }

    let signals = ctx
        .store
        .signals_for_bothside_group(&candidate.bothside_group_id)?;
    let dir_signals: Vec<Signal> = signals
        .iter()
        .filter(|s| s.signal_role == LegSide::Directional)
        .cloned()
        .collect();
    let hedge_signals: Vec<Signal> = signals
        .iter()
        .filter(|s| s.signal_role == LegSide::Hedge)
        .cloned()
        .collect();
    if dir_signals.is_empty() || hedge_signals.is_empty() {
        warn!(group = %candidate.bothside_group_id, "Merge pair missing a leg's signals");
        return Ok(None);
    }

    // Live merges only touch settled inventory; resting orders wait.
    if ctx.config.mode == ExecutionMode::Live {
        let unfilled = signals
            .iter()
            .filter(|s| !s.order_status.is_terminal())
            .count();
        if unfilled > 0 {
            info!(
                group = %candidate.bothside_group_id,
                unfilled,
                "Merge waiting for fills"
            );
            return Ok(None);
        }
    }

    let Some(condition_id) = dir_signals.iter().find_map(|s| s.condition_id.clone()) else {
        info!(group = %candidate.bothside_group_id, "Merge skip: no condition id");
        mark_pair(ctx.store, &dir_job, &hedge_job, MergeStatus::Skipped, None)?;
        return Ok(Some(
            JobOutcome::new(&dir_job, Disposition::Skipped).with_note("no condition id"),
        ));
    };

    let economics = MergeEconomics::from_signals(&dir_signals, &hedge_signals);

    // Gas: live estimate with configured fallback.
    let est_gas = match ctx.config.mode {
        ExecutionMode::Live => match ctx
            .client
            .estimate_merge_gas_usd(&condition_id, economics.merge_amount)
            .await
        {
            Ok(gas) => gas,
            Err(e) => {
                warn!(group = %candidate.bothside_group_id, error = %e, "Gas estimate failed, using configured value");
                ctx.config.merge.est_gas_usd
            }
        },
        _ => ctx.config.merge.est_gas_usd,
    };

    let wallet_supported = true; // unsupported wallets are rejected at startup
    let decision = should_merge(&economics, &ctx.config.merge, est_gas, wallet_supported);
    if !decision.approved() {
        info!(
            group = %candidate.bothside_group_id,
            reason = decision.reason(),
            combined = %economics.combined_vwap,
            amount = %economics.merge_amount,
            "Merge skipped"
        );
        mark_pair(ctx.store, &dir_job, &hedge_job, MergeStatus::Skipped, None)?;
        return Ok(Some(
            JobOutcome::new(&dir_job, Disposition::Skipped).with_note(decision.reason()),
        ));
    }

    let gross = economics.gross_profit();
    let op_id = ctx.store.insert_merge_operation(&NewMergeOperation {
        bothside_group_id: candidate.bothside_group_id.clone(),
        condition_id: condition_id.clone(),
        event_slug: dir_job.event_slug.clone(),
        dir_shares: economics.dir_shares,
        hedge_shares: economics.hedge_shares,
        merge_amount: economics.merge_amount,
        remainder_shares: economics.remainder_shares,
        remainder_side: economics.remainder_side,
        dir_vwap: economics.dir_vwap,
        hedge_vwap: economics.hedge_vwap,
        combined_vwap: economics.combined_vwap,
        gross_profit_usd: gross,
        gas_cost_usd: est_gas,
        net_profit_usd: gross - est_gas,
    })?;

    if ctx.config.mode == ExecutionMode::Live {
        match ctx
            .client
            .merge_positions(&condition_id, economics.merge_amount)
            .await
        {
            Ok(receipt) => {
                let net = gross - receipt.gas_cost_usd;
                ctx.store.finalize_merge_operation(
                    op_id,
                    MergeOpStatus::Executed,
                    Some(&receipt.tx_hash),
                    Some(receipt.gas_cost_usd),
                    Some(net),
                    None,
                )?;
                credit_signals(ctx.store, &economics, &dir_signals, &hedge_signals)?;
                mark_pair(ctx.store, &dir_job, &hedge_job, MergeStatus::Executed, Some(op_id))?;
                info!(
                    group = %candidate.bothside_group_id,
                    amount = %economics.merge_amount,
                    net = %net,
                    tx = %receipt.tx_hash,
                    "Merge executed"
                );
                ctx.notifier
                    .notify_merge(&dir_job.event_slug, economics.merge_amount, economics.combined_vwap, net)
                    .await;
                Ok(Some(JobOutcome::new(&dir_job, Disposition::Executed)))
            }
            Err(e) => {
                ctx.store.finalize_merge_operation(
                    op_id,
                    MergeOpStatus::Failed,
                    None,
                    None,
                    None,
                    Some(&e.to_string()),
                )?;
                mark_pair(ctx.store, &dir_job, &hedge_job, MergeStatus::Failed, Some(op_id))?;
                warn!(group = %candidate.bothside_group_id, error = %e, "Merge failed");
                Ok(Some(JobOutcome::new(&dir_job, Disposition::Failed).with_note(e.to_string())))
            }
        }
    } else {
        // Paper / dry-run: record the simulation and credit immediately.
        ctx.store.finalize_merge_operation(
            op_id,
            MergeOpStatus::Simulated,
            Some("simulated"),
            Some(est_gas),
            Some(gross - est_gas),
            None,
        )?;
        credit_signals(ctx.store, &economics, &dir_signals, &hedge_signals)?;
        mark_pair(ctx.store, &dir_job, &hedge_job, MergeStatus::Simulated, Some(op_id))?;
        info!(
            group = %candidate.bothside_group_id,
            amount = %economics.merge_amount,
            combined = %economics.combined_vwap,
            net = %(gross - est_gas),
            mode = %ctx.config.mode,
            "Merge simulated"
        );
        ctx.notifier
            .notify_merge(
                &dir_job.event_slug,
                economics.merge_amount,
                economics.combined_vwap,
                gross - est_gas,
            )
            .await;
        Ok(Some(JobOutcome::new(&dir_job, Disposition::Executed)))
    }
}

/// Distribute `shares_merged` and the recovery profit across signals.
///
/// Each leg contributes `merge_amount` shares, so a signal's share of the
/// credit is its fraction of its own leg's inventory, halved across the
/// two legs. Total credited recovery equals
/// `merge_amount * (1 - combined_vwap)` exactly (modulo rounding).
fn credit_signals(
    store: &Store,
    economics: &MergeEconomics,
    dir_signals: &[Signal],
    hedge_signals: &[Signal],
) -> Result<(), StoreError> {
    let gross = economics.gross_profit();
    for (signals, leg_shares) in [
        (dir_signals, economics.dir_shares),
        (hedge_signals, economics.hedge_shares),
    ] {
        if leg_shares <= Decimal::ZERO {
            continue;
        }
        for sig in signals {
            if !sig.order_status.holds_inventory() {
                continue;
            }
            let fraction = sig.remaining_shares() / leg_shares;
            let merged = economics.merge_amount * fraction;
            let recovery = gross * fraction / dec!(2);
            if merged <= Decimal::ZERO {
                continue;
            }
            store.credit_signal_merge(sig.id, merged.round_dp(6), recovery.round_dp(6))?;
        }
    }
    Ok(())
}

fn mark_pair(
    store: &Store,
    dir_job: &TradeJob,
    hedge_job: &TradeJob,
    status: MergeStatus,
    op_id: Option<i64>,
) -> Result<(), StoreError> {
    store.update_job_merge_status(dir_job.id, status, op_id)?;
    store.update_job_merge_status(hedge_job.id, status, op_id)?;
    Ok(())
}
