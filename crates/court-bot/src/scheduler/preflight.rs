//! Pre-trade checks for live order placement.
//!
//! Every veto here leaves the job `failed` without a signal; the limits
//! are operational backstops behind the sizer's own constraints.

use chrono::{DateTime, Utc};
use court_market::MarketClient;
use rust_decimal::Decimal;
use tracing::error;

use crate::config::BotConfig;
use crate::store::Store;

/// Why preflight vetoed the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightVeto {
    LowBalance(String),
    DailyPositionLimit(String),
    DailyExposureLimit(String),
    GameExposureLimit(String),
    TotalExposureLimit(String),
    CheckFailed(String),
}

impl PreflightVeto {
    pub fn message(&self) -> &str {
        match self {
            PreflightVeto::LowBalance(m)
            | PreflightVeto::DailyPositionLimit(m)
            | PreflightVeto::DailyExposureLimit(m)
            | PreflightVeto::GameExposureLimit(m)
            | PreflightVeto::TotalExposureLimit(m)
            | PreflightVeto::CheckFailed(m) => m,
        }
    }
}

/// Run the live-mode pre-trade checks for one intended order.
pub async fn preflight_check(
    store: &Store,
    client: &dyn MarketClient,
    config: &BotConfig,
    event_slug: &str,
    intended_usd: Decimal,
    now: DateTime<Utc>,
) -> Result<(), PreflightVeto> {
    let limits = &config.schedule;

    let balance = client
        .get_balance()
        .await
        .map_err(|e| PreflightVeto::CheckFailed(format!("balance fetch failed: {e}")))?;
    if balance < limits.min_balance_usd {
        return Err(PreflightVeto::LowBalance(format!(
            "balance ${balance:.2} < minimum ${:.2}",
            limits.min_balance_usd
        )));
    }

    let today = now.format("%Y-%m-%d").to_string();
    let order_count = store
        .live_order_count_for_date(&today)
        .map_err(check_failed)?;
    if order_count >= limits.max_daily_positions {
        return Err(PreflightVeto::DailyPositionLimit(format!(
            "daily position limit reached: {order_count}/{}",
            limits.max_daily_positions
        )));
    }

    // Placed exposure plus the unfilled remainder of every open DCA
    // budget: committed money, whether or not it has hit the book yet.
    let placed = store.exposure_for_date(&today).map_err(check_failed)?;
    let pending_dca = store.pending_dca_remainder().map_err(check_failed)?;
    let potential = placed + pending_dca + intended_usd;
    if potential >= limits.max_daily_exposure_usd {
        let veto = PreflightVeto::DailyExposureLimit(format!(
            "potential daily exposure ${potential:.0} (${placed:.0} placed + ${pending_dca:.0} pending DCA) >= ${:.0}",
            limits.max_daily_exposure_usd
        ));
        error!(veto = veto.message(), "Preflight veto");
        return Err(veto);
    }

    let game = store.game_exposure(event_slug).map_err(check_failed)?;
    if game + intended_usd > limits.max_game_exposure_usd {
        return Err(PreflightVeto::GameExposureLimit(format!(
            "game exposure ${:.0} would exceed ${:.0}",
            game + intended_usd,
            limits.max_game_exposure_usd
        )));
    }

    let open = store.open_exposure().map_err(check_failed)?;
    if open + intended_usd > limits.max_total_exposure_usd {
        return Err(PreflightVeto::TotalExposureLimit(format!(
            "total exposure ${:.0} would exceed ${:.0}",
            open + intended_usd,
            limits.max_total_exposure_usd
        )));
    }

    Ok(())
}

fn check_failed(e: crate::store::StoreError) -> PreflightVeto {
    PreflightVeto::CheckFailed(e.to_string())
}
