//! Typed rows and status enums for the store.
//!
//! Status enums validate their own transitions; the query layer refuses
//! writes that would move a row outside the allowed graph.

use chrono::{DateTime, Utc};
use court_common::LegSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Job lifecycle states.
///
/// Terminal: executed, failed, skipped, expired, cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Executing,
    DcaActive,
    Executed,
    Failed,
    Skipped,
    Expired,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Executing => "executing",
            JobStatus::DcaActive => "dca_active",
            JobStatus::Executed => "executed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Expired => "expired",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Executed
                | JobStatus::Failed
                | JobStatus::Skipped
                | JobStatus::Expired
                | JobStatus::Cancelled
        )
    }

    /// The allowed transition set.
    ///
    /// `failed → pending` covers transient-error retry; both the DCA
    /// completion and window-expiry paths land in `executed`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Pending, Expired)
                | (Pending, Cancelled)
                | (Executing, Executed)
                | (Executing, DcaActive)
                | (Executing, Failed)
                | (Executing, Skipped)
                | (Executing, Pending)
                | (DcaActive, Executed)
                | (Failed, Pending)
                | (Failed, Expired)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "executing" => Ok(JobStatus::Executing),
            "dca_active" => Ok(JobStatus::DcaActive),
            "executed" => Ok(JobStatus::Executed),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            "expired" => Ok(JobStatus::Expired),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("unknown job status: {}", s)),
        }
    }
}

/// Order lifecycle states on a signal. Never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Placed,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
    Failed,
    /// Paper-mode fill at the signal price; terminal.
    Paper,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Placed => "placed",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
            OrderStatus::Failed => "failed",
            OrderStatus::Paper => "paper",
        }
    }

    /// Whether the signal holds (or will hold) inventory.
    pub fn holds_inventory(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::PartiallyFilled | OrderStatus::Paper
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Failed
                | OrderStatus::Paper
        )
    }

    /// Monotone transitions only: a filled order can never become placed
    /// again, partial fills can only complete or die.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Placed)
                | (Pending, Paper)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Placed, PartiallyFilled)
                | (Placed, Filled)
                | (Placed, Cancelled)
                | (Placed, Expired)
                | (Placed, Failed)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
                | (PartiallyFilled, Expired)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "placed" => Ok(OrderStatus::Placed),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "expired" => Ok(OrderStatus::Expired),
            "failed" => Ok(OrderStatus::Failed),
            "paper" => Ok(OrderStatus::Paper),
            _ => Err(format!("unknown order status: {}", s)),
        }
    }
}

/// Merge progress on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    None,
    Eligible,
    Simulated,
    Executed,
    Failed,
    Skipped,
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStatus::None => "none",
            MergeStatus::Eligible => "eligible",
            MergeStatus::Simulated => "simulated",
            MergeStatus::Executed => "executed",
            MergeStatus::Failed => "failed",
            MergeStatus::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for MergeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MergeStatus::None),
            "eligible" => Ok(MergeStatus::Eligible),
            "simulated" => Ok(MergeStatus::Simulated),
            "executed" => Ok(MergeStatus::Executed),
            "failed" => Ok(MergeStatus::Failed),
            "skipped" => Ok(MergeStatus::Skipped),
            _ => Err(format!("unknown merge status: {}", s)),
        }
    }
}

/// Merge operation row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOpStatus {
    Pending,
    Simulated,
    Executed,
    Failed,
}

impl MergeOpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOpStatus::Pending => "pending",
            MergeOpStatus::Simulated => "simulated",
            MergeOpStatus::Executed => "executed",
            MergeOpStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MergeOpStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MergeOpStatus::Pending),
            "simulated" => Ok(MergeOpStatus::Simulated),
            "executed" => Ok(MergeOpStatus::Executed),
            "failed" => Ok(MergeOpStatus::Failed),
            _ => Err(format!("unknown merge op status: {}", s)),
        }
    }
}

/// Circuit-breaker level, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum RiskLevel {
    #[default]
    Green,
    Yellow,
    Orange,
    Red,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Green => "GREEN",
            RiskLevel::Yellow => "YELLOW",
            RiskLevel::Orange => "ORANGE",
            RiskLevel::Red => "RED",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GREEN" => Ok(RiskLevel::Green),
            "YELLOW" => Ok(RiskLevel::Yellow),
            "ORANGE" => Ok(RiskLevel::Orange),
            "RED" => Ok(RiskLevel::Red),
            _ => Err(format!("unknown risk level: {}", s)),
        }
    }
}

/// One row per (game, leg).
#[derive(Debug, Clone)]
pub struct TradeJob {
    pub id: i64,
    pub game_date: String,
    pub event_slug: String,
    pub home_team: String,
    pub away_team: String,
    pub tipoff_utc: DateTime<Utc>,
    pub execute_after: DateTime<Utc>,
    pub execute_before: DateTime<Utc>,
    pub leg_side: LegSide,
    pub status: JobStatus,
    pub signal_id: Option<i64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub dca_entries_count: u32,
    pub dca_max_entries: u32,
    pub dca_group_id: Option<String>,
    pub dca_total_budget: Option<Decimal>,
    pub dca_slice_size: Option<Decimal>,
    pub paired_job_id: Option<i64>,
    pub bothside_group_id: Option<String>,
    pub merge_status: MergeStatus,
    pub merge_operation_id: Option<i64>,
}

/// One row per placed order intent.
#[derive(Debug, Clone)]
pub struct Signal {
    pub id: i64,
    pub job_id: i64,
    pub event_slug: String,
    pub game_title: String,
    pub team: String,
    pub price: Decimal,
    pub size_usd: Decimal,
    pub token_id: String,
    pub condition_id: Option<String>,
    pub signal_role: LegSide,
    pub dca_group_id: String,
    pub dca_sequence: u32,
    pub bothside_group_id: Option<String>,
    pub expected_win_rate: f64,
    pub edge_pct: Decimal,
    pub price_band: String,
    pub in_sweet_spot: bool,
    pub liquidity_score: String,
    pub constraint_binding: String,
    pub order_id: Option<String>,
    pub order_status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub order_placed_at: Option<DateTime<Utc>>,
    pub order_original_price: Option<Decimal>,
    pub order_replace_count: u32,
    pub fee_rate_bps: Decimal,
    pub fee_usd: Decimal,
    pub shares_merged: Decimal,
    pub merge_recovery_usd: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Fill price when known, otherwise the signal price (paper fills).
    pub fn effective_price(&self) -> Decimal {
        self.fill_price.unwrap_or(self.price)
    }

    /// Shares bought by this signal.
    pub fn shares(&self) -> Decimal {
        let price = self.effective_price();
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.size_usd / price
    }

    /// Shares still held after merges.
    pub fn remaining_shares(&self) -> Decimal {
        (self.shares() - self.shares_merged).max(Decimal::ZERO)
    }
}

/// Append-only order lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEventType {
    Placed,
    Filled,
    PartiallyFilled,
    Cancelled,
    Replaced,
    Expired,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventType::Placed => "placed",
            OrderEventType::Filled => "filled",
            OrderEventType::PartiallyFilled => "partially_filled",
            OrderEventType::Cancelled => "cancelled",
            OrderEventType::Replaced => "replaced",
            OrderEventType::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub id: i64,
    pub signal_id: i64,
    pub event_type: String,
    pub order_id: Option<String>,
    pub price: Option<Decimal>,
    pub old_price: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// One row per redeem call (on-chain or simulated).
#[derive(Debug, Clone)]
pub struct MergeOperation {
    pub id: i64,
    pub bothside_group_id: String,
    pub condition_id: String,
    pub event_slug: String,
    pub dir_shares: Decimal,
    pub hedge_shares: Decimal,
    pub merge_amount: Decimal,
    pub remainder_shares: Decimal,
    pub remainder_side: Option<LegSide>,
    pub dir_vwap: Decimal,
    pub hedge_vwap: Decimal,
    pub combined_vwap: Decimal,
    pub gross_profit_usd: Option<Decimal>,
    pub gas_cost_usd: Option<Decimal>,
    pub net_profit_usd: Option<Decimal>,
    pub status: MergeOpStatus,
    pub tx_hash: Option<String>,
    pub error_message: Option<String>,
}

/// One row per settled signal.
#[derive(Debug, Clone)]
pub struct TradeResult {
    pub id: i64,
    pub signal_id: i64,
    pub won: bool,
    pub pnl_usd: Decimal,
    pub settlement_price: Decimal,
    pub score_home: Option<u32>,
    pub score_away: Option<u32>,
    pub settled_at: DateTime<Utc>,
}

/// Durable circuit-breaker state between ticks.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub id: i64,
    pub checked_at: DateTime<Utc>,
    pub level: RiskLevel,
    /// When the current level was entered; dwell times key off this.
    pub level_since: DateTime<Utc>,
    pub sizing_multiplier: Decimal,
    pub daily_pnl: Decimal,
    pub weekly_pnl: Decimal,
    pub consecutive_losses: u32,
    pub max_drawdown_pct: Decimal,
    pub drift_z_max: f64,
    pub degraded: bool,
    /// Operator acknowledgement required for RED recovery.
    pub manual_ack: bool,
    pub lockout_until: Option<DateTime<Utc>>,
    pub last_balance_usd: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminal_set() {
        assert!(JobStatus::Executed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
        assert!(JobStatus::Expired.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Executing.is_terminal());
        assert!(!JobStatus::DcaActive.is_terminal());
    }

    #[test]
    fn test_job_transitions_allowed() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Executed));
        assert!(Executing.can_transition_to(DcaActive));
        assert!(Executing.can_transition_to(Failed));
        assert!(Executing.can_transition_to(Skipped));
        assert!(DcaActive.can_transition_to(Executed));
        assert!(Pending.can_transition_to(Expired));
        assert!(Failed.can_transition_to(Expired));
        assert!(Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_job_transitions_rejected() {
        use JobStatus::*;
        assert!(!Executed.can_transition_to(Pending));
        assert!(!Expired.can_transition_to(Executing));
        assert!(!Pending.can_transition_to(Executed));
        assert!(!Pending.can_transition_to(DcaActive));
        assert!(!DcaActive.can_transition_to(Expired));
        assert!(!Skipped.can_transition_to(Pending));
    }

    #[test]
    fn test_order_status_no_regression() {
        use OrderStatus::*;
        assert!(Placed.can_transition_to(Filled));
        assert!(Placed.can_transition_to(PartiallyFilled));
        assert!(PartiallyFilled.can_transition_to(Filled));
        assert!(!Filled.can_transition_to(Placed));
        assert!(!Filled.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Placed));
        assert!(!Paper.can_transition_to(Placed));
    }

    #[test]
    fn test_status_round_trips() {
        for s in [
            "pending", "executing", "dca_active", "executed", "failed", "skipped", "expired",
            "cancelled",
        ] {
            assert_eq!(s.parse::<JobStatus>().unwrap().as_str(), s);
        }
        for s in [
            "pending", "placed", "partially_filled", "filled", "cancelled", "expired", "failed",
            "paper",
        ] {
            assert_eq!(s.parse::<OrderStatus>().unwrap().as_str(), s);
        }
        for s in ["GREEN", "YELLOW", "ORANGE", "RED"] {
            assert_eq!(s.parse::<RiskLevel>().unwrap().as_str(), s);
        }
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Green < RiskLevel::Yellow);
        assert!(RiskLevel::Yellow < RiskLevel::Orange);
        assert!(RiskLevel::Orange < RiskLevel::Red);
    }

    #[test]
    fn test_signal_share_math() {
        use rust_decimal_macros::dec;
        let mut sig = Signal {
            id: 1,
            job_id: 1,
            event_slug: "nba-bos-lal-2026-01-15".into(),
            game_title: "t".into(),
            team: "LAL".into(),
            price: dec!(0.40),
            size_usd: dec!(100),
            token_id: "tok".into(),
            condition_id: None,
            signal_role: LegSide::Directional,
            dca_group_id: "g".into(),
            dca_sequence: 1,
            bothside_group_id: None,
            expected_win_rate: 0.7,
            edge_pct: dec!(30),
            price_band: "0.40-0.45".into(),
            in_sweet_spot: true,
            liquidity_score: "high".into(),
            constraint_binding: "kelly".into(),
            order_id: None,
            order_status: OrderStatus::Paper,
            fill_price: None,
            order_placed_at: None,
            order_original_price: None,
            order_replace_count: 0,
            fee_rate_bps: dec!(0),
            fee_usd: dec!(0),
            shares_merged: dec!(0),
            merge_recovery_usd: dec!(0),
            created_at: Utc::now(),
        };
        assert_eq!(sig.shares(), dec!(250));
        sig.fill_price = Some(dec!(0.50));
        assert_eq!(sig.shares(), dec!(200));
        sig.shares_merged = dec!(150);
        assert_eq!(sig.remaining_shares(), dec!(50));
        sig.shares_merged = dec!(500);
        assert_eq!(sig.remaining_shares(), dec!(0));
    }
}
