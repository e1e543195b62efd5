//! Configuration for court-bot.
//!
//! Supports loading from TOML file with environment variable overrides.
//! All trading tunables are defined here with their operational defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Execution mode: dry-run, paper, live.
    pub mode: ExecutionMode,

    /// Logging level.
    pub log_level: String,

    /// Directory for the SQLite store, heartbeat file, and lock dirs.
    pub data_dir: String,

    /// Directory for daily-rolling log files.
    pub log_dir: String,

    /// Scheduling parameters.
    pub schedule: ScheduleConfig,

    /// Sizing parameters (Kelly + caps + liquidity).
    pub sizing: SizingConfig,

    /// DCA follow-on entry parameters.
    pub dca: DcaConfig,

    /// Both-side hedging parameters.
    pub bothside: BothsideConfig,

    /// Merge (redeem) parameters.
    pub merge: MergeConfig,

    /// Risk / circuit breaker parameters.
    pub risk: RiskConfig,

    /// Order lifecycle manager parameters.
    pub orders: OrderManagerConfig,

    /// Calibration curve parameters.
    pub calibration: CalibrationConfig,

    /// Wallet / chain credentials (env-only overrides).
    pub wallet: WalletConfig,

    /// Telegram notification credentials (optional).
    pub telegram: TelegramConfig,
}

/// Execution mode determines whether orders touch the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Log decisions only; no DB signals, no orders.
    DryRun,
    /// Record signals as paper fills; no real orders.
    #[default]
    Paper,
    /// Real maker orders with real money.
    Live,
}

impl ExecutionMode {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dry-run" | "dryrun" | "dry_run" => Some(ExecutionMode::DryRun),
            "paper" => Some(ExecutionMode::Paper),
            "live" => Some(ExecutionMode::Live),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ExecutionMode::Live)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::DryRun => write!(f, "dry-run"),
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Scheduler tick parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Hours before tipoff when the execution window opens.
    pub window_hours: i64,

    /// Maximum new orders placed per tick (runaway guard).
    pub max_orders_per_tick: usize,

    /// Transient-failure retries before a job is marked failed.
    pub max_retries: u32,

    /// Heartbeat staleness threshold for the watchdog (minutes).
    pub heartbeat_stale_min: i64,

    /// Daily cap on the number of live positions opened.
    pub max_daily_positions: usize,

    /// Daily cap on placed USD exposure (incl. unfilled DCA remainder).
    pub max_daily_exposure_usd: Decimal,

    /// Cap on cost basis committed to a single game across both legs.
    pub max_game_exposure_usd: Decimal,

    /// Cap on total open (unsettled) cost basis.
    pub max_total_exposure_usd: Decimal,

    /// Minimum wallet balance for live trading.
    pub min_balance_usd: Decimal,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            window_hours: 8,
            max_orders_per_tick: 3,
            max_retries: 3,
            heartbeat_stale_min: 35,
            max_daily_positions: 20,
            max_daily_exposure_usd: dec!(2000),
            max_game_exposure_usd: dec!(1000),
            max_total_exposure_usd: dec!(5000),
            min_balance_usd: dec!(10),
        }
    }
}

/// Position sizing parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Fractional Kelly multiplier.
    pub fractional_kelly: Decimal,

    /// Hard cap per position (USD).
    pub max_position_usd: Decimal,

    /// Max % of balance per position.
    pub capital_risk_pct: Decimal,

    /// Max % of 5-cent ask depth to consume.
    pub liquidity_fill_pct: Decimal,

    /// Skip when spread exceeds this % of midpoint.
    pub max_spread_pct: Decimal,

    /// Bankroll used when no wallet is available (paper / dry-run).
    pub paper_bankroll_usd: Decimal,

    /// Whether to fetch order books and apply liquidity constraints.
    pub check_liquidity: bool,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            fractional_kelly: dec!(0.25),
            max_position_usd: dec!(100),
            capital_risk_pct: dec!(2),
            liquidity_fill_pct: dec!(10),
            max_spread_pct: dec!(10),
            paper_bankroll_usd: dec!(1000),
            check_liquidity: true,
        }
    }
}

/// DCA follow-on entry parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DcaConfig {
    /// Total entries per group, including the initial one.
    pub max_entries: u32,

    /// Minimum minutes between entries.
    pub min_interval_min: i64,

    /// Max |current - first| price drift before DCA halts.
    pub max_price_spread: Decimal,

    /// Price drop % vs first entry that triggers an early buy.
    pub favorable_price_pct: Decimal,

    /// Price rise % vs first entry that defers a scheduled buy.
    pub unfavorable_price_pct: Decimal,

    /// Minutes before tipoff when DCA entries stop.
    pub cutoff_before_tipoff_min: i64,

    /// Per-entry cap multiplier for the target-holding sizer.
    pub per_entry_cap_mult: Decimal,

    /// Orders below this size complete the group instead.
    pub min_order_usd: Decimal,
}

impl Default for DcaConfig {
    fn default() -> Self {
        Self {
            max_entries: 5,
            min_interval_min: 30,
            max_price_spread: dec!(0.15),
            favorable_price_pct: dec!(0),
            unfavorable_price_pct: dec!(10),
            cutoff_before_tipoff_min: 30,
            per_entry_cap_mult: dec!(2.0),
            min_order_usd: dec!(1),
        }
    }
}

/// Both-side hedging parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BothsideConfig {
    pub enabled: bool,

    /// Minutes after the directional before the hedge may execute.
    pub hedge_delay_min: i64,

    /// Kelly multiplier applied to positive-EV hedge sizing.
    pub hedge_kelly_mult: Decimal,

    /// Hard ceiling on dir_vwap + hedge price.
    pub max_combined_vwap: Decimal,
}

impl Default for BothsideConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hedge_delay_min: 30,
            hedge_kelly_mult: dec!(0.5),
            max_combined_vwap: dec!(0.99),
        }
    }
}

/// Merge (redeem) parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub enabled: bool,

    /// Minimum net profit to bother merging (USD).
    pub min_profit_usd: Decimal,

    /// Configured gas estimate; live mode refreshes it per pass.
    pub est_gas_usd: Decimal,

    /// Floor on the share count used in the margin denominator.
    pub min_shares_floor: Decimal,

    /// Retries for failed on-chain merges.
    pub max_retries: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_profit_usd: dec!(0.10),
            est_gas_usd: dec!(0.05),
            min_shares_floor: dec!(10),
            max_retries: 3,
        }
    }
}

/// Risk / circuit breaker parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub enabled: bool,

    /// ORANGE at this daily loss % of balance; YELLOW at half of it.
    pub daily_loss_limit_pct: Decimal,

    /// RED at this weekly loss %.
    pub weekly_loss_limit_pct: Decimal,

    /// RED at this drawdown %.
    pub max_drawdown_limit_pct: Decimal,

    /// Calibration drift z-score threshold (sigma).
    pub drift_threshold_sigma: f64,

    /// Whether existing DCA groups may keep buying under ORANGE.
    pub orange_allows_dca: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_loss_limit_pct: dec!(3),
            weekly_loss_limit_pct: dec!(5),
            max_drawdown_limit_pct: dec!(15),
            drift_threshold_sigma: 2.0,
            orange_allows_dca: false,
        }
    }
}

/// Order lifecycle manager parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderManagerConfig {
    pub enabled: bool,

    /// Minutes an unfilled order rests before repricing.
    pub ttl_min: i64,

    /// Cancel-and-reprice attempts before giving up.
    pub max_replaces: u32,

    /// Orders examined per tick.
    pub check_batch_size: usize,

    /// Pause between per-order API calls (milliseconds).
    pub rate_limit_sleep_ms: u64,

    /// Skip the reprice when the move is below this.
    pub min_price_move: Decimal,
}

impl OrderManagerConfig {
    pub fn rate_limit_sleep(&self) -> Duration {
        Duration::from_millis(self.rate_limit_sleep_ms)
    }
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_min: 5,
            max_replaces: 3,
            check_batch_size: 10,
            rate_limit_sleep_ms: 500,
            min_price_move: dec!(0.01),
        }
    }
}

/// Calibration curve parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// One-sided confidence for the Beta lower bound.
    pub confidence_level: f64,

    /// Optional JSON artifact path; compiled-in table when absent.
    pub artifact_path: Option<String>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.90,
            artifact_path: None,
        }
    }
}

/// Wallet / chain configuration. Credentials come from the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Hex private key; env `COURT_PRIVATE_KEY`.
    pub private_key: String,

    /// 0 = EOA, 1 = 1-of-1 proxy.
    pub signature_type: u8,

    /// Proxy contract address when signature_type = 1.
    pub proxy_address: Option<String>,

    pub clob_host: String,
    pub gamma_host: String,
    pub rpc_url: String,
    pub chain_id: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            signature_type: 0,
            proxy_address: None,
            clob_host: "https://clob.polymarket.com".to_string(),
            gamma_host: "https://gamma-api.polymarket.com".to_string(),
            rpc_url: "https://polygon-rpc.com".to_string(),
            chain_id: 137,
        }
    }
}

/// Telegram notifications (optional).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let config: BotConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config file {:?}", path))?;
        Ok(config)
    }

    /// Apply environment-variable overrides (credentials and a few knobs
    /// that differ per deployment).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COURT_PRIVATE_KEY") {
            self.wallet.private_key = v;
        }
        if let Ok(v) = std::env::var("COURT_SIGNATURE_TYPE") {
            if let Ok(code) = v.parse() {
                self.wallet.signature_type = code;
            }
        }
        if let Ok(v) = std::env::var("COURT_PROXY_ADDRESS") {
            if !v.is_empty() {
                self.wallet.proxy_address = Some(v);
            }
        }
        if let Ok(v) = std::env::var("COURT_RPC_URL") {
            self.wallet.rpc_url = v;
        }
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Ok(v) = std::env::var("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = v;
        }
        if let Ok(v) = std::env::var("COURT_MODE") {
            if let Some(mode) = ExecutionMode::from_str_opt(&v) {
                self.mode = mode;
            }
        }
        if let Ok(v) = std::env::var("COURT_DATA_DIR") {
            self.data_dir = v;
        }
    }

    /// Validate cross-field constraints. Fails startup, not a tick.
    pub fn validate(&self) -> Result<()> {
        if self.sizing.fractional_kelly <= Decimal::ZERO || self.sizing.fractional_kelly > Decimal::ONE
        {
            bail!("sizing.fractional_kelly must be in (0, 1]");
        }
        if self.sizing.max_position_usd <= Decimal::ZERO {
            bail!("sizing.max_position_usd must be positive");
        }
        if self.dca.max_entries == 0 {
            bail!("dca.max_entries must be at least 1");
        }
        if self.bothside.max_combined_vwap >= Decimal::ONE {
            bail!("bothside.max_combined_vwap must be below 1.0");
        }
        if !(0.5..1.0).contains(&self.calibration.confidence_level) {
            bail!("calibration.confidence_level must be in [0.5, 1.0)");
        }
        if self.mode.is_live() {
            if self.wallet.private_key.is_empty() {
                bail!("live mode requires COURT_PRIVATE_KEY");
            }
            if self.wallet.signature_type > 1 {
                bail!("unsupported wallet signature type {} (0 = EOA, 1 = proxy)", self.wallet.signature_type);
            }
            if self.wallet.signature_type == 1 && self.wallet.proxy_address.is_none() {
                bail!("proxy wallet requires COURT_PROXY_ADDRESS");
            }
        }
        Ok(())
    }

    /// Path of the SQLite store.
    pub fn db_path(&self) -> std::path::PathBuf {
        let dir = if self.data_dir.is_empty() { "data" } else { &self.data_dir };
        // Keep live and paper books separate on disk.
        let file = match self.mode {
            ExecutionMode::Live => "live_trades.db",
            _ => "paper_trades.db",
        };
        Path::new(dir).join(file)
    }

    /// Path of the heartbeat file the watchdog monitors.
    pub fn heartbeat_path(&self) -> std::path::PathBuf {
        let dir = if self.data_dir.is_empty() { "data" } else { &self.data_dir };
        Path::new(dir).join("heartbeat")
    }

    /// Lock directory for a process kind ("tick" / "orders").
    pub fn lock_path(&self, kind: &str) -> std::path::PathBuf {
        let dir = if self.data_dir.is_empty() { "data" } else { &self.data_dir };
        Path::new(dir).join(format!(".{}.lock", kind))
    }
}
