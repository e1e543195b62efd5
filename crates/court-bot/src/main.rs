//! court-bot: heartbeat-driven NBA prediction-market trading engine.
//!
//! Usage:
//!   court-bot tick [--mode <MODE>] [--date YYYY-MM-DD] [--no-settle]
//!   court-bot orders
//!   court-bot settle [--date YYYY-MM-DD]
//!   court-bot status [--date YYYY-MM-DD]
//!   court-bot ack
//!   court-bot watchdog
//!
//! `tick` is the 15-minute scheduler heartbeat, `orders` the 2-minute
//! order-manager heartbeat, and `watchdog` the 10-minute staleness probe.
//! Exit code is nonzero only for startup/config errors; a tick that finds
//! nothing to do (or loses the process lock) exits 0.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use chrono_tz::America::New_York;
use clap::{Parser, Subcommand};
use court_market::{
    ClobAuth, ClobClient, ClobConfig, CtfConfig, CtfMerger, DiscoveryConfig, WalletKind,
};
use tracing::{info, warn};

use court_bot::calibration::{load_artifact, CalibrationCurve};
use court_bot::config::{BotConfig, ExecutionMode};
use court_bot::scheduler::{Disposition, TickContext, TickReport};
use court_bot::{heartbeat, lock::TickLock, notify::Notifier, settlement, store::Store};

#[derive(Parser, Debug)]
#[command(name = "court-bot")]
#[command(about = "Autonomous NBA prediction-market trading engine")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/bot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One scheduler heartbeat: discover, dispatch, merge, settle.
    Tick {
        /// Execution mode override: dry-run, paper, live
        #[arg(short, long)]
        mode: Option<String>,

        /// Game date override (YYYY-MM-DD, ET). Default: today + tomorrow.
        #[arg(long)]
        date: Option<String>,

        /// Skip the settlement pass
        #[arg(long)]
        no_settle: bool,
    },
    /// One order-manager heartbeat (live mode only).
    Orders,
    /// Manual settlement pass.
    Settle {
        /// Execution mode override: dry-run, paper, live
        #[arg(short, long)]
        mode: Option<String>,
    },
    /// Job and risk status inspection.
    Status {
        /// Game date (YYYY-MM-DD, ET). Default: today.
        #[arg(long)]
        date: Option<String>,
    },
    /// Acknowledge a RED circuit breaker (required for recovery).
    Ack,
    /// Heartbeat staleness check.
    Watchdog,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)?
    } else {
        BotConfig::default()
    };
    config.apply_env_overrides();

    // Mode overrides arrive before validation so live checks apply.
    if let Command::Tick { mode: Some(mode), .. } | Command::Settle { mode: Some(mode) } =
        &args.command
    {
        config.mode = ExecutionMode::from_str_opt(mode)
            .with_context(|| format!("unknown mode '{mode}'"))?;
    }
    config.validate().context("configuration validation failed")?;

    let _log_guard = init_logging(&config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;
    runtime.block_on(dispatch(args.command, config))
}

async fn dispatch(command: Command, config: BotConfig) -> Result<()> {
    match command {
        Command::Tick { date, no_settle, .. } => cmd_tick(config, date, no_settle).await,
        Command::Orders => cmd_orders(config).await,
        Command::Settle { .. } => cmd_settle(config).await,
        Command::Status { date } => cmd_status(config, date),
        Command::Ack => cmd_ack(config),
        Command::Watchdog => cmd_watchdog(config).await,
    }
}

async fn cmd_tick(config: BotConfig, date: Option<String>, no_settle: bool) -> Result<()> {
    let stale = heartbeat::stale_duration(config.schedule.heartbeat_stale_min);
    let Some(_lock) = TickLock::acquire(config.lock_path("tick"), stale) else {
        return Ok(()); // another tick is running; not an error
    };
    if let Err(e) = heartbeat::touch(&config.heartbeat_path()) {
        warn!(error = %e, "Heartbeat touch failed");
    }

    // Refresh today and tomorrow (ET) to cover the timezone boundary;
    // jobs gate themselves on their execution windows.
    let dates = match &date {
        Some(d) => vec![d.clone()],
        None => {
            let now_et = Utc::now().with_timezone(&New_York);
            vec![
                now_et.format("%Y-%m-%d").to_string(),
                (now_et + Duration::days(1)).format("%Y-%m-%d").to_string(),
            ]
        }
    };
    info!(mode = %config.mode, dates = ?dates, "Scheduler tick");

    let store = Store::open(&config.db_path())?;
    store.integrity_check()?;
    let notifier = Notifier::new(config.telegram.clone());
    let curve = build_curve(&config)?;
    let client = build_client(&config).await?;
    let discovery = DiscoveryConfig::default();

    let ctx = TickContext {
        store: &store,
        client: &client,
        config: &config,
        curve: &curve,
        notifier: &notifier,
    };
    let report = court_bot::run_tick(&ctx, &discovery, &dates, no_settle).await?;

    if let Some(summary) = format_tick_summary(&report, &dates[0]) {
        notifier.send(&summary).await;
    }
    Ok(())
}

async fn cmd_orders(config: BotConfig) -> Result<()> {
    if !config.mode.is_live() {
        info!(mode = %config.mode, "Order manager only runs in live mode");
        return Ok(());
    }
    let stale = heartbeat::stale_duration(config.schedule.heartbeat_stale_min);
    let Some(_lock) = TickLock::acquire(config.lock_path("orders"), stale) else {
        return Ok(());
    };

    let store = Store::open(&config.db_path())?;
    let notifier = Notifier::new(config.telegram.clone());
    let client = build_client(&config).await?;
    let summary = court_bot::order_manager::manage_orders(&store, &client, &config, &notifier).await?;
    info!(
        checked = summary.checked,
        filled = summary.filled,
        replaced = summary.replaced,
        expired = summary.expired,
        "Order manager done"
    );
    Ok(())
}

async fn cmd_settle(config: BotConfig) -> Result<()> {
    let store = Store::open(&config.db_path())?;
    let notifier = Notifier::new(config.telegram.clone());
    let curve = build_curve(&config)?;
    let client = build_client(&config).await?;
    let ctx = TickContext {
        store: &store,
        client: &client,
        config: &config,
        curve: &curve,
        notifier: &notifier,
    };
    let summary = settlement::auto_settle(&ctx, &DiscoveryConfig::default()).await?;
    println!(
        "Settled {} | W/L {}/{} | PnL ${:.2} | postponed {} | skipped {}",
        summary.settled.len(),
        summary.wins(),
        summary.losses(),
        summary.total_pnl(),
        summary.postponed,
        summary.skipped,
    );
    if !summary.settled.is_empty() {
        notifier.notify_settlement(&summary).await;
    }
    Ok(())
}

fn cmd_status(config: BotConfig, date: Option<String>) -> Result<()> {
    let store = Store::open(&config.db_path())?;
    let date = date.unwrap_or_else(|| {
        Utc::now().with_timezone(&New_York).format("%Y-%m-%d").to_string()
    });

    let summary = store.job_summary(&date)?;
    println!("Jobs for {date}:");
    println!(
        "  pending={} executing={} dca_active={} executed={} skipped={} failed={} expired={}",
        summary.pending,
        summary.executing,
        summary.dca_active,
        summary.executed,
        summary.skipped,
        summary.failed,
        summary.expired,
    );
    for job in store.jobs_for_date(&date)? {
        println!(
            "  #{} {} [{}] {} merge={} retries={}",
            job.id,
            job.event_slug,
            job.leg_side,
            job.status,
            job.merge_status.as_str(),
            job.retry_count,
        );
    }

    match store.latest_risk_snapshot()? {
        Some(snap) => println!(
            "Risk: {} (since {}) mult={} daily=${} weekly=${} losses={} degraded={}",
            snap.level,
            snap.level_since.format("%Y-%m-%d %H:%M"),
            snap.sizing_multiplier,
            snap.daily_pnl,
            snap.weekly_pnl,
            snap.consecutive_losses,
            snap.degraded,
        ),
        None => println!("Risk: no snapshot yet"),
    }
    Ok(())
}

fn cmd_ack(config: BotConfig) -> Result<()> {
    let store = Store::open(&config.db_path())?;
    if store.acknowledge_red()? {
        println!("RED circuit breaker acknowledged; recovery proceeds after the 72h lockout.");
    } else {
        println!("Nothing to acknowledge: latest snapshot is not RED.");
    }
    Ok(())
}

async fn cmd_watchdog(config: BotConfig) -> Result<()> {
    let notifier = Notifier::new(config.telegram.clone());
    heartbeat::watchdog_check(
        &config.heartbeat_path(),
        config.schedule.heartbeat_stale_min,
        &notifier,
    )
    .await;
    Ok(())
}

fn build_curve(config: &BotConfig) -> Result<CalibrationCurve> {
    let artifact = load_artifact(config.calibration.artifact_path.as_deref().map(std::path::Path::new))
        .context("loading calibration artifact")?;
    CalibrationCurve::fit(&artifact, config.calibration.confidence_level)
        .context("fitting calibration curve")
}

async fn build_client(config: &BotConfig) -> Result<ClobClient> {
    let mut auth = ClobAuth::new(&config.wallet.private_key, config.wallet.chain_id)
        .context("wallet key")?;
    if config.mode.is_live() {
        auth.derive_credentials(&config.wallet.clob_host)
            .await
            .context("deriving CLOB API credentials")?;
    }

    let clob_config = ClobConfig {
        clob_host: config.wallet.clob_host.clone(),
        gamma_host: config.wallet.gamma_host.clone(),
        ..ClobConfig::default()
    };
    let mut client = ClobClient::new(clob_config, auth).context("building market client")?;

    if config.mode.is_live() {
        let wallet_kind = WalletKind::from_signature_type(config.wallet.signature_type)
            .context("unsupported wallet signature type")?;
        let ctf_config = CtfConfig {
            rpc_url: config.wallet.rpc_url.clone(),
            chain_id: config.wallet.chain_id,
            proxy_address: config.wallet.proxy_address.clone(),
            ..CtfConfig::default()
        };
        let merger = CtfMerger::new(ctf_config, wallet_kind, &config.wallet.private_key)
            .context("building CTF merger")?;
        client = client.with_merger(merger);
    }
    Ok(client)
}

fn init_logging(config: &BotConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let level = if config.log_level.is_empty() { "info" } else { &config.log_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.log_dir.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        Ok(None)
    } else {
        // Daily-rolling log files; retention is handled operationally.
        let appender = tracing_appender::rolling::daily(&config.log_dir, "court-bot.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
        Ok(Some(guard))
    }
}

/// Tick summary for the notifier. `None` when nothing happened.
fn format_tick_summary(report: &TickReport, game_date: &str) -> Option<String> {
    let executed: Vec<_> = report
        .entries
        .iter()
        .chain(&report.dca)
        .filter(|o| o.disposition == Disposition::Executed)
        .collect();
    let failed: Vec<_> = report
        .entries
        .iter()
        .chain(&report.dca)
        .chain(&report.merges)
        .filter(|o| o.disposition == Disposition::Failed)
        .collect();
    let merged = report
        .merges
        .iter()
        .filter(|o| o.disposition == Disposition::Executed)
        .count();

    if executed.is_empty() && failed.is_empty() && merged == 0 && report.settled == 0 {
        return None;
    }

    let mut lines = vec![format!("*Tick* ({game_date}) risk={}", report.risk_level)];
    if !executed.is_empty() {
        lines.push(format!("Entries: {}", executed.len()));
        for o in &executed {
            lines.push(format!(
                "  #{} {}",
                o.signal_id.unwrap_or_default(),
                court_bot::notify::escape_md(&o.event_slug)
            ));
        }
    }
    if merged > 0 {
        lines.push(format!("Merges: {merged}"));
    }
    if report.settled > 0 {
        lines.push(format!("Settled: {} (${:.2})", report.settled, report.settled_pnl));
    }
    if !failed.is_empty() {
        lines.push(format!("Failed: {}", failed.len()));
        for o in &failed {
            lines.push(format!(
                "  {}: {}",
                court_bot::notify::escape_md(&o.event_slug),
                court_bot::notify::escape_md(o.note.as_deref().unwrap_or("unknown")),
            ));
        }
    }
    if report.expired > 0 {
        lines.push(format!("Expired: {}", report.expired));
    }
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["court-bot", "tick"]).unwrap();
        assert_eq!(args.config.to_str().unwrap(), "config/bot.toml");
        assert!(matches!(
            args.command,
            Command::Tick { mode: None, date: None, no_settle: false }
        ));
    }

    #[test]
    fn test_cli_tick_flags() {
        let args = Args::try_parse_from([
            "court-bot", "tick", "--mode", "dry-run", "--date", "2026-02-10", "--no-settle",
        ])
        .unwrap();
        match args.command {
            Command::Tick { mode, date, no_settle } => {
                assert_eq!(mode.as_deref(), Some("dry-run"));
                assert_eq!(date.as_deref(), Some("2026-02-10"));
                assert!(no_settle);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_cli_subcommands_parse() {
        for cmd in ["orders", "status", "ack", "watchdog"] {
            assert!(Args::try_parse_from(["court-bot", cmd]).is_ok(), "{cmd}");
        }
        assert!(Args::try_parse_from(["court-bot", "settle", "--mode", "paper"]).is_ok());
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Args::try_parse_from(["court-bot", "backtest"]).is_err());
    }

    #[test]
    fn test_tick_summary_quiet_when_idle() {
        let report = TickReport::default();
        assert!(format_tick_summary(&report, "2026-01-15").is_none());
    }
}
