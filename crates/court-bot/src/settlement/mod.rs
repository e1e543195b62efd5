//! Settlement: reconcile filled signals after games resolve.
//!
//! Winner determination prefers the final box score; when the scoreboard
//! has not flipped to final yet but the market itself has resolved (the
//! winning outcome pinned at >= $0.95 with the market inactive), the
//! market verdict is used instead. Postponed games are skipped with a
//! warning and their jobs are never force-resolved. Overtime finals
//! settle like any other final.

pub mod pnl;

use std::collections::HashMap;

use court_common::parse_event_slug;
use court_market::{fetch_games_for_date, DiscoveryConfig, GameInfo, GameStatus};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::scheduler::TickContext;
use crate::store::{Signal, StoreError};

pub use pnl::{settlement_price, signal_pnl};

/// One settled signal, for the summary notification.
#[derive(Debug, Clone)]
pub struct SettledSignal {
    pub signal_id: i64,
    pub team: String,
    pub event_slug: String,
    pub won: bool,
    pub pnl: Decimal,
    pub method: &'static str,
}

/// Outcome of one settlement pass.
#[derive(Debug, Default)]
pub struct SettleSummary {
    pub settled: Vec<SettledSignal>,
    pub skipped: usize,
    pub postponed: usize,
    pub errors: usize,
}

impl SettleSummary {
    pub fn total_pnl(&self) -> Decimal {
        self.settled.iter().map(|s| s.pnl).sum()
    }

    pub fn wins(&self) -> usize {
        self.settled.iter().filter(|s| s.won).count()
    }

    pub fn losses(&self) -> usize {
        self.settled.len() - self.wins()
    }
}

/// How a game resolved.
enum Resolution {
    /// Winning outcome name plus final scores (absent for market-resolved
    /// settlements).
    Final {
        winner: String,
        score_home: Option<u32>,
        score_away: Option<u32>,
        method: &'static str,
    },
    Postponed,
    NotYet,
}

/// Settle every unsettled signal whose game has reached a terminal state.
pub async fn auto_settle(
    ctx: &TickContext<'_>,
    discovery: &DiscoveryConfig,
) -> Result<SettleSummary, StoreError> {
    let unsettled = ctx.store.unsettled_signals()?;
    let mut summary = SettleSummary::default();
    if unsettled.is_empty() {
        return Ok(summary);
    }
    info!(count = unsettled.len(), "Unsettled signals to check");

    // One schedule fetch per distinct game date.
    let mut games_by_date: HashMap<String, Vec<GameInfo>> = HashMap::new();
    // One resolution per slug.
    let mut resolutions: HashMap<String, Resolution> = HashMap::new();

    for signal in &unsettled {
        let slug = signal.event_slug.clone();
        if !resolutions.contains_key(&slug) {
            let resolution = resolve_game(ctx, discovery, &mut games_by_date, signal).await;
            resolutions.insert(slug.clone(), resolution);
        }

        match resolutions.get(&slug) {
            Some(Resolution::Final { winner, score_home, score_away, method }) => {
                // Data-inconsistency guard: the signal's outcome name must
                // be one of the game's two teams, or we refuse to guess.
                let known_team = parse_event_slug(&slug).is_some_and(|p| {
                    signal.team.eq_ignore_ascii_case(&p.away_abbr)
                        || signal.team.eq_ignore_ascii_case(&p.home_abbr)
                });
                if *method == "box_score" && !known_team {
                    warn!(
                        signal_id = signal.id,
                        team = %signal.team,
                        slug = %slug,
                        "Signal team matches neither side of the game - not settling"
                    );
                    summary.errors += 1;
                    continue;
                }
                let won = signal.team.eq_ignore_ascii_case(winner);
                let pnl = signal_pnl(signal, won);
                match ctx.store.insert_result(
                    signal.id,
                    won,
                    pnl,
                    settlement_price(won),
                    *score_home,
                    *score_away,
                    method,
                ) {
                    Ok(_) => {
                        info!(
                            signal_id = signal.id,
                            team = %signal.team,
                            won,
                            pnl = %pnl,
                            method,
                            "Signal settled"
                        );
                        summary.settled.push(SettledSignal {
                            signal_id: signal.id,
                            team: signal.team.clone(),
                            event_slug: slug.clone(),
                            won,
                            pnl,
                            method,
                        });
                    }
                    Err(e) => {
                        warn!(signal_id = signal.id, error = %e, "Result insert failed");
                        summary.errors += 1;
                    }
                }
            }
            Some(Resolution::Postponed) => {
                warn!(slug = %slug, signal_id = signal.id, "Game postponed - settlement skipped");
                summary.postponed += 1;
            }
            _ => {
                summary.skipped += 1;
            }
        }
    }

    if !summary.settled.is_empty() {
        info!(
            settled = summary.settled.len(),
            wins = summary.wins(),
            losses = summary.losses(),
            pnl = %summary.total_pnl(),
            "Settlement pass complete"
        );
    }
    Ok(summary)
}

/// Resolve one game: box score first, then market fallback.
async fn resolve_game(
    ctx: &TickContext<'_>,
    discovery: &DiscoveryConfig,
    games_by_date: &mut HashMap<String, Vec<GameInfo>>,
    signal: &Signal,
) -> Resolution {
    let Some(parts) = parse_event_slug(&signal.event_slug) else {
        warn!(slug = %signal.event_slug, "Unparseable event slug");
        return Resolution::NotYet;
    };
    let date = parts.game_date.format("%Y-%m-%d").to_string();

    if !games_by_date.contains_key(&date) {
        match fetch_games_for_date(discovery, &date).await {
            Ok(games) => {
                games_by_date.insert(date.clone(), games);
            }
            Err(e) => {
                warn!(date = %date, error = %e, "Score fetch failed");
                games_by_date.insert(date.clone(), Vec::new());
            }
        }
    }

    let game = games_by_date.get(&date).and_then(|games| {
        games.iter().find(|g| {
            g.away_abbr.eq_ignore_ascii_case(&parts.away_abbr)
                && g.home_abbr.eq_ignore_ascii_case(&parts.home_abbr)
        })
    });

    match game {
        Some(g) if g.status == GameStatus::Postponed => Resolution::Postponed,
        Some(g) if g.status == GameStatus::Final => match g.winner_abbr() {
            Some(winner) => Resolution::Final {
                winner: winner.to_string(),
                score_home: Some(g.home_score),
                score_away: Some(g.away_score),
                method: "box_score",
            },
            None => Resolution::NotYet,
        },
        _ => market_fallback(ctx, signal, &parts.away_abbr, &parts.home_abbr, &date).await,
    }
}

/// Market fallback: the market is inactive and one outcome is pinned at
/// or above $0.95 (the loser correspondingly at or below $0.05).
async fn market_fallback(
    ctx: &TickContext<'_>,
    signal: &Signal,
    away: &str,
    home: &str,
    date: &str,
) -> Resolution {
    let market = match ctx.client.get_moneyline(away, home, date).await {
        Ok(Some(m)) => m,
        _ => return Resolution::NotYet,
    };
    if market.active {
        return Resolution::NotYet;
    }
    for (i, price) in market.prices.iter().enumerate() {
        if *price >= dec!(0.95) {
            if let Some(winner) = market.outcomes.get(i) {
                info!(slug = %signal.event_slug, winner = %winner, "Settling via market resolution");
                return Resolution::Final {
                    winner: winner.clone(),
                    score_home: None,
                    score_away: None,
                    method: "market",
                };
            }
        }
    }
    Resolution::NotYet
}
