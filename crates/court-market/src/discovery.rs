//! NBA schedule discovery.
//!
//! Fetches the league schedule JSON for a single ET date and maps it into
//! `GameInfo` rows. Used by the scheduler (job creation) and settlement
//! (final scores, postponement detection).

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{GameInfo, GameStatus};

/// Errors that can occur during schedule discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("schedule payload malformed: {0}")]
    InvalidData(String),
}

/// Configuration for schedule discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Scoreboard endpoint; `{date}` is substituted with YYYY-MM-DD.
    pub scoreboard_url: String,
    pub request_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scoreboard_url:
                "https://stats.nba.com/stats/scoreboardv3?GameDate={date}&LeagueID=00".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Fetch all games scheduled for an ET date (`YYYY-MM-DD`).
pub async fn fetch_games_for_date(
    config: &DiscoveryConfig,
    date: &str,
) -> Result<Vec<GameInfo>, DiscoveryError> {
    let url = config.scoreboard_url.replace("{date}", date);
    let client = Client::builder().timeout(config.request_timeout).build()?;

    let resp = client
        .get(&url)
        .header("User-Agent", "Mozilla/5.0")
        .header("Referer", "https://www.nba.com/")
        .send()
        .await?
        .error_for_status()?;

    let payload: ScoreboardDto = resp.json().await?;
    let games = payload.scoreboard.games;
    debug!(date, count = games.len(), "Schedule fetched");

    let mut out = Vec::with_capacity(games.len());
    for g in games {
        let Ok(tipoff) = g.game_time_utc.parse::<DateTime<Utc>>() else {
            warn!(game_id = %g.game_id, raw = %g.game_time_utc, "Unparseable tipoff, skipping");
            continue;
        };
        out.push(GameInfo {
            away_abbr: g.away_team.team_tricode,
            home_abbr: g.home_team.team_tricode,
            tipoff_utc: tipoff,
            status: map_status(g.game_status, &g.game_status_text),
            home_score: g.home_team.score,
            away_score: g.away_team.score,
        });
    }
    Ok(out)
}

/// Status codes: 1 = scheduled, 2 = in progress, 3 = final. Postponements
/// keep code 1 but flag it in the status text.
fn map_status(code: u8, text: &str) -> GameStatus {
    let lower = text.to_lowercase();
    if lower.contains("ppd") || lower.contains("postponed") || lower.contains("cancel") {
        return GameStatus::Postponed;
    }
    match code {
        2 => GameStatus::InProgress,
        3 => GameStatus::Final,
        _ => GameStatus::Scheduled,
    }
}

// --- Wire DTOs ---

#[derive(Debug, Deserialize)]
struct ScoreboardDto {
    scoreboard: ScoreboardInner,
}

#[derive(Debug, Deserialize)]
struct ScoreboardInner {
    #[serde(default)]
    games: Vec<GameDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameDto {
    #[serde(default)]
    game_id: String,
    #[serde(default)]
    game_status: u8,
    #[serde(default)]
    game_status_text: String,
    #[serde(rename = "gameTimeUTC", default)]
    game_time_utc: String,
    home_team: TeamDto,
    away_team: TeamDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamDto {
    #[serde(default)]
    team_tricode: String,
    #[serde(default)]
    score: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_status_codes() {
        assert_eq!(map_status(1, ""), GameStatus::Scheduled);
        assert_eq!(map_status(2, "Q3 4:12"), GameStatus::InProgress);
        assert_eq!(map_status(3, "Final"), GameStatus::Final);
        assert_eq!(map_status(3, "Final/OT"), GameStatus::Final);
    }

    #[test]
    fn test_map_status_postponed_overrides_code() {
        assert_eq!(map_status(1, "PPD"), GameStatus::Postponed);
        assert_eq!(map_status(1, "Postponed"), GameStatus::Postponed);
        assert_eq!(map_status(2, "Cancelled"), GameStatus::Postponed);
    }

    #[test]
    fn test_scoreboard_parse() {
        let raw = r#"{
            "scoreboard": { "games": [ {
                "gameId": "0022600501",
                "gameStatus": 3,
                "gameStatusText": "Final",
                "gameTimeUTC": "2026-01-16T00:30:00Z",
                "homeTeam": { "teamTricode": "LAL", "score": 112 },
                "awayTeam": { "teamTricode": "BOS", "score": 118 }
            } ] }
        }"#;
        let dto: ScoreboardDto = serde_json::from_str(raw).unwrap();
        assert_eq!(dto.scoreboard.games.len(), 1);
        let g = &dto.scoreboard.games[0];
        assert_eq!(g.home_team.team_tricode, "LAL");
        assert_eq!(g.away_team.score, 118);
    }
}
