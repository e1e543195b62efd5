//! Event-slug convention: `nba-{away}-{home}-YYYY-MM-DD`.
//!
//! The date component is the tipoff date in US Eastern time, not UTC —
//! NBA schedules are published ET, and a 10pm ET tipoff is already
//! "tomorrow" in UTC.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::America::New_York;

/// Parsed components of an event slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugParts {
    pub away_abbr: String,
    pub home_abbr: String,
    pub game_date: NaiveDate,
}

/// Convert a UTC tipoff time to the NBA game date (US Eastern).
pub fn eastern_game_date(tipoff_utc: DateTime<Utc>) -> NaiveDate {
    tipoff_utc.with_timezone(&New_York).date_naive()
}

/// Build an event slug from team abbreviations and the UTC tipoff time.
///
/// Abbreviations are lowercased; the date is the ET tipoff date.
pub fn build_event_slug(away_abbr: &str, home_abbr: &str, tipoff_utc: DateTime<Utc>) -> String {
    format!(
        "nba-{}-{}-{}",
        away_abbr.to_lowercase(),
        home_abbr.to_lowercase(),
        eastern_game_date(tipoff_utc).format("%Y-%m-%d"),
    )
}

/// Parse `nba-{away}-{home}-YYYY-MM-DD` back into its parts.
///
/// Returns `None` for anything that does not match the convention exactly
/// (three-letter lowercase abbreviations, valid date).
pub fn parse_event_slug(slug: &str) -> Option<SlugParts> {
    let rest = slug.strip_prefix("nba-")?;
    let mut it = rest.splitn(3, '-');
    let away = it.next()?;
    let home = it.next()?;
    let date_str = it.next()?;

    if away.len() != 3 || home.len() != 3 {
        return None;
    }
    if !away.chars().all(|c| c.is_ascii_lowercase())
        || !home.chars().all(|c| c.is_ascii_lowercase())
    {
        return None;
    }

    let game_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;

    Some(SlugParts {
        away_abbr: away.to_string(),
        home_abbr: home.to_string(),
        game_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_build_slug_uses_eastern_date() {
        // 2026-01-16 02:00 UTC is 2026-01-15 21:00 ET — slug carries the 15th.
        let tipoff = Utc.with_ymd_and_hms(2026, 1, 16, 2, 0, 0).unwrap();
        assert_eq!(build_event_slug("BOS", "LAL", tipoff), "nba-bos-lal-2026-01-15");
    }

    #[test]
    fn test_build_slug_same_date_afternoon() {
        let tipoff = Utc.with_ymd_and_hms(2026, 1, 15, 18, 0, 0).unwrap();
        assert_eq!(build_event_slug("NYK", "MIA", tipoff), "nba-nyk-mia-2026-01-15");
    }

    #[test]
    fn test_parse_round_trip() {
        let tipoff = Utc.with_ymd_and_hms(2026, 3, 2, 0, 30, 0).unwrap();
        let slug = build_event_slug("GSW", "DEN", tipoff);
        let parts = parse_event_slug(&slug).unwrap();
        assert_eq!(parts.away_abbr, "gsw");
        assert_eq!(parts.home_abbr, "den");
        assert_eq!(parts.game_date, eastern_game_date(tipoff));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_event_slug("nba-bos-lal").is_none());
        assert!(parse_event_slug("nfl-bos-lal-2026-01-15").is_none());
        assert!(parse_event_slug("nba-BOS-lal-2026-01-15").is_none());
        assert!(parse_event_slug("nba-bo-lal-2026-01-15").is_none());
        assert!(parse_event_slug("nba-bos-lal-2026-13-40").is_none());
        assert!(parse_event_slug("").is_none());
    }
}
