use std::collections::HashMap;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};
use crate::table::Table;

/// A single game, identified the way the site's date page lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRef {
    pub home: String,
    pub away: String,
    /// `None` means today (local time).
    pub date: Option<NaiveDate>,
}

impl GameRef {
    pub fn new(home: &str, away: &str, date: Option<NaiveDate>) -> Self {
        GameRef {
            home: home.trim().to_lowercase(),
            away: away.trim().to_lowercase(),
            date,
        }
    }

    pub fn resolved_date(&self) -> NaiveDate {
        resolve_date(self.date)
    }
}

/// The given date, or today.
pub fn resolve_date(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| Local::now().date_naive())
}

/// Parse a strict ISO-8601 calendar date (`2021-01-23`).
pub fn parse_iso_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| ScrapeError::parse(format!("invalid ISO date {:?}: {}", s, e)))
}

/// One team's chance of winning a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamProbability {
    /// Upper-case short code, e.g. "MTL"
    pub team: String,
    /// Win probability (0.0–1.0)
    pub probability: f64,
}

/// Both sides of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameWinProbability {
    pub away: TeamProbability,
    pub home: TeamProbability,
}

impl GameWinProbability {
    /// Build from the home side; the away side gets the complement.
    pub fn from_home(home: &str, away: &str, home_probability: f64) -> Self {
        GameWinProbability {
            away: TeamProbability {
                team: away.to_uppercase(),
                probability: 1.0 - home_probability,
            },
            home: TeamProbability {
                team: home.to_uppercase(),
                probability: home_probability,
            },
        }
    }

    pub fn total(&self) -> f64 {
        self.away.probability + self.home.probability
    }

    /// Team code → probability.
    pub fn to_map(&self) -> HashMap<String, f64> {
        HashMap::from([
            (self.away.team.clone(), self.away.probability),
            (self.home.team.clone(), self.home.probability),
        ])
    }
}

/// Player stats and event log for one game.
#[derive(Debug, Clone)]
pub struct GameData {
    pub stats: Table,
    pub events: Table,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_game_ref_normalizes_codes() {
        let g = GameRef::new(" MTL", "Van ", None);
        assert_eq!(g.home, "mtl");
        assert_eq!(g.away, "van");
    }

    #[test]
    fn test_resolve_date() {
        let d = NaiveDate::from_ymd_opt(2021, 1, 23).unwrap();
        assert_eq!(resolve_date(Some(d)), d);
        assert_eq!(resolve_date(None), Local::now().date_naive());
    }

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(
            parse_iso_date("2021-01-23").unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 23).unwrap()
        );
        assert!(matches!(parse_iso_date("01/23/2021"), Err(ScrapeError::Parse(_))));
        assert!(parse_iso_date("2021-02-30").is_err());
    }

    #[test]
    fn test_from_home_complements() {
        let wp = GameWinProbability::from_home("van", "mtl", 0.625);
        assert_eq!(wp.home.team, "VAN");
        assert_eq!(wp.away.team, "MTL");
        assert_relative_eq!(wp.away.probability, 0.375);
        assert_relative_eq!(wp.total(), 1.0);

        let map = wp.to_map();
        assert_eq!(map.len(), 2);
        assert_relative_eq!(map["VAN"], 0.625);
    }
}
