//! Public operations over one browser session.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::browser::{ElementHandle, Locator, PageDriver, Session};
use crate::config::Config;
use crate::error::{Result, ScrapeError};
use crate::models::{GameData, GameRef, GameWinProbability, TeamProbability};
use crate::table::Table;
use crate::teams::TeamDirectory;

use super::extractor::{self, FilenameFn};
use super::navigator;

const WIN_PROBABILITY_ROWS: &str = "div#includedContent tbody > tr";
const CURRENT_PROBABILITY_COLUMN: &str = "homeWinProbability";
const RANKINGS_PAGE: &str = "power.htm";
const RANKINGS_CSV: &str = "powerRankings/rankings.csv";
const ODDS_PAGE: &str = "predictions.htm";
const ODDS_CSV: &str = "simulations/simulations_recent.csv";

/// Scraper handle. Every operation navigates the one page the session owns,
/// so calls are strictly sequential (`&mut self`).
pub struct MoneyPuck<D: PageDriver = Session> {
    driver: D,
    teams: TeamDirectory,
    config: Config,
}

impl MoneyPuck<Session> {
    /// Validate `config`, load the team file and start a browser.
    pub async fn launch(config: Config) -> Result<Self> {
        config.validate()?;
        let teams = TeamDirectory::load(&config.teams_file)?;
        let driver = Session::launch(&config).await?;
        Ok(MoneyPuck { driver, teams, config })
    }

    pub async fn close(self) {
        self.driver.close().await;
    }
}

impl<D: PageDriver> MoneyPuck<D> {
    /// Run the scraper over any driver.
    pub fn with_driver(driver: D, teams: TeamDirectory, config: Config) -> Self {
        MoneyPuck { driver, teams, config }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn teams(&self) -> &TeamDirectory {
        &self.teams
    }

    /// Pre-game win probabilities for every game listed on `date` (today
    /// when `None`), in page order.
    pub async fn win_probabilities_for_day(
        &mut self,
        date: Option<NaiveDate>,
    ) -> Result<Vec<GameWinProbability>> {
        navigator::to_date(&mut self.driver, &self.config, date).await?;
        let rows = self
            .driver
            .wait_for_all(&Locator::css(WIN_PROBABILITY_ROWS), self.config.element_timeout())
            .await?;

        let mut games = Vec::with_capacity(rows.len());
        for row in &rows {
            games.push(self.read_probability_row(row).await?);
        }
        info!("Read win probabilities for {} games", games.len());
        Ok(games)
    }

    async fn read_probability_row(&mut self, row: &ElementHandle) -> Result<GameWinProbability> {
        let cells = self.driver.find_all(&Locator::css("td"), Some(row)).await?;
        if cells.len() < 5 {
            return Err(ScrapeError::parse(format!(
                "win probability row has {} cells, expected at least 5",
                cells.len()
            )));
        }

        let away_pct = self.child_text(&cells[0], "h2").await?;
        let away_alt = self.child_attr(&cells[1], "img", "alt").await?;
        let home_alt = self.child_attr(&cells[3], "img", "alt").await?;
        let home_pct = self.child_text(&cells[4], "h2").await?;
        debug!("{} {} @ {} {}", away_alt, away_pct, home_alt, home_pct);

        Ok(GameWinProbability {
            away: TeamProbability {
                team: self.teams.code(&away_alt)?.to_uppercase(),
                probability: parse_percent(&away_pct)?,
            },
            home: TeamProbability {
                team: self.teams.code(&home_alt)?.to_uppercase(),
                probability: parse_percent(&home_pct)?,
            },
        })
    }

    async fn child(&mut self, cell: &ElementHandle, selector: &str) -> Result<ElementHandle> {
        self.driver
            .find(&Locator::css(selector), Some(cell))
            .await?
            .ok_or_else(|| ScrapeError::parse(format!("win probability cell has no <{}>", selector)))
    }

    async fn child_text(&mut self, cell: &ElementHandle, selector: &str) -> Result<String> {
        let el = self.child(cell, selector).await?;
        self.driver.text(&el).await
    }

    async fn child_attr(&mut self, cell: &ElementHandle, selector: &str, name: &str) -> Result<String> {
        let el = self.child(cell, selector).await?;
        self.driver
            .attribute(&el, name)
            .await?
            .ok_or_else(|| ScrapeError::parse(format!("<{}> has no {} attribute", selector, name)))
    }

    async fn game_table(
        &mut self,
        home: &str,
        away: &str,
        date: Option<NaiveDate>,
        filename_fn: FilenameFn,
    ) -> Result<Table> {
        let game = GameRef::new(home, away, date);
        extractor::capture_game_table(&mut self.driver, &self.teams, &self.config, &game, filename_fn)
            .await
    }

    /// Per-player statistics for one game.
    pub async fn game_stats(&mut self, home: &str, away: &str, date: Option<NaiveDate>) -> Result<Table> {
        self.game_table(home, away, date, extractor::stats_pattern).await
    }

    /// Event log for one game, with the running win probability.
    pub async fn game_events(&mut self, home: &str, away: &str, date: Option<NaiveDate>) -> Result<Table> {
        self.game_table(home, away, date, extractor::events_pattern).await
    }

    /// Stats and events together; the game page is visited once per table.
    pub async fn game(&mut self, home: &str, away: &str, date: Option<NaiveDate>) -> Result<GameData> {
        let stats = self.game_stats(home, away, date).await?;
        let events = self.game_events(home, away, date).await?;
        Ok(GameData { stats, events })
    }

    /// Latest win probability from the game's event log.
    pub async fn game_current_win_probability(
        &mut self,
        home: &str,
        away: &str,
        date: Option<NaiveDate>,
    ) -> Result<GameWinProbability> {
        let events = self.game_events(home, away, date).await?;
        let p = current_home_probability(&events)?;
        Ok(GameWinProbability::from_home(home.trim(), away.trim(), p))
    }

    pub async fn power_rankings(&mut self) -> Result<Table> {
        self.site_table(RANKINGS_PAGE, RANKINGS_CSV).await
    }

    /// Season simulation results (playoff and cup odds per team).
    pub async fn playoff_odds(&mut self) -> Result<Table> {
        self.site_table(ODDS_PAGE, ODDS_CSV).await
    }

    async fn site_table(&mut self, page: &str, csv_path: &str) -> Result<Table> {
        let url = self
            .config
            .site_url()?
            .join(page)
            .map_err(|e| ScrapeError::Config(format!("cannot build {} URL: {}", page, e)))?;
        let pattern = extractor::data_pattern(&self.config.site_host()?, csv_path)?;
        extractor::capture_table(&mut self.driver, &self.config, url.as_str(), &pattern).await
    }
}

fn current_home_probability(events: &Table) -> Result<f64> {
    if events.column_index(CURRENT_PROBABILITY_COLUMN).is_none() {
        return Err(ScrapeError::parse(format!(
            "event log has no {} column",
            CURRENT_PROBABILITY_COLUMN
        )));
    }
    let last = events
        .last_row()
        .ok_or_else(|| ScrapeError::parse("event log is empty"))?;
    let p = last
        .get(CURRENT_PROBABILITY_COLUMN)
        .and_then(|c| c.as_f64())
        .ok_or_else(|| ScrapeError::parse(format!("{} is not a number", CURRENT_PROBABILITY_COLUMN)))?;
    if !(0.0..=1.0).contains(&p) {
        return Err(ScrapeError::parse(format!("win probability {} outside [0, 1]", p)));
    }
    Ok(p)
}

/// "55.3%" → 0.553
pub fn parse_percent(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    let value: f64 = number
        .parse()
        .map_err(|_| ScrapeError::parse(format!("not a percentage: {:?}", text)))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(ScrapeError::parse(format!("percentage out of range: {:?}", text)));
    }
    Ok(value / 100.0)
}
