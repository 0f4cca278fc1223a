//! Turning a navigation into a table: wait for the CSV the page fetches,
//! decode it, parse it.

use regex::Regex;
use tracing::{debug, info};

use crate::browser::{InterceptedRequest, PageDriver};
use crate::config::Config;
use crate::error::{Result, ScrapeError};
use crate::models::GameRef;
use crate::table::Table;
use crate::teams::TeamDirectory;

use super::navigator;

/// Builds the request pattern for one game's CSV from the site host and the
/// game id.
pub type FilenameFn = fn(&str, &str) -> Result<Regex>;

/// Per-player stats: `<host>/moneypuck/playerData/games/<season>/<id>.csv`
pub fn stats_pattern(host: &str, game_id: &str) -> Result<Regex> {
    build_pattern(&format!(
        "{}/moneypuck/playerData/games/.*/{}\\.csv",
        regex::escape(host),
        regex::escape(game_id)
    ))
}

/// Event log with running win probability: `<host>/moneypuck/gameData/<season>/<id>.csv`
pub fn events_pattern(host: &str, game_id: &str) -> Result<Regex> {
    build_pattern(&format!(
        "{}/moneypuck/gameData/.*/{}\\.csv",
        regex::escape(host),
        regex::escape(game_id)
    ))
}

/// Exact-path pattern for a fixed CSV under the site's data root.
pub fn data_pattern(host: &str, path: &str) -> Result<Regex> {
    build_pattern(&format!(
        "{}/moneypuck/{}",
        regex::escape(host),
        regex::escape(path)
    ))
}

fn build_pattern(raw: &str) -> Result<Regex> {
    Regex::new(raw).map_err(|e| ScrapeError::Config(format!("bad request pattern {}: {}", raw, e)))
}

/// Game id = last `=`-separated token of the game page URL.
pub fn game_id_from_url(url: &str) -> Result<String> {
    match url.rsplit_once('=') {
        Some((_, id)) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ScrapeError::MalformedUrl(format!("no game id in {}", url))),
    }
}

fn decode(request: InterceptedRequest) -> Result<Table> {
    debug!(
        "Decoding {} bytes from {} (pattern {})",
        request.body.len(),
        request.url,
        request.pattern
    );
    Table::from_csv_bytes(&request.body)
}

/// Load `url` and parse the first completed request matching `pattern`.
pub async fn capture_table<D: PageDriver>(
    driver: &mut D,
    config: &Config,
    url: &str,
    pattern: &Regex,
) -> Result<Table> {
    driver.navigate(url).await?;
    let request = driver.await_request(pattern, config.request_timeout()).await?;
    let table = decode(request)?;
    info!("Captured {} rows from {}", table.len(), url);
    Ok(table)
}

/// Open `game`'s page and parse the CSV selected by `filename_fn`.
pub async fn capture_game_table<D: PageDriver>(
    driver: &mut D,
    teams: &TeamDirectory,
    config: &Config,
    game: &GameRef,
    filename_fn: FilenameFn,
) -> Result<Table> {
    let game_url = navigator::to_game(driver, teams, config, game).await?;
    let game_id = game_id_from_url(&game_url)?;
    let pattern = filename_fn(&config.site_host()?, &game_id)?;

    let request = driver.await_request(&pattern, config.request_timeout()).await?;
    let table = decode(request)?;
    info!("Captured {} rows for game {}", table.len(), game_id);
    Ok(table)
}
