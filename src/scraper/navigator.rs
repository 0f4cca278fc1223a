//! Getting the browser onto the right page: a date's game listing, or one
//! game's detail page reached by clicking the home team's logo.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::browser::{Locator, PageDriver};
use crate::config::Config;
use crate::error::{Result, ScrapeError};
use crate::models::{resolve_date, GameRef};
use crate::teams::TeamDirectory;

/// From a team logo up to the element holding the whole game entry.
const CONTAINER_XPATH: &str = "./../../..";

const URL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `{site}/index.html?date=YYYY-MM-DD`
pub fn date_url(site: &Url, date: Option<NaiveDate>) -> Result<Url> {
    let mut url = site
        .join("index.html")
        .map_err(|e| ScrapeError::Config(format!("cannot build date page URL: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("date", &resolve_date(date).format("%Y-%m-%d").to_string());
    Ok(url)
}

/// A team logo wrapped in a link, i.e. one that leads to a game page.
pub fn linked_logo(alt: &str) -> Locator {
    Locator::xpath(format!("//a/img[@alt={}]", xpath_literal(alt)))
}

/// Any team logo on the page.
pub fn logo(alt: &str) -> Locator {
    Locator::xpath(format!("//img[@alt={}]", xpath_literal(alt)))
}

/// Quote a string for use inside an XPath expression.
fn xpath_literal(s: &str) -> String {
    if !s.contains('"') {
        format!("\"{}\"", s)
    } else if !s.contains('\'') {
        format!("'{}'", s)
    } else {
        let parts: Vec<String> = s.split('"').map(|p| format!("\"{}\"", p)).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

/// Load the game listing for `date` (today when `None`).
pub async fn to_date<D: PageDriver>(
    driver: &mut D,
    config: &Config,
    date: Option<NaiveDate>,
) -> Result<Url> {
    let url = date_url(&config.site_url()?, date)?;
    driver.navigate(url.as_str()).await?;
    Ok(url)
}

/// Open the detail page of `game` and return the URL it landed on.
///
/// The capture buffer is cleared right before the click, so every request
/// captured afterwards belongs to the game page.
pub async fn to_game<D: PageDriver>(
    driver: &mut D,
    teams: &TeamDirectory,
    config: &Config,
    game: &GameRef,
) -> Result<String> {
    let home_alt = teams.logo_alt(&game.home)?;
    let away_alt = teams.logo_alt(&game.away)?;
    let date = game.resolved_date();

    to_date(driver, config, game.date).await?;

    let home = driver
        .wait_for_clickable(&linked_logo(&home_alt), config.element_timeout())
        .await
        .map_err(|e| match e {
            ScrapeError::NotReady { waited, .. } => ScrapeError::NotReady {
                what: format!("{} game link on {}", home_alt, date),
                waited,
            },
            other => other,
        })?;

    let container = driver
        .find(&Locator::xpath(CONTAINER_XPATH), Some(&home))
        .await?
        .ok_or_else(|| ScrapeError::NotFound(format!("no game entry around the {} logo", home_alt)))?;

    // The leading `//` makes this a document-wide search even though it is
    // anchored at the container: with many games on one date it can match
    // another game's logo.
    let away = driver.find(&logo(&away_alt), Some(&container)).await?;
    if away.is_none() {
        return Err(ScrapeError::NotFound(format!(
            "requested game does not exist: {} at {} on {}",
            game.away, game.home, date
        )));
    }

    driver.clear_requests();
    let listing_url = driver.current_url().await?;
    debug!("Clicking {} logo on {}", home_alt, listing_url);
    driver.click(&home).await?;

    let game_url = wait_for_url_change(driver, &listing_url, config.navigation_timeout()).await?;
    info!("Opened game page {}", game_url);
    Ok(game_url)
}

async fn wait_for_url_change<D: PageDriver>(
    driver: &mut D,
    from: &str,
    timeout: Duration,
) -> Result<String> {
    let deadline = Instant::now() + timeout;
    loop {
        let url = driver.current_url().await?;
        if url != from {
            return Ok(url);
        }
        if Instant::now() >= deadline {
            return Err(ScrapeError::timeout(format!("navigation away from {}", from), timeout));
        }
        tokio::time::sleep(URL_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testing::{fixture_config, fixture_teams, FakeDriver, FakePage, DATE_URL};

    fn date() -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2021, 1, 23)
    }

    fn listing_with_game() -> FakePage {
        // <div game-1><div><a><img alt=CBJ/></a></div> ... <img alt=TBL/></div>
        FakePage::new()
            .clickable(linked_logo("COLUMBUS BLUE JACKETS"), "cbj-logo")
            .clickable(linked_logo("TAMPA BAY LIGHTNING"), "tbl-logo")
            .child("cbj-logo", Locator::xpath(CONTAINER_XPATH), "game-1")
            .child("tbl-logo", Locator::xpath(CONTAINER_XPATH), "game-1")
            .global(logo("TAMPA BAY LIGHTNING"), "tbl-logo")
            .global(logo("COLUMBUS BLUE JACKETS"), "cbj-logo")
            .click_to("cbj-logo", "http://moneypuck.com/g.htm?id=2020020121")
            .click_to("tbl-logo", "http://moneypuck.com/g.htm?id=2020020121")
    }

    #[test]
    fn test_date_url() {
        let site = Url::parse("http://moneypuck.com/").unwrap();
        assert_eq!(
            date_url(&site, date()).unwrap().as_str(),
            "http://moneypuck.com/index.html?date=2021-01-23"
        );
    }

    #[test]
    fn test_logo_locators() {
        assert_eq!(
            linked_logo("MONTREAL CANADIENS"),
            Locator::XPath("//a/img[@alt=\"MONTREAL CANADIENS\"]".into())
        );
        assert_eq!(logo("VAN"), Locator::XPath("//img[@alt=\"VAN\"]".into()));
    }

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("abc"), "\"abc\"");
        assert_eq!(xpath_literal("a\"b"), "'a\"b'");
        assert_eq!(xpath_literal("a\"b'c"), "concat(\"a\", '\"', \"b'c\")");
    }

    #[tokio::test]
    async fn test_to_date_navigates() {
        let mut driver = FakeDriver::new();
        to_date(&mut driver, &fixture_config(), date()).await.unwrap();
        assert_eq!(driver.visited(), &[DATE_URL.to_string()]);
    }

    #[tokio::test]
    async fn test_to_game_clicks_home_logo() {
        let mut driver = FakeDriver::new().page(DATE_URL, listing_with_game());
        let game = GameRef::new("cbj", "tbl", date());

        let url = to_game(&mut driver, &fixture_teams(), &fixture_config(), &game)
            .await
            .unwrap();
        assert_eq!(url, "http://moneypuck.com/g.htm?id=2020020121");
        assert_eq!(driver.clicked(), &["cbj-logo".to_string()]);
    }

    #[tokio::test]
    async fn test_to_game_is_order_independent() {
        let teams = fixture_teams();
        let config = fixture_config();

        let mut a = FakeDriver::new().page(DATE_URL, listing_with_game());
        let mut b = FakeDriver::new().page(DATE_URL, listing_with_game());
        let one = to_game(&mut a, &teams, &config, &GameRef::new("CBJ", "tbl", date())).await.unwrap();
        let two = to_game(&mut b, &teams, &config, &GameRef::new("tbl", "Cbj", date())).await.unwrap();
        assert_eq!(one, two);
    }

    #[tokio::test]
    async fn test_to_game_missing_away_is_not_found() {
        let mut driver = FakeDriver::new().page(DATE_URL, listing_with_game());
        let game = GameRef::new("cbj", "tor", date());
        let err = to_game(&mut driver, &fixture_teams(), &fixture_config(), &game)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::NotFound(ref m) if m.contains("does not exist")));
        assert!(driver.clicked().is_empty());
    }

    #[tokio::test]
    async fn test_to_game_away_search_is_document_wide() {
        // Toronto only appears in a different game's entry, yet the lookup
        // anchored at game-1 still finds it.
        let page = listing_with_game().global(logo("TORONTO MAPLE LEAFS"), "tor-logo-in-game-2");
        let mut driver = FakeDriver::new().page(DATE_URL, page);
        let game = GameRef::new("cbj", "tor", date());
        assert!(to_game(&mut driver, &fixture_teams(), &fixture_config(), &game)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_to_game_not_clickable_is_not_ready() {
        let mut driver = FakeDriver::new().page(DATE_URL, FakePage::new());
        let game = GameRef::new("nyi", "njd", date());
        let err = to_game(&mut driver, &fixture_teams(), &fixture_config(), &game)
            .await
            .unwrap_err();
        match err {
            ScrapeError::NotReady { what, .. } => assert!(what.contains("NEW YORK ISLANDERS")),
            other => panic!("expected NotReady, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_to_game_unknown_team() {
        let mut driver = FakeDriver::new();
        let game = GameRef::new("qcn", "mtl", date());
        let err = to_game(&mut driver, &fixture_teams(), &fixture_config(), &game)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::UnknownTeam(_)));
        assert!(driver.visited().is_empty());
    }

    #[tokio::test]
    async fn test_to_game_clears_capture_before_click() {
        let page = listing_with_game().request("http://moneypuck.com/moneypuck/gameData/20202021/2020020121.csv", "stale");
        let mut driver = FakeDriver::new().page(DATE_URL, page);
        let game = GameRef::new("cbj", "tbl", date());
        to_game(&mut driver, &fixture_teams(), &fixture_config(), &game)
            .await
            .unwrap();
        assert!(driver.requests().is_empty());
    }

    #[tokio::test]
    async fn test_to_game_times_out_when_click_does_not_navigate() {
        let page = listing_with_game().click_to("cbj-logo", DATE_URL);
        let mut driver = FakeDriver::new().page(DATE_URL, page);
        let game = GameRef::new("cbj", "tbl", date());
        let err = to_game(&mut driver, &fixture_teams(), &fixture_config(), &game)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Timeout { .. }));
    }
}
