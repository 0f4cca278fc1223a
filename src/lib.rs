//! Scraper for moneypuck.com game data.
//!
//! The site renders everything client-side from CSV files it fetches after
//! page load, so instead of parsing HTML the scraper drives a headless
//! Chromium over the DevTools protocol, watches the page's network traffic
//! and parses the CSV payloads it intercepts.
//!
//! ```no_run
//! # async fn run() -> moneypuck::Result<()> {
//! use moneypuck::{Config, MoneyPuck};
//!
//! let mut mp = MoneyPuck::launch(Config::from_env()?).await?;
//! let today = mp.win_probabilities_for_day(None).await?;
//! let rankings = mp.power_rankings().await?;
//! println!("{} games, {} teams ranked", today.len(), rankings.len());
//! mp.close().await;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod models;
pub mod scraper;
pub mod table;
pub mod teams;

pub use browser::{PageDriver, Session};
pub use config::Config;
pub use error::{Result, ScrapeError};
pub use models::{parse_iso_date, GameData, GameRef, GameWinProbability, TeamProbability};
pub use scraper::MoneyPuck;
pub use table::{Cell, Table};
pub use teams::TeamDirectory;
