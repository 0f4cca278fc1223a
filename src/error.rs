use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while scraping.
///
/// Nothing is retried or swallowed internally: every variant reaches the
/// caller, who decides whether a failure is transient (site slow, game not
/// started) or permanent (game does not exist).
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A target element never became interactive, typically because the
    /// game has not started yet.
    #[error("{what} not ready after {waited:?}")]
    NotReady { what: String, waited: Duration },

    /// The requested game/date combination does not exist on the page.
    #[error("not found: {0}")]
    NotFound(String),

    /// Navigation did not land on a URL carrying a game identifier.
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    /// A captured payload or page text could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// No matching network request (or page load) was observed in time.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// Configuration or team directory could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown team: {0}")]
    UnknownTeam(String),

    /// An element handle from an earlier navigation was used.
    #[error("element handle is stale (page navigated since it was found)")]
    StaleElement,

    /// The browser answered a command with an error or went away.
    #[error("browser error: {0}")]
    Browser(String),

    #[error("failed to launch browser: {0:#}")]
    Launch(#[source] anyhow::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

impl ScrapeError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        ScrapeError::Parse(msg.into())
    }

    pub(crate) fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        ScrapeError::Timeout {
            what: what.into(),
            waited,
        }
    }

    pub(crate) fn not_ready(what: impl Into<String>, waited: Duration) -> Self {
        ScrapeError::NotReady {
            what: what.into(),
            waited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScrapeError::NotFound("requested game does not exist".into());
        assert_eq!(err.to_string(), "not found: requested game does not exist");

        let err = ScrapeError::timeout("rankings.csv", Duration::from_secs(10));
        assert!(err.to_string().contains("rankings.csv"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_launch_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("no such file").context("spawning chromium");
        let err = ScrapeError::Launch(inner);
        let msg = err.to_string();
        assert!(msg.contains("spawning chromium"));
        assert!(msg.contains("no such file"));
    }
}
