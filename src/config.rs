use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::error::{Result, ScrapeError};

/// MoneyPuck scraper settings
#[derive(Parser, Debug, Clone)]
#[command(name = "moneypuck", version, about)]
pub struct Config {
    /// Site root every page and CSV path hangs off
    #[arg(long, env = "MONEYPUCK_BASE_URL", default_value = "http://moneypuck.com")]
    pub base_url: String,

    /// TOML file mapping short team codes to the names used on the site
    #[arg(long, env = "MONEYPUCK_TEAMS_FILE", default_value = "nhl_teams.toml")]
    pub teams_file: PathBuf,

    /// Chrome/Chromium executable (searched on PATH when unset)
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[arg(long, env = "MONEYPUCK_HEADED", default_value = "false")]
    pub headed: bool,

    /// Seconds to wait for a page element (team logo, table rows)
    #[arg(long, env = "MONEYPUCK_ELEMENT_TIMEOUT_SECS", default_value = "10")]
    pub element_timeout_secs: u64,

    /// Seconds to wait for a matching CSV request to complete
    #[arg(long, env = "MONEYPUCK_REQUEST_TIMEOUT_SECS", default_value = "10")]
    pub request_timeout_secs: u64,

    /// Seconds to wait for a page load to settle
    #[arg(long, env = "MONEYPUCK_NAVIGATION_TIMEOUT_SECS", default_value = "30")]
    pub navigation_timeout_secs: u64,

    /// Seconds to wait for the browser to expose its DevTools endpoint
    #[arg(long, env = "MONEYPUCK_LAUNCH_TIMEOUT_SECS", default_value = "20")]
    pub launch_timeout_secs: u64,
}

/// Built-in defaults. Never consults the environment.
impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: "http://moneypuck.com".to_string(),
            teams_file: PathBuf::from("nhl_teams.toml"),
            chrome_path: None,
            headed: false,
            element_timeout_secs: 10,
            request_timeout_secs: 10,
            navigation_timeout_secs: 30,
            launch_timeout_secs: 20,
        }
    }
}

impl Config {
    /// Defaults overridden by the `MONEYPUCK_*` / `CHROME_PATH` env vars.
    pub fn from_env() -> Result<Self> {
        Self::try_from_args(["moneypuck"])
    }

    /// Parse command-line style arguments (env vars fill the gaps). Bad
    /// values are returned as [`ScrapeError::Config`], never printed.
    pub fn try_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Config::try_parse_from(args).map_err(|e| ScrapeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.site_url()?;
        if url.host_str().is_none() {
            return Err(ScrapeError::Config(format!(
                "base_url has no host: {}",
                self.base_url
            )));
        }
        for (name, secs) in [
            ("element_timeout_secs", self.element_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("navigation_timeout_secs", self.navigation_timeout_secs),
            ("launch_timeout_secs", self.launch_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ScrapeError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Base URL with a trailing slash so relative page names join under it.
    pub fn site_url(&self) -> Result<Url> {
        let mut raw = self.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw)
            .map_err(|e| ScrapeError::Config(format!("invalid base_url {}: {}", self.base_url, e)))
    }

    /// Host used in request patterns, e.g. `moneypuck.com`.
    pub fn site_host(&self) -> Result<String> {
        let url = self.site_url()?;
        let host = url
            .host_str()
            .ok_or_else(|| ScrapeError::Config(format!("base_url has no host: {}", self.base_url)))?;
        Ok(host.trim_start_matches("www.").to_string())
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that parse see the process environment; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn config(args: &[&str]) -> Config {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut argv = vec!["moneypuck"];
        argv.extend_from_slice(args);
        Config::try_from_args(argv).unwrap()
    }

    #[test]
    fn test_default_matches_flag_defaults() {
        let parsed = config(&[]);
        let built = Config::default();
        assert_eq!(built.base_url, parsed.base_url);
        assert_eq!(built.teams_file, parsed.teams_file);
        assert_eq!(built.element_timeout_secs, parsed.element_timeout_secs);
        assert_eq!(built.request_timeout_secs, parsed.request_timeout_secs);
        assert_eq!(built.navigation_timeout_secs, parsed.navigation_timeout_secs);
        assert_eq!(built.launch_timeout_secs, parsed.launch_timeout_secs);
        assert!(built.validate().is_ok());
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("MONEYPUCK_LAUNCH_TIMEOUT_SECS", "ten");
        let from_env = Config::from_env();
        let built = Config::default();
        std::env::remove_var("MONEYPUCK_LAUNCH_TIMEOUT_SECS");

        match from_env {
            Err(ScrapeError::Config(msg)) => assert!(msg.contains("launch-timeout-secs")),
            other => panic!("expected Config error, got {:?}", other),
        }
        assert_eq!(built.launch_timeout_secs, 20);
    }

    #[test]
    fn test_bad_flag_value_is_config_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let err = Config::try_from_args(["moneypuck", "--element-timeout-secs", "ten"]).unwrap_err();
        assert!(matches!(err, ScrapeError::Config(_)));
    }

    #[test]
    fn test_defaults_validate() {
        let cfg = config(&["--base-url", "http://moneypuck.com"]);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.element_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_site_url_gets_trailing_slash() {
        let cfg = config(&["--base-url", "https://www.moneypuck.com"]);
        assert_eq!(cfg.site_url().unwrap().as_str(), "https://www.moneypuck.com/");
        assert_eq!(cfg.site_host().unwrap(), "moneypuck.com");
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let cfg = config(&["--base-url", "not a url"]);
        assert!(matches!(cfg.validate(), Err(ScrapeError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let cfg = config(&[
            "--base-url",
            "http://moneypuck.com",
            "--request-timeout-secs",
            "0",
        ]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }
}
