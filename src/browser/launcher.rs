//! Spawning Chromium and discovering its DevTools endpoints.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{Result, ScrapeError};

const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

const MACOS_CHROME: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

/// A running browser process. The process is killed and its profile
/// directory removed when this value is dropped.
pub struct BrowserProcess {
    child: Child,
    browser_ws_url: String,
    /// Taken (and removed) by `shutdown` once the process has exited.
    profile: Option<TempDir>,
}

/// Subset of the `/json/new` reply we need.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    id: String,
    web_socket_debugger_url: String,
}

/// A freshly opened page target.
#[derive(Debug, Clone)]
pub struct PageTarget {
    pub id: String,
    pub ws_url: String,
}

impl BrowserProcess {
    pub async fn launch(config: &Config) -> Result<Self> {
        Self::spawn(config).await.map_err(ScrapeError::Launch)
    }

    async fn spawn(config: &Config) -> anyhow::Result<Self> {
        let exe = find_chrome(config.chrome_path.as_deref())?;
        let profile = new_profile()?;

        info!("[launcher] Starting {} (headless={})", exe.display(), !config.headed);
        let mut child = Command::new(&exe)
            .args(chrome_args(!config.headed, profile.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", exe.display()))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("browser stderr was not captured"))?;

        let browser_ws_url = tokio::time::timeout(config.launch_timeout(), read_devtools_url(stderr))
            .await
            .with_context(|| {
                format!(
                    "browser did not expose a DevTools endpoint within {:?}",
                    config.launch_timeout()
                )
            })??;

        info!("[launcher] DevTools endpoint {}", browser_ws_url);
        Ok(BrowserProcess {
            child,
            browser_ws_url,
            profile: Some(profile),
        })
    }

    pub fn browser_ws_url(&self) -> &str {
        &self.browser_ws_url
    }

    /// Open a new blank tab and return its WebSocket endpoint.
    pub async fn open_page(&self) -> Result<PageTarget> {
        let endpoint = http_endpoint(&self.browser_ws_url)?;
        let new_url = endpoint
            .join("json/new?about:blank")
            .map_err(|e| ScrapeError::Browser(format!("bad DevTools endpoint: {}", e)))?;

        // Chrome only accepts PUT on /json/new.
        let target: TargetInfo = reqwest::Client::new()
            .put(new_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("[launcher] Opened page target {}", target.id);
        Ok(PageTarget {
            id: target.id,
            ws_url: target.web_socket_debugger_url,
        })
    }

    /// Give the browser `grace` to exit on its own, kill it otherwise, then
    /// remove the profile directory.
    pub async fn shutdown(&mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!("[launcher] Browser exited ({})", status),
            Ok(Err(e)) => warn!("[launcher] Failed to wait for browser: {}", e),
            Err(_) => {
                debug!("[launcher] Browser still running after {:?}, killing", grace);
                if let Err(e) = self.child.kill().await {
                    warn!("[launcher] Failed to kill browser: {}", e);
                }
            }
        }
        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            if let Err(e) = profile.close() {
                warn!("[launcher] Could not remove profile {}: {}", path.display(), e);
            }
        }
        info!("[launcher] Browser stopped");
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        // No await here; the TempDir field removes the profile after this.
        let _ = self.child.start_kill();
    }
}

fn new_profile() -> anyhow::Result<TempDir> {
    tempfile::Builder::new()
        .prefix("moneypuck-profile-")
        .tempdir()
        .context("creating browser profile directory")
}

fn find_chrome(configured: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return which::which(path).with_context(|| format!("configured browser {} not found", path.display()));
    }
    for name in CHROME_CANDIDATES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }
    let mac = Path::new(MACOS_CHROME);
    if mac.exists() {
        return Ok(mac.to_path_buf());
    }
    Err(anyhow!(
        "no Chrome/Chromium found on PATH (tried {}); set CHROME_PATH",
        CHROME_CANDIDATES.join(", ")
    ))
}

fn chrome_args(headless: bool, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--remote-debugging-port=0".to_string(),
        "--remote-allow-origins=*".to_string(),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-gpu".to_string(),
        "--window-size=1400,1000".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Read stderr until the DevTools line shows up, then keep draining it in
/// the background so the browser never blocks on a full pipe.
async fn read_devtools_url(stderr: ChildStderr) -> anyhow::Result<String> {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines.next_line().await.context("reading browser stderr")? {
        if let Some(url) = parse_devtools_line(&line) {
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[chrome] {}", line);
                }
            });
            return Ok(url);
        }
        debug!("[chrome] {}", line);
    }
    Err(anyhow!("browser exited before announcing its DevTools endpoint"))
}

fn parse_devtools_line(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(DEVTOOLS_PREFIX)?;
    rest.starts_with("ws://").then(|| rest.trim().to_string())
}

/// `ws://127.0.0.1:PORT/devtools/browser/ID` → `http://127.0.0.1:PORT/`
fn http_endpoint(ws_url: &str) -> Result<Url> {
    let ws = Url::parse(ws_url)
        .map_err(|e| ScrapeError::Browser(format!("bad DevTools URL {}: {}", ws_url, e)))?;
    let host = ws
        .host_str()
        .ok_or_else(|| ScrapeError::Browser(format!("DevTools URL has no host: {}", ws_url)))?;
    let port = ws
        .port()
        .ok_or_else(|| ScrapeError::Browser(format!("DevTools URL has no port: {}", ws_url)))?;
    Url::parse(&format!("http://{}:{}/", host, port))
        .map_err(|e| ScrapeError::Browser(format!("bad DevTools endpoint: {}", e)))
}
