use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::capture::{CaptureBuffer, CapturedRequest};
use super::cdp::{CdpConnection, EventHandler};
use super::launcher::BrowserProcess;
use super::{lock, ElementHandle, InterceptedRequest, Locator, PageDriver};
use crate::config::Config;
use crate::error::{Result, ScrapeError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `close` lets the browser exit on its own before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Remote objects are created in this group so they can be released in one
/// call when the page navigates.
const OBJECT_GROUP: &str = "moneypuck";

// Page-side helpers. Each runs with `this` bound to the search scope
// (the document or an element).
const JS_FIRST_XPATH: &str = "function(xp) { return document.evaluate(xp, this, null, \
    XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue; }";
const JS_COUNT_XPATH: &str = "function(xp) { return document.evaluate(xp, this, null, \
    XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength; }";
const JS_NTH_XPATH: &str = "function(xp, i) { return document.evaluate(xp, this, null, \
    XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotItem(i); }";
const JS_FIRST_CSS: &str = "function(sel) { return this.querySelector(sel); }";
const JS_COUNT_CSS: &str = "function(sel) { return this.querySelectorAll(sel).length; }";
const JS_NTH_CSS: &str = "function(sel, i) { return this.querySelectorAll(sel)[i] || null; }";
const JS_CLICKABLE: &str = "function() { \
    const r = this.getBoundingClientRect(); const s = window.getComputedStyle(this); \
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' \
        && s.display !== 'none' && !this.disabled; }";
const JS_TEXT: &str = "function() { return this.innerText; }";
const JS_ATTRIBUTE: &str = "function(name) { return this.getAttribute(name); }";
const JS_CLICK: &str = "function() { \
    this.scrollIntoView({ block: 'center', inline: 'center' }); this.click(); }";

/// One headless browser tab with network capture enabled.
///
/// Dropping the session kills the browser, so it is torn down on every exit
/// path; [`Session::close`] does the same thing explicitly.
pub struct Session {
    cdp: CdpConnection,
    process: BrowserProcess,
    capture: Arc<Mutex<CaptureBuffer>>,
    loads: watch::Receiver<u64>,
    generation: u64,
    navigation_timeout: Duration,
}

impl Session {
    /// Launch a browser and open a tab with capture enabled.
    pub async fn launch(config: &Config) -> Result<Self> {
        let process = BrowserProcess::launch(config).await?;
        let page = process.open_page().await?;

        let capture = Arc::new(Mutex::new(CaptureBuffer::new()));
        let (load_tx, loads) = watch::channel(0u64);

        let handler_capture = Arc::clone(&capture);
        let on_event: EventHandler = Arc::new(move |method, params| {
            if method.starts_with("Network.") {
                lock(&handler_capture).apply_event(method, params);
            } else if method == "Page.loadEventFired" {
                load_tx.send_modify(|n| *n += 1);
            }
        });

        let cdp = CdpConnection::connect(&page.ws_url, on_event).await?;
        cdp.call("Page.enable", json!({})).await?;
        cdp.call("Runtime.enable", json!({})).await?;
        cdp.call(
            "Network.enable",
            json!({
                "maxTotalBufferSize": 200 * 1024 * 1024,
                "maxResourceBufferSize": 50 * 1024 * 1024,
            }),
        )
        .await?;
        cdp.call("Network.setCacheDisabled", json!({ "cacheDisabled": true }))
            .await?;

        info!("[session] Ready (target {})", page.id);
        Ok(Session {
            cdp,
            process,
            capture,
            loads,
            generation: 0,
            navigation_timeout: config.navigation_timeout(),
        })
    }

    /// Ask the browser to quit, give it a moment, then kill it and remove
    /// the profile.
    pub async fn close(mut self) {
        if self.cdp.is_closed() {
            debug!("[session] CDP connection already gone");
        }
        match tokio::time::timeout(CLOSE_GRACE, self.request_browser_close()).await {
            Ok(Ok(())) => debug!("[session] Browser acknowledged close"),
            Ok(Err(e)) => debug!("[session] Browser.close: {}", e),
            Err(_) => debug!("[session] Browser.close unanswered after {:?}", CLOSE_GRACE),
        }
        self.cdp.close().await;
        self.process.shutdown(CLOSE_GRACE).await;
    }

    /// `Browser.close` only exists on the browser-level target.
    async fn request_browser_close(&self) -> Result<()> {
        let ignore_events: EventHandler = Arc::new(|_: &str, _: &Value| {});
        let browser = CdpConnection::connect(self.process.browser_ws_url(), ignore_events).await?;
        let reply = browser.call("Browser.close", json!({})).await;
        browser.close().await;
        reply.map(|_| ())
    }

    fn check(&self, element: &ElementHandle) -> Result<String> {
        if element.generation != self.generation {
            return Err(ScrapeError::StaleElement);
        }
        Ok(element.id.clone())
    }

    async fn invalidate_handles(&mut self) {
        self.generation += 1;
        if let Err(e) = self
            .cdp
            .call("Runtime.releaseObjectGroup", json!({ "objectGroup": OBJECT_GROUP }))
            .await
        {
            debug!("[session] releaseObjectGroup failed: {}", e);
        }
    }

    /// Run a helper with `this` bound to `scope` (or the document) and return
    /// the resulting remote object.
    async fn invoke(
        &self,
        scope: Option<&str>,
        function: &str,
        args: Vec<Value>,
        by_value: bool,
    ) -> Result<Value> {
        let reply = match scope {
            Some(object_id) => {
                let arguments: Vec<Value> = args.into_iter().map(|v| json!({ "value": v })).collect();
                self.cdp
                    .call(
                        "Runtime.callFunctionOn",
                        json!({
                            "functionDeclaration": function,
                            "objectId": object_id,
                            "arguments": arguments,
                            "returnByValue": by_value,
                        }),
                    )
                    .await?
            }
            None => {
                let expression = format!("({}).apply(document, {})", function, Value::Array(args));
                self.cdp
                    .call(
                        "Runtime.evaluate",
                        json!({
                            "expression": expression,
                            "objectGroup": OBJECT_GROUP,
                            "returnByValue": by_value,
                        }),
                    )
                    .await?
            }
        };

        if let Some(details) = reply.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script exception");
            return Err(ScrapeError::Browser(text.to_string()));
        }
        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn invoke_value(&self, scope: Option<&str>, function: &str, args: Vec<Value>) -> Result<Value> {
        let remote = self.invoke(scope, function, args, true).await?;
        Ok(remote.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn invoke_element(
        &self,
        scope: Option<&str>,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Option<ElementHandle>> {
        let remote = self.invoke(scope, function, args, false).await?;
        Ok(remote
            .get("objectId")
            .and_then(Value::as_str)
            .map(|id| ElementHandle::new(id, self.generation)))
    }

    async fn is_clickable(&self, element: &ElementHandle) -> Result<bool> {
        let id = self.check(element)?;
        let value = self.invoke_value(Some(&id), JS_CLICKABLE, vec![]).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>> {
        let reply = self
            .cdp
            .call("Network.getResponseBody", json!({ "requestId": request_id }))
            .await?;
        decode_body(&reply)
    }
}

/// Bytes of a `Network.getResponseBody` reply.
fn decode_body(reply: &Value) -> Result<Vec<u8>> {
    let body = reply.get("body").and_then(Value::as_str).unwrap_or_default();
    if reply.get("base64Encoded").and_then(Value::as_bool).unwrap_or(false) {
        BASE64
            .decode(body)
            .map_err(|e| ScrapeError::parse(format!("bad base64 response body: {}", e)))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

/// A `Page.navigate` reply carrying `errorText` means the load itself failed
/// (DNS, refused connection, aborted).
fn navigate_error(url: &str, reply: &Value) -> Option<ScrapeError> {
    reply
        .get("errorText")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(|text| ScrapeError::Browser(format!("navigation to {} failed: {}", url, text)))
}

#[async_trait]
impl PageDriver for Session {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.clear_requests();
        self.invalidate_handles().await;

        let mut loads = self.loads.clone();
        let _ = loads.borrow_and_update();

        info!("[session] Navigating to {}", url);
        let reply = self.cdp.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(err) = navigate_error(url, &reply) {
            return Err(err);
        }

        match tokio::time::timeout(self.navigation_timeout, loads.changed()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ScrapeError::Browser("browser connection closed".into())),
            Err(_) => Err(ScrapeError::timeout(
                format!("page load of {}", url),
                self.navigation_timeout,
            )),
        }
    }

    fn clear_requests(&mut self) {
        lock(&self.capture).clear();
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        lock(&self.capture).snapshot()
    }

    async fn await_request(&mut self, pattern: &Regex, timeout: Duration) -> Result<InterceptedRequest> {
        let deadline = Instant::now() + timeout;
        loop {
            let hit = lock(&self.capture)
                .find_finished(pattern)
                .map(|r| (r.request_id.clone(), r.url.clone()));

            if let Some((request_id, url)) = hit {
                debug!("[session] Request {} matched {}", url, pattern);
                let body = self.response_body(&request_id).await?;
                return Ok(InterceptedRequest {
                    url,
                    body,
                    pattern: pattern.as_str().to_string(),
                });
            }
            if Instant::now() >= deadline {
                warn!(
                    "[session] No request matched {} ({} captured)",
                    pattern,
                    lock(&self.capture).len()
                );
                return Err(ScrapeError::timeout(
                    format!("request matching {}", pattern),
                    timeout,
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn current_url(&mut self) -> Result<String> {
        let history = self.cdp.call("Page.getNavigationHistory", json!({})).await?;
        let index = history
            .get("currentIndex")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;
        history
            .get("entries")
            .and_then(|e| e.get(index))
            .and_then(|e| e.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ScrapeError::Browser("navigation history has no current entry".into()))
    }

    async fn wait_for_clickable(&mut self, locator: &Locator, timeout: Duration) -> Result<ElementHandle> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find(locator, None).await? {
                if self.is_clickable(&element).await? {
                    return Ok(element);
                }
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::not_ready(format!("{:?}", locator), timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_all(&mut self, locator: &Locator, timeout: Duration) -> Result<Vec<ElementHandle>> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = self.find_all(locator, None).await?;
            if !found.is_empty() {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::not_ready(format!("{:?}", locator), timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn find(&mut self, locator: &Locator, scope: Option<&ElementHandle>) -> Result<Option<ElementHandle>> {
        let scope = scope.map(|s| self.check(s)).transpose()?;
        let (function, query) = match locator {
            Locator::XPath(xp) => (JS_FIRST_XPATH, xp),
            Locator::Css(sel) => (JS_FIRST_CSS, sel),
        };
        self.invoke_element(scope.as_deref(), function, vec![json!(query)]).await
    }

    async fn find_all(&mut self, locator: &Locator, scope: Option<&ElementHandle>) -> Result<Vec<ElementHandle>> {
        let scope = scope.map(|s| self.check(s)).transpose()?;
        let (count_fn, nth_fn, query) = match locator {
            Locator::XPath(xp) => (JS_COUNT_XPATH, JS_NTH_XPATH, xp),
            Locator::Css(sel) => (JS_COUNT_CSS, JS_NTH_CSS, sel),
        };
        let count = self
            .invoke_value(scope.as_deref(), count_fn, vec![json!(query)])
            .await?
            .as_u64()
            .unwrap_or_default();

        let mut found = Vec::with_capacity(count as usize);
        for i in 0..count {
            if let Some(el) = self
                .invoke_element(scope.as_deref(), nth_fn, vec![json!(query), json!(i)])
                .await?
            {
                found.push(el);
            }
        }
        Ok(found)
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String> {
        let id = self.check(element)?;
        let value = self.invoke_value(Some(&id), JS_TEXT, vec![]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&mut self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let id = self.check(element)?;
        let value = self.invoke_value(Some(&id), JS_ATTRIBUTE, vec![json!(name)]).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<()> {
        let id = self.check(element)?;
        self.invoke(Some(&id), JS_CLICK, vec![], true).await?;
        Ok(())
    }
}
