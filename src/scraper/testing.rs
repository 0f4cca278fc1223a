//! Scripted in-memory [`PageDriver`] for exercising the scraping logic
//! without a browser.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::browser::{
    CaptureBuffer, CapturedRequest, ElementHandle, InterceptedRequest, Locator, PageDriver,
};
use crate::config::Config;
use crate::error::{Result, ScrapeError};
use crate::teams::TeamDirectory;

pub const DATE_URL: &str = "http://moneypuck.com/index.html?date=2021-01-23";

pub fn fixture_config() -> Config {
    Config {
        base_url: "http://moneypuck.com".to_string(),
        element_timeout_secs: 1,
        request_timeout_secs: 1,
        navigation_timeout_secs: 1,
        ..Config::default()
    }
}

pub fn fixture_teams() -> TeamDirectory {
    TeamDirectory::from_toml_str(include_str!("../../nhl_teams.toml")).unwrap()
}

/// What one URL looks like once loaded.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    clickable: HashMap<Locator, String>,
    children: HashMap<(Option<String>, Locator), Vec<String>>,
    texts: HashMap<String, String>,
    attrs: HashMap<(String, String), String>,
    requests: Vec<(String, Vec<u8>)>,
    clicks: HashMap<String, String>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// `locator` resolves to a visible, enabled element.
    pub fn clickable(mut self, locator: Locator, id: &str) -> Self {
        self.clickable.insert(locator, id.to_string());
        self
    }

    /// `locator` evaluated from the document matches `id` (appended).
    pub fn global(mut self, locator: Locator, id: &str) -> Self {
        self.children.entry((None, locator)).or_default().push(id.to_string());
        self
    }

    /// `locator` evaluated from `parent` matches `id` (appended).
    pub fn child(mut self, parent: &str, locator: Locator, id: &str) -> Self {
        self.children
            .entry((Some(parent.to_string()), locator))
            .or_default()
            .push(id.to_string());
        self
    }

    pub fn text(mut self, id: &str, text: &str) -> Self {
        self.texts.insert(id.to_string(), text.to_string());
        self
    }

    pub fn attr(mut self, id: &str, name: &str, value: &str) -> Self {
        self.attrs.insert((id.to_string(), name.to_string()), value.to_string());
        self
    }

    /// A request the page issues while loading.
    pub fn request(mut self, url: &str, body: &str) -> Self {
        self.requests.push((url.to_string(), body.as_bytes().to_vec()));
        self
    }

    /// Clicking `id` navigates to `url`.
    pub fn click_to(mut self, id: &str, url: &str) -> Self {
        self.clicks.insert(id.to_string(), url.to_string());
        self
    }
}

pub struct FakeDriver {
    pages: HashMap<String, FakePage>,
    current: String,
    generation: u64,
    capture: CaptureBuffer,
    bodies: HashMap<String, Vec<u8>>,
    visited: Vec<String>,
    clicked: Vec<String>,
}

impl FakeDriver {
    pub fn new() -> Self {
        FakeDriver {
            pages: HashMap::new(),
            current: "about:blank".to_string(),
            generation: 0,
            capture: CaptureBuffer::new(),
            bodies: HashMap::new(),
            visited: Vec::new(),
            clicked: Vec::new(),
        }
    }

    pub fn page(mut self, url: &str, page: FakePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    pub fn clicked(&self) -> &[String] {
        &self.clicked
    }

    fn load(&mut self, url: &str) {
        self.current = url.to_string();
        self.generation += 1;
        let requests = self
            .pages
            .get(url)
            .map(|p| p.requests.clone())
            .unwrap_or_default();
        for (req_url, body) in requests {
            self.capture.push_finished(&req_url);
            self.bodies.insert(req_url, body);
        }
    }

    fn current_page(&self) -> Option<&FakePage> {
        self.pages.get(&self.current)
    }

    fn handle(&self, id: &str) -> ElementHandle {
        ElementHandle::new(id, self.generation)
    }

    fn check(&self, element: &ElementHandle) -> Result<String> {
        if element.generation != self.generation {
            return Err(ScrapeError::StaleElement);
        }
        Ok(element.id.clone())
    }

    fn matches(&self, locator: &Locator, scope: Option<&ElementHandle>) -> Result<Vec<String>> {
        let scope_id = scope.map(|s| self.check(s)).transpose()?;
        let Some(page) = self.current_page() else {
            return Ok(vec![]);
        };
        if let Some(found) = page.children.get(&(scope_id.clone(), locator.clone())) {
            return Ok(found.clone());
        }
        // XPath `//…` ignores the context node and searches the document.
        let document_wide = matches!(locator, Locator::XPath(xp) if xp.starts_with("//"));
        if scope_id.is_some() && document_wide {
            if let Some(found) = page.children.get(&(None, locator.clone())) {
                return Ok(found.clone());
            }
        }
        Ok(vec![])
    }
}

#[async_trait]
impl PageDriver for FakeDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.clear_requests();
        self.visited.push(url.to_string());
        self.load(url);
        Ok(())
    }

    fn clear_requests(&mut self) {
        self.capture.clear();
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.capture.snapshot()
    }

    async fn await_request(&mut self, pattern: &Regex, timeout: Duration) -> Result<InterceptedRequest> {
        let hit = self.capture.find_finished(pattern).map(|r| r.url.clone());
        match hit {
            Some(url) => Ok(InterceptedRequest {
                body: self.bodies.get(&url).cloned().unwrap_or_default(),
                url,
                pattern: pattern.as_str().to_string(),
            }),
            None => Err(ScrapeError::timeout(
                format!("request matching {}", pattern),
                timeout,
            )),
        }
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.current.clone())
    }

    async fn wait_for_clickable(&mut self, locator: &Locator, timeout: Duration) -> Result<ElementHandle> {
        let id = self
            .current_page()
            .and_then(|p| p.clickable.get(locator))
            .cloned();
        match id {
            Some(id) => Ok(self.handle(&id)),
            None => Err(ScrapeError::not_ready(format!("{:?}", locator), timeout)),
        }
    }

    async fn wait_for_all(&mut self, locator: &Locator, timeout: Duration) -> Result<Vec<ElementHandle>> {
        let found = self.matches(locator, None)?;
        if found.is_empty() {
            return Err(ScrapeError::not_ready(format!("{:?}", locator), timeout));
        }
        Ok(found.iter().map(|id| self.handle(id)).collect())
    }

    async fn find(&mut self, locator: &Locator, scope: Option<&ElementHandle>) -> Result<Option<ElementHandle>> {
        let found = self.matches(locator, scope)?;
        Ok(found.first().map(|id| self.handle(id)))
    }

    async fn find_all(&mut self, locator: &Locator, scope: Option<&ElementHandle>) -> Result<Vec<ElementHandle>> {
        let found = self.matches(locator, scope)?;
        Ok(found.iter().map(|id| self.handle(id)).collect())
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String> {
        let id = self.check(element)?;
        Ok(self
            .current_page()
            .and_then(|p| p.texts.get(&id))
            .cloned()
            .unwrap_or_default())
    }

    async fn attribute(&mut self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let id = self.check(element)?;
        Ok(self
            .current_page()
            .and_then(|p| p.attrs.get(&(id, name.to_string())))
            .cloned())
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<()> {
        let id = self.check(element)?;
        self.clicked.push(id.clone());
        let target = self.current_page().and_then(|p| p.clicks.get(&id)).cloned();
        if let Some(url) = target {
            self.load(&url);
        }
        Ok(())
    }
}
