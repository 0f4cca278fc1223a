//! Headless browser session with network capture.
//!
//! Architecture:
//! ```text
//!  Chromium ──CDP/WebSocket──▶ CdpConnection (background reader task)
//!                                 │  command replies → pending map
//!                                 │  Network.* events → CaptureBuffer
//!                                 │  Page.loadEventFired → load counter
//!                                 ▼
//!                      Session (PageDriver impl)
//!                          navigate / await_request / element lookups
//! ```

pub mod capture;
pub mod cdp;
pub mod launcher;
pub mod session;

pub use capture::{CaptureBuffer, CaptureState, CapturedRequest};
pub use session::Session;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;

/// How to find elements on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// XPath expression, evaluated relative to the scope element when one
    /// is given (a leading `//` still searches the whole document).
    XPath(String),
    /// CSS selector, evaluated within the scope element when one is given.
    Css(String),
}

impl Locator {
    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }
}

/// Opaque reference to a DOM element, valid until the next navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub(crate) id: String,
    pub(crate) generation: u64,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>, generation: u64) -> Self {
        ElementHandle {
            id: id.into(),
            generation,
        }
    }
}

/// A completed network exchange matched by [`PageDriver::await_request`].
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub pattern: String,
}

/// The browser operations the scraper is built on.
///
/// One driver serves one caller at a time: every method that touches page
/// or capture state takes `&mut self`.
#[async_trait]
pub trait PageDriver: Send {
    /// Clear captured requests, load `url` and wait for the page to settle.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Forget every request captured so far.
    fn clear_requests(&mut self);

    /// Snapshot of the requests captured since the last clear.
    fn requests(&self) -> Vec<CapturedRequest>;

    /// Wait for a finished request whose URL matches `pattern`.
    async fn await_request(&mut self, pattern: &Regex, timeout: Duration)
        -> Result<InterceptedRequest>;

    async fn current_url(&mut self) -> Result<String>;

    /// Wait for the first match of `locator` to be visible and enabled.
    async fn wait_for_clickable(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementHandle>;

    /// Wait for at least one match of `locator` and return all of them.
    async fn wait_for_all(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<ElementHandle>>;

    async fn find(
        &mut self,
        locator: &Locator,
        scope: Option<&ElementHandle>,
    ) -> Result<Option<ElementHandle>>;

    async fn find_all(
        &mut self,
        locator: &Locator,
        scope: Option<&ElementHandle>,
    ) -> Result<Vec<ElementHandle>>;

    /// Rendered text of the element.
    async fn text(&mut self, element: &ElementHandle) -> Result<String>;

    async fn attribute(&mut self, element: &ElementHandle, name: &str) -> Result<Option<String>>;

    async fn click(&mut self, element: &ElementHandle) -> Result<()>;
}

/// Lock a std mutex, ignoring poisoning: the guarded data stays usable.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
