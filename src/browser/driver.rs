//! Page driver seam: the narrow interface to a real browser.
//!
//! The tab session store owns the tab list and the active index; a driver
//! only knows how to do one thing to one tab. Implementations:
//!
//! - [`WebDriverDriver`](super::webdriver::WebDriverDriver): W3C WebDriver over HTTP.
//! - [`MemoryDriver`](super::memory::MemoryDriver): in-process fake for dry runs and tests.

use crate::action::ScrollDirection;
use crate::error::ErrorCode;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Opaque tab identifier owned by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabHandle(pub String);

impl TabHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from a page driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// No element matched the selector (yet).
    #[error("no element matches `{selector}`")]
    NoSuchElement { selector: String },

    /// The tab was closed underneath us.
    #[error("tab {handle} no longer exists")]
    NoSuchTab { handle: String },

    /// The browser itself is gone or never started.
    #[error("browser unavailable: {0}")]
    Unavailable(String),

    /// Unexpected driver response.
    #[error("driver protocol error: {0}")]
    Protocol(String),

    /// A driver call exceeded its deadline.
    #[error("driver call timed out after {ms} ms")]
    Timeout { ms: u64 },
}

impl DriverError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoSuchElement { .. } | Self::NoSuchTab { .. } => ErrorCode::NotFound,
            Self::Unavailable(_) => ErrorCode::ServiceUnavailable,
            Self::Protocol(_) | Self::Timeout { .. } => ErrorCode::BrowserError,
        }
    }
}

/// Single-tab browser operations.
///
/// Element methods fail fast with [`DriverError::NoSuchElement`]; waiting
/// for an element to appear is the caller's job.
#[async_trait]
pub trait PageDriver: Send {
    /// Short backend name for logs (e.g. "webdriver").
    fn name(&self) -> &'static str;

    /// Handles of every open tab, in browser order.
    async fn handles(&mut self) -> Result<Vec<TabHandle>, DriverError>;

    /// Open a blank tab and return its handle.
    async fn new_tab(&mut self) -> Result<TabHandle, DriverError>;

    async fn close_tab(&mut self, tab: &TabHandle) -> Result<(), DriverError>;

    /// Bring a tab to the foreground.
    async fn activate(&mut self, tab: &TabHandle) -> Result<(), DriverError>;

    async fn navigate(&mut self, tab: &TabHandle, url: &str) -> Result<(), DriverError>;

    /// Wait until the tab has finished loading. Returns `false` when `wait`
    /// elapsed first.
    async fn wait_for_load(&mut self, tab: &TabHandle, wait: Duration) -> Result<bool, DriverError>;

    /// Title of `tab`. May switch the driver's current window to `tab`.
    async fn title(&mut self, tab: &TabHandle) -> Result<String, DriverError>;

    /// Replace the value of an input.
    async fn fill(&mut self, tab: &TabHandle, selector: &str, text: &str) -> Result<(), DriverError>;

    /// Press a key or chord (`"Enter"`, `"Control+Enter"`) on an element.
    async fn press(&mut self, tab: &TabHandle, selector: &str, key: &str) -> Result<(), DriverError>;

    async fn click(&mut self, tab: &TabHandle, selector: &str) -> Result<(), DriverError>;

    /// Scroll by 80% of the viewport height.
    async fn scroll(&mut self, tab: &TabHandle, direction: ScrollDirection) -> Result<(), DriverError>;

    /// Close the browser session.
    async fn quit(&mut self) -> Result<(), DriverError>;
}
