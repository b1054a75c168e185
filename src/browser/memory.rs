//! In-memory page driver.
//!
//! Models tabs as URL + title records. Titles are derived from the URL with
//! a small table of well-known sites so the compose-surface and first-result
//! logic behave as they would against a real browser. Clones share state, so
//! a test can keep a handle while the store owns the driver.

use super::driver::{DriverError, PageDriver, TabHandle};
use crate::action::ScrollDirection;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const BLANK_URL: &str = "about:blank";
const VIEWPORT_HEIGHT: i64 = 800;

#[derive(Debug, Clone)]
struct MemoryPage {
    handle: TabHandle,
    url: String,
    title: String,
    fields: HashMap<String, String>,
    scroll_y: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    pages: Vec<MemoryPage>,
    next_id: u64,
    foreground: Option<TabHandle>,
    missing: HashSet<String>,
    slow_loads: bool,
    quit: bool,
    events: Vec<String>,
}

impl MemoryState {
    fn alloc_handle(&mut self) -> TabHandle {
        self.next_id += 1;
        TabHandle(format!("mem-{}", self.next_id))
    }

    fn page_mut(&mut self, tab: &TabHandle) -> Result<&mut MemoryPage, DriverError> {
        if self.quit {
            return Err(DriverError::Unavailable("browser was closed".to_owned()));
        }
        self.pages
            .iter_mut()
            .find(|p| &p.handle == tab)
            .ok_or_else(|| DriverError::NoSuchTab {
                handle: tab.to_string(),
            })
    }

    fn check_element(&self, selector: &str) -> Result<(), DriverError> {
        if self.missing.contains(selector) {
            Err(DriverError::NoSuchElement {
                selector: selector.to_owned(),
            })
        } else {
            Ok(())
        }
    }
}

/// Shared-state fake browser.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDriver {
    /// A browser with no tabs open.
    pub fn new() -> Self {
        Self::default()
    }

    /// A browser with the given `(url, title)` tabs; the first is in front.
    pub fn with_pages(pages: &[(&str, &str)]) -> Self {
        let driver = Self::new();
        {
            let mut state = driver.lock();
            for (url, title) in pages {
                let handle = state.alloc_handle();
                state.pages.push(MemoryPage {
                    handle,
                    url: (*url).to_owned(),
                    title: (*title).to_owned(),
                    fields: HashMap::new(),
                    scroll_y: 0,
                });
            }
            state.foreground = state.pages.first().map(|p| p.handle.clone());
        }
        driver
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn page_count(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn titles(&self) -> Vec<String> {
        self.lock().pages.iter().map(|p| p.title.clone()).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().pages.iter().map(|p| p.url.clone()).collect()
    }

    /// Index of the tab currently in the foreground.
    pub fn foreground_index(&self) -> Option<usize> {
        let state = self.lock();
        let fg = state.foreground.as_ref()?;
        state.pages.iter().position(|p| &p.handle == fg)
    }

    /// Value last filled into `selector` on tab `index`.
    pub fn field(&self, index: usize, selector: &str) -> Option<String> {
        self.lock().pages.get(index)?.fields.get(selector).cloned()
    }

    pub fn scroll_offset(&self, index: usize) -> Option<i64> {
        self.lock().pages.get(index).map(|p| p.scroll_y)
    }

    /// Element-level events in order (`fill`, `press`, `click`).
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Make `selector` unresolvable until [`MemoryDriver::restore`].
    pub fn hide(&self, selector: &str) {
        self.lock().missing.insert(selector.to_owned());
    }

    pub fn restore(&self, selector: &str) {
        self.lock().missing.remove(selector);
    }

    /// When set, page loads never complete.
    pub fn set_slow_loads(&self, slow: bool) {
        self.lock().slow_loads = slow;
    }

    /// Close a tab behind the store's back, as a user would.
    pub fn close_externally(&self, index: usize) {
        let mut state = self.lock();
        if index < state.pages.len() {
            let page = state.pages.remove(index);
            if state.foreground.as_ref() == Some(&page.handle) {
                state.foreground = state.pages.first().map(|p| p.handle.clone());
            }
        }
    }

    pub fn is_quit(&self) -> bool {
        self.lock().quit
    }
}

/// Title a real browser would most likely show for `url`.
pub fn title_for_url(url: &str) -> String {
    let lower = url.to_lowercase();
    if lower == BLANK_URL {
        return "New Tab".to_owned();
    }
    if lower.contains("mail.google.com") {
        return if lower.contains("view=cm") {
            "Compose Mail - Gmail".to_owned()
        } else {
            "Inbox - Gmail".to_owned()
        };
    }
    if lower.contains("youtube.com") {
        return "YouTube".to_owned();
    }
    if lower.contains("google.") {
        return if lower.contains("/search") {
            "Google Search".to_owned()
        } else {
            "Google".to_owned()
        };
    }
    let rest = lower
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(lower.as_str());
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    host.trim_start_matches("www.").to_owned()
}

#[async_trait]
impl PageDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn handles(&mut self) -> Result<Vec<TabHandle>, DriverError> {
        let state = self.lock();
        if state.quit {
            return Err(DriverError::Unavailable("browser was closed".to_owned()));
        }
        Ok(state.pages.iter().map(|p| p.handle.clone()).collect())
    }

    async fn new_tab(&mut self) -> Result<TabHandle, DriverError> {
        let mut state = self.lock();
        if state.quit {
            return Err(DriverError::Unavailable("browser was closed".to_owned()));
        }
        let handle = state.alloc_handle();
        state.pages.push(MemoryPage {
            handle: handle.clone(),
            url: BLANK_URL.to_owned(),
            title: title_for_url(BLANK_URL),
            fields: HashMap::new(),
            scroll_y: 0,
        });
        Ok(handle)
    }

    async fn close_tab(&mut self, tab: &TabHandle) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.page_mut(tab)?;
        state.pages.retain(|p| &p.handle != tab);
        if state.foreground.as_ref() == Some(tab) {
            state.foreground = None;
        }
        Ok(())
    }

    async fn activate(&mut self, tab: &TabHandle) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.page_mut(tab)?;
        state.foreground = Some(tab.clone());
        Ok(())
    }

    async fn navigate(&mut self, tab: &TabHandle, url: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        let page = state.page_mut(tab)?;
        page.url = url.to_owned();
        page.title = title_for_url(url);
        page.fields.clear();
        page.scroll_y = 0;
        Ok(())
    }

    async fn wait_for_load(&mut self, tab: &TabHandle, _wait: Duration) -> Result<bool, DriverError> {
        let mut state = self.lock();
        state.page_mut(tab)?;
        Ok(!state.slow_loads)
    }

    async fn title(&mut self, tab: &TabHandle) -> Result<String, DriverError> {
        let mut state = self.lock();
        Ok(state.page_mut(tab)?.title.clone())
    }

    async fn fill(&mut self, tab: &TabHandle, selector: &str, text: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_element(selector)?;
        state
            .page_mut(tab)?
            .fields
            .insert(selector.to_owned(), text.to_owned());
        state.events.push(format!("fill {selector}"));
        Ok(())
    }

    async fn press(&mut self, tab: &TabHandle, selector: &str, key: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_element(selector)?;
        state.page_mut(tab)?;
        state.events.push(format!("press {selector} {key}"));
        Ok(())
    }

    async fn click(&mut self, tab: &TabHandle, selector: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_element(selector)?;
        state.page_mut(tab)?;
        state.events.push(format!("click {selector}"));
        Ok(())
    }

    async fn scroll(&mut self, tab: &TabHandle, direction: ScrollDirection) -> Result<(), DriverError> {
        let mut state = self.lock();
        let page = state.page_mut(tab)?;
        let step = VIEWPORT_HEIGHT * 8 / 10;
        page.scroll_y = match direction {
            ScrollDirection::Down => page.scroll_y + step,
            ScrollDirection::Up => (page.scroll_y - step).max(0),
        };
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.quit = true;
        state.pages.clear();
        state.foreground = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn titles_for_known_sites() {
        assert_eq!(title_for_url("https://www.google.com"), "Google");
        assert_eq!(title_for_url("https://www.google.com/search?q=x"), "Google Search");
        assert_eq!(title_for_url("https://www.youtube.com/results?q=x"), "YouTube");
        assert_eq!(
            title_for_url("https://mail.google.com/mail/?view=cm&fs=1&to=a"),
            "Compose Mail - Gmail"
        );
        assert_eq!(title_for_url("https://www.rust-lang.org/learn"), "rust-lang.org");
        assert_eq!(title_for_url("about:blank"), "New Tab");
    }

    #[tokio::test]
    async fn clones_share_state() {
        let observer = MemoryDriver::new();
        let mut driver = observer.clone();
        let tab = driver.new_tab().await.unwrap();
        driver.navigate(&tab, "https://www.youtube.com").await.unwrap();
        assert_eq!(observer.titles(), vec!["YouTube"]);
    }

    #[tokio::test]
    async fn hidden_selector_is_missing() {
        let mut driver = MemoryDriver::with_pages(&[("https://www.google.com", "Google")]);
        let tab = driver.handles().await.unwrap()[0].clone();
        driver.hide("#q");
        let err = driver.fill(&tab, "#q", "cats").await.unwrap_err();
        assert!(matches!(err, DriverError::NoSuchElement { .. }));
        driver.restore("#q");
        driver.fill(&tab, "#q", "cats").await.unwrap();
        assert_eq!(driver.field(0, "#q").as_deref(), Some("cats"));
    }

    #[tokio::test]
    async fn closed_tab_is_no_such_tab() {
        let mut driver = MemoryDriver::with_pages(&[("a", "A"), ("b", "B")]);
        let handles = driver.handles().await.unwrap();
        driver.close_externally(0);
        let err = driver.title(&handles[0]).await.unwrap_err();
        assert!(matches!(err, DriverError::NoSuchTab { .. }));
        assert_eq!(driver.title(&handles[1]).await.unwrap(), "B");
    }

    #[tokio::test]
    async fn scroll_up_stops_at_top() {
        let mut driver = MemoryDriver::with_pages(&[("a", "A")]);
        let tab = driver.handles().await.unwrap()[0].clone();
        driver.scroll(&tab, ScrollDirection::Down).await.unwrap();
        assert_eq!(driver.scroll_offset(0), Some(640));
        driver.scroll(&tab, ScrollDirection::Up).await.unwrap();
        driver.scroll(&tab, ScrollDirection::Up).await.unwrap();
        assert_eq!(driver.scroll_offset(0), Some(0));
    }

    #[tokio::test]
    async fn quit_makes_everything_unavailable() {
        let mut driver = MemoryDriver::with_pages(&[("a", "A")]);
        driver.quit().await.unwrap();
        assert!(driver.is_quit());
        assert!(matches!(
            driver.handles().await,
            Err(DriverError::Unavailable(_))
        ));
    }
}
