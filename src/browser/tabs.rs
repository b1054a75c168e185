//! Tab session store: ordered tabs plus the active index.
//!
//! The store lives inside the browser service and survives across requests.
//! Before every operation it reconciles its handle list with what the driver
//! reports, so tabs the user closed by hand disappear and the active index
//! stays within bounds. Indices are 1-based at the public surface and
//! 0-based in here.

use super::driver::{DriverError, PageDriver, TabHandle};
use super::protocol::TabContext;
use crate::action::ScrollDirection;
use crate::config::BrowserConfig;
use crate::error::ErrorCode;
use std::time::{Duration, Instant};

/// Selector of the first organic result on a search results page.
pub const SEARCH_RESULT_SELECTOR: &str = "div[id='search'] h3 a";

/// Selector of the first video on a video site results page.
pub const VIDEO_RESULT_SELECTOR: &str = "a#video-title";

/// Message body of the compose surface.
pub const COMPOSE_BODY_SELECTOR: &str = "div[aria-label='Message Body']";

/// Key chord that sends from the compose surface.
pub const SEND_CHORD: &str = "Control+Enter";

const ELEMENT_POLL: Duration = Duration::from_millis(100);

/// Tunables for the store.
#[derive(Debug, Clone)]
pub struct TabSettings {
    pub landing_url: String,
    pub load_wait: Duration,
    pub element_wait: Duration,
    pub title_width: usize,
}

impl Default for TabSettings {
    fn default() -> Self {
        Self::from(&BrowserConfig::default())
    }
}

impl From<&BrowserConfig> for TabSettings {
    fn from(config: &BrowserConfig) -> Self {
        Self {
            landing_url: config.landing_url.clone(),
            load_wait: Duration::from_millis(config.load_wait_ms),
            element_wait: Duration::from_millis(config.element_wait_ms),
            title_width: config.title_width,
        }
    }
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum TabError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// 1-based index outside the current tab count.
    #[error("Tab {requested} is out of range, {}.", tab_count_phrase(.count))]
    OutOfRange { requested: usize, count: usize },

    /// No first-result rule for the page.
    #[error("I don't know how to pick the first result on \"{title}\".")]
    UnknownResultPage { title: String },
}

fn tab_count_phrase(count: &usize) -> String {
    if *count == 1 {
        "there is 1 tab".to_owned()
    } else {
        format!("there are {count} tabs")
    }
}

impl TabError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Driver(e) => e.code(),
            Self::OutOfRange { .. } => ErrorCode::OutOfRange,
            Self::UnknownResultPage { .. } => ErrorCode::NotFound,
        }
    }
}

/// Result of a store operation that completed or partially completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabReply {
    pub text: String,
    /// The operation took effect but did not fully finish in time.
    pub partial: bool,
}

impl TabReply {
    fn done(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            partial: false,
        }
    }

    fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            partial: true,
        }
    }
}

enum ElementOp<'a> {
    Fill(&'a str),
    Press(&'a str),
    Click,
}

/// Add `https://` unless the URL already names an http(s) scheme.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    }
}

/// Truncate to `width` characters, marking the cut with `...`.
pub fn truncate_title(title: &str, width: usize) -> String {
    if title.chars().count() <= width {
        return title.to_owned();
    }
    let mut out: String = title.chars().take(width).collect();
    out.push_str("...");
    out
}

/// Ordered tabs, an active index, and the driver that backs them.
pub struct TabSessionStore<D: PageDriver> {
    driver: D,
    tabs: Vec<TabHandle>,
    active: usize,
    settings: TabSettings,
}

impl<D: PageDriver> std::fmt::Debug for TabSessionStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabSessionStore")
            .field("driver", &self.driver.name())
            .field("tabs", &self.tabs.len())
            .field("active", &self.active)
            .finish()
    }
}

impl<D: PageDriver> TabSessionStore<D> {
    /// Adopt the driver's tabs, creating one if there are none, and send the
    /// active tab to the landing page.
    ///
    /// The landing load is not awaited, so a slow page never delays the
    /// service's `ready` line. The next operation on the tab waits as usual.
    pub async fn start(driver: D, settings: TabSettings) -> Result<Self, TabError> {
        let mut store = Self {
            driver,
            tabs: Vec::new(),
            active: 0,
            settings,
        };
        if store.driver.handles().await?.is_empty() {
            store.driver.new_tab().await?;
        }
        store.reconcile().await?;
        let tab = store.tabs[store.active].clone();
        let url = store.settings.landing_url.clone();
        store.driver.navigate(&tab, &url).await?;
        store.driver.activate(&tab).await?;
        tracing::info!(
            driver = store.driver.name(),
            tabs = store.tabs.len(),
            "tab session started"
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// 0-based active index as of the last operation.
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Sync the handle list with the driver.
    ///
    /// Closed tabs are dropped, unknown tabs appended, and the active index
    /// follows its tab when it survives or is clamped otherwise. An empty
    /// browser gets a fresh tab on the landing page.
    async fn reconcile(&mut self) -> Result<(), TabError> {
        let live = self.driver.handles().await?;
        let active_handle = self.tabs.get(self.active).cloned();
        let before = self.tabs.len();

        self.tabs.retain(|h| live.contains(h));
        for handle in live {
            if !self.tabs.contains(&handle) {
                self.tabs.push(handle);
            }
        }

        if self.tabs.is_empty() {
            tracing::info!("no tabs left, opening a fresh one");
            let tab = self.driver.new_tab().await?;
            self.load_landing(&tab).await?;
            self.driver.activate(&tab).await?;
            self.tabs.push(tab);
            self.active = 0;
            return Ok(());
        }

        self.active = active_handle
            .and_then(|h| self.tabs.iter().position(|t| *t == h))
            .unwrap_or_else(|| self.active.min(self.tabs.len() - 1));

        if self.tabs.len() != before {
            tracing::debug!(
                before,
                after = self.tabs.len(),
                active = self.active,
                "reconciled tab list"
            );
        }
        Ok(())
    }

    async fn load_landing(&mut self, tab: &TabHandle) -> Result<bool, TabError> {
        let url = self.settings.landing_url.clone();
        self.driver.navigate(tab, &url).await?;
        Ok(self.driver.wait_for_load(tab, self.settings.load_wait).await?)
    }

    /// Handle of the active tab after reconciliation.
    pub async fn get_active(&mut self) -> Result<TabHandle, TabError> {
        self.reconcile().await?;
        Ok(self.tabs[self.active].clone())
    }

    pub async fn goto(&mut self, target: &str) -> Result<TabReply, TabError> {
        let url = normalize_url(target);
        let tab = self.get_active().await?;
        self.driver.navigate(&tab, &url).await?;
        let loaded = self
            .driver
            .wait_for_load(&tab, self.settings.load_wait)
            .await?;
        if !loaded {
            tracing::warn!(%url, "page still loading at deadline");
            return Ok(TabReply::partial(format!(
                "Opened {url}, but the page is still loading."
            )));
        }
        let title = self.driver.title(&tab).await?;
        Ok(TabReply::done(format!("Navigated to '{title}'.")))
    }

    async fn element_once(
        &mut self,
        tab: &TabHandle,
        selector: &str,
        op: &ElementOp<'_>,
    ) -> Result<(), DriverError> {
        match op {
            ElementOp::Fill(text) => self.driver.fill(tab, selector, text).await,
            ElementOp::Press(key) => self.driver.press(tab, selector, key).await,
            ElementOp::Click => self.driver.click(tab, selector).await,
        }
    }

    /// Retry `op` while the element is missing, up to the element wait.
    async fn with_element(&mut self, selector: &str, op: ElementOp<'_>) -> Result<(), TabError> {
        let tab = self.get_active().await?;
        let deadline = Instant::now() + self.settings.element_wait;
        loop {
            match self.element_once(&tab, selector, &op).await {
                Err(DriverError::NoSuchElement { .. }) if Instant::now() < deadline => {
                    tokio::time::sleep(ELEMENT_POLL).await;
                }
                other => return other.map_err(TabError::from),
            }
        }
    }

    pub async fn fill(&mut self, selector: &str, content: &str) -> Result<TabReply, TabError> {
        self.with_element(selector, ElementOp::Fill(content)).await?;
        Ok(TabReply::done(format!("Filled '{selector}'.")))
    }

    pub async fn press(&mut self, selector: &str, key: &str) -> Result<TabReply, TabError> {
        self.with_element(selector, ElementOp::Press(key)).await?;
        Ok(TabReply::done(format!("Pressed '{key}' on '{selector}'.")))
    }

    pub async fn click(&mut self, selector: &str) -> Result<TabReply, TabError> {
        self.with_element(selector, ElementOp::Click).await?;
        Ok(TabReply::done(format!("Clicked '{selector}'.")))
    }

    pub async fn scroll(&mut self, direction: ScrollDirection) -> Result<TabReply, TabError> {
        let tab = self.get_active().await?;
        self.driver.scroll(&tab, direction).await?;
        Ok(TabReply::done(format!("Scrolled {}.", direction.as_str())))
    }

    /// Click the first result on a search or video results page.
    pub async fn click_first_result(&mut self) -> Result<TabReply, TabError> {
        let tab = self.get_active().await?;
        let title = self.driver.title(&tab).await?;
        let lower = title.to_lowercase();
        let selector = if lower.contains("youtube") {
            VIDEO_RESULT_SELECTOR
        } else if lower.contains("google") {
            SEARCH_RESULT_SELECTOR
        } else {
            return Err(TabError::UnknownResultPage { title });
        };
        self.with_element(selector, ElementOp::Click).await?;
        let loaded = self
            .driver
            .wait_for_load(&tab, self.settings.load_wait)
            .await?;
        if loaded {
            Ok(TabReply::done("Opened the first result."))
        } else {
            Ok(TabReply::partial(
                "Opened the first result, but it is still loading.",
            ))
        }
    }

    /// Open a tab on the landing page and make it active.
    pub async fn open_tab(&mut self) -> Result<TabReply, TabError> {
        self.reconcile().await?;
        let tab = self.driver.new_tab().await?;
        let loaded = self.load_landing(&tab).await?;
        self.driver.activate(&tab).await?;
        self.tabs.push(tab);
        self.active = self.tabs.len() - 1;
        tracing::info!(tab = self.active + 1, "opened tab");
        let text = format!("Opened a new tab (tab {}).", self.active + 1);
        Ok(if loaded {
            TabReply::done(text)
        } else {
            TabReply::partial(text)
        })
    }

    /// Close the active tab, or reset it when it is the only one.
    pub async fn close_tab(&mut self) -> Result<TabReply, TabError> {
        self.reconcile().await?;
        if self.tabs.len() == 1 {
            let tab = self.tabs[0].clone();
            self.load_landing(&tab).await?;
            return Ok(TabReply::done(
                "That was the last tab, so I reset it to the start page.",
            ));
        }

        let closing = self.tabs[self.active].clone();
        self.driver.close_tab(&closing).await?;
        self.tabs.remove(self.active);
        self.active = self.active.saturating_sub(1);
        let now = self.tabs[self.active].clone();
        self.driver.activate(&now).await?;
        tracing::info!(active = self.active + 1, remaining = self.tabs.len(), "closed tab");
        Ok(TabReply::done(format!(
            "Closed the tab. You're on tab {} now.",
            self.active + 1
        )))
    }

    /// Switch by 1-based index. Out-of-range indices leave the store unchanged.
    pub async fn switch_tab(&mut self, index: usize) -> Result<TabReply, TabError> {
        self.reconcile().await?;
        if index == 0 || index > self.tabs.len() {
            return Err(TabError::OutOfRange {
                requested: index,
                count: self.tabs.len(),
            });
        }
        self.activate_index(index - 1).await
    }

    pub async fn next_tab(&mut self) -> Result<TabReply, TabError> {
        self.reconcile().await?;
        let next = (self.active + 1) % self.tabs.len();
        self.activate_index(next).await
    }

    pub async fn prev_tab(&mut self) -> Result<TabReply, TabError> {
        self.reconcile().await?;
        let len = self.tabs.len();
        let prev = (self.active + len - 1) % len;
        self.activate_index(prev).await
    }

    async fn activate_index(&mut self, index: usize) -> Result<TabReply, TabError> {
        let tab = self.tabs[index].clone();
        let title = self.driver.title(&tab).await?;
        if index == self.active {
            return Ok(TabReply::done(format!(
                "You're already on tab {}: {title}.",
                index + 1
            )));
        }
        self.driver.activate(&tab).await?;
        self.active = index;
        tracing::info!(tab = index + 1, "switched tab");
        Ok(TabReply::done(format!("Switched to tab {}: {title}.", index + 1)))
    }

    /// Send the draft from the compose surface.
    pub async fn send_email(&mut self) -> Result<TabReply, TabError> {
        self.with_element(COMPOSE_BODY_SELECTOR, ElementOp::Press(SEND_CHORD))
            .await?;
        Ok(TabReply::done("Email sent."))
    }

    /// Truncated titles of every tab and the active index.
    pub async fn tab_context(&mut self) -> Result<TabContext, TabError> {
        self.reconcile().await?;
        let mut titles = Vec::with_capacity(self.tabs.len());
        for tab in self.tabs.clone() {
            let title = self.driver.title(&tab).await?;
            titles.push(truncate_title(&title, self.settings.title_width));
        }
        // reading a title may switch the driver's current window
        if self.tabs.len() > 1 {
            let active = self.tabs[self.active].clone();
            self.driver.activate(&active).await?;
        }
        Ok(TabContext {
            titles,
            active_index: self.active,
        })
    }

    /// Full title of the active tab.
    pub async fn get_title(&mut self) -> Result<String, TabError> {
        let tab = self.get_active().await?;
        Ok(self.driver.title(&tab).await?)
    }

    /// Close the browser session.
    pub async fn shutdown(mut self) -> Result<(), TabError> {
        tracing::info!(driver = self.driver.name(), "closing browser session");
        self.driver.quit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::browser::memory::MemoryDriver;

    fn fast_settings() -> TabSettings {
        TabSettings {
            landing_url: "https://www.google.com".to_owned(),
            load_wait: Duration::from_millis(50),
            element_wait: Duration::from_millis(200),
            title_width: 40,
        }
    }

    async fn store_with(pages: &[(&str, &str)]) -> (TabSessionStore<MemoryDriver>, MemoryDriver) {
        let driver = MemoryDriver::with_pages(pages);
        let observer = driver.clone();
        let store = TabSessionStore::start(driver, fast_settings()).await.unwrap();
        (store, observer)
    }

    #[test]
    fn normalize_adds_scheme() {
        assert_eq!(normalize_url("google.com"), "https://google.com");
        assert_eq!(normalize_url("http://x.org"), "http://x.org");
        assert_eq!(normalize_url(" https://x.org "), "https://x.org");
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_title("short", 10), "short");
        assert_eq!(truncate_title("abcdefghij", 4), "abcd...");
        assert_eq!(truncate_title("ééééé", 2), "éé...");
    }

    #[test]
    fn out_of_range_message() {
        let err = TabError::OutOfRange {
            requested: 5,
            count: 2,
        };
        assert_eq!(err.to_string(), "Tab 5 is out of range, there are 2 tabs.");
        assert_eq!(err.code(), ErrorCode::OutOfRange);
        let err = TabError::OutOfRange {
            requested: 3,
            count: 1,
        };
        assert_eq!(err.to_string(), "Tab 3 is out of range, there is 1 tab.");
    }

    #[tokio::test]
    async fn start_with_empty_browser_synthesizes_landing_tab() {
        let (store, observer) = store_with(&[]).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.active_index(), 0);
        assert_eq!(observer.urls(), vec!["https://www.google.com"]);
    }

    #[tokio::test]
    async fn get_active_after_all_tabs_closed_synthesizes() {
        let (mut store, observer) = store_with(&[("a", "A"), ("b", "B")]).await;
        observer.close_externally(1);
        observer.close_externally(0);
        let tab = store.get_active().await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.active_index(), 0);
        assert_eq!(observer.urls(), vec!["https://www.google.com"]);
        assert_eq!(observer.foreground_index(), Some(0));
        assert!(!tab.as_str().is_empty());
    }

    #[tokio::test]
    async fn switch_to_tab_two() {
        let (mut store, observer) =
            store_with(&[("https://www.google.com", "Google"), ("https://www.youtube.com", "YouTube")])
                .await;
        let reply = store.switch_tab(2).await.unwrap();
        assert_eq!(store.active_index(), 1);
        assert!(reply.text.contains("tab 2"), "{}", reply.text);
        assert_eq!(observer.foreground_index(), Some(1));
    }

    #[tokio::test]
    async fn switch_out_of_range_leaves_state() {
        let (mut store, _) = store_with(&[("a", "A"), ("b", "B")]).await;
        for bad in [0, 3, 99] {
            let err = store.switch_tab(bad).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::OutOfRange);
            assert_eq!(store.active_index(), 0);
            assert_eq!(store.len(), 2);
        }
    }

    #[tokio::test]
    async fn switch_to_current_is_noop_success() {
        let (mut store, observer) = store_with(&[("a", "A"), ("b", "B")]).await;
        let reply = store.switch_tab(1).await.unwrap();
        assert!(reply.text.contains("already"));
        assert_eq!(store.active_index(), 0);
        assert_eq!(observer.foreground_index(), Some(0));
    }

    #[tokio::test]
    async fn next_tab_len_times_returns_to_start() {
        let (mut store, _) = store_with(&[("a", "A"), ("b", "B"), ("c", "C")]).await;
        store.switch_tab(2).await.unwrap();
        for _ in 0..store.len() {
            store.next_tab().await.unwrap();
        }
        assert_eq!(store.active_index(), 1);
    }

    #[tokio::test]
    async fn prev_tab_wraps() {
        let (mut store, _) = store_with(&[("a", "A"), ("b", "B"), ("c", "C")]).await;
        store.prev_tab().await.unwrap();
        assert_eq!(store.active_index(), 2);
    }

    #[tokio::test]
    async fn open_tab_becomes_active() {
        let (mut store, observer) = store_with(&[("a", "A")]).await;
        let reply = store.open_tab().await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.active_index(), 1);
        assert_eq!(reply.text, "Opened a new tab (tab 2).");
        assert_eq!(observer.foreground_index(), Some(1));
        assert_eq!(observer.urls()[1], "https://www.google.com");
    }

    #[tokio::test]
    async fn close_tab_moves_to_previous() {
        let (mut store, observer) = store_with(&[("a", "A"), ("b", "B"), ("c", "C")]).await;
        store.switch_tab(3).await.unwrap();
        store.close_tab().await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.active_index(), 1);
        assert_eq!(observer.page_count(), 2);
    }

    #[tokio::test]
    async fn close_first_tab_stays_at_zero() {
        let (mut store, _) = store_with(&[("a", "A"), ("b", "B")]).await;
        store.close_tab().await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.active_index(), 0);
    }

    #[tokio::test]
    async fn close_last_tab_resets_instead() {
        let (mut store, observer) = store_with(&[("https://www.youtube.com", "YouTube")]).await;
        store.goto("youtube.com").await.unwrap();
        store.close_tab().await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(observer.page_count(), 1);
        assert_eq!(observer.urls(), vec!["https://www.google.com"]);
    }

    #[tokio::test]
    async fn goto_normalizes_and_reports_title() {
        let (mut store, observer) = store_with(&[]).await;
        let reply = store.goto("youtube.com").await.unwrap();
        assert!(!reply.partial);
        assert_eq!(reply.text, "Navigated to 'YouTube'.");
        assert_eq!(observer.urls(), vec!["https://youtube.com"]);
    }

    #[tokio::test]
    async fn goto_load_timeout_is_partial() {
        let (mut store, observer) = store_with(&[]).await;
        observer.set_slow_loads(true);
        let reply = store.goto("example.org").await.unwrap();
        assert!(reply.partial);
        assert_eq!(observer.urls(), vec!["https://example.org"]);
    }

    #[tokio::test]
    async fn missing_element_is_not_found_after_wait() {
        let (mut store, observer) = store_with(&[]).await;
        observer.hide("[name='q']");
        let started = Instant::now();
        let err = store.fill("[name='q']", "cats").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn fill_lands_on_active_tab() {
        let (mut store, observer) = store_with(&[("a", "A"), ("b", "B")]).await;
        store.switch_tab(2).await.unwrap();
        store.fill("#q", "rust").await.unwrap();
        assert_eq!(observer.field(1, "#q").as_deref(), Some("rust"));
        assert_eq!(observer.field(0, "#q"), None);
    }

    #[tokio::test]
    async fn click_first_result_picks_selector_by_site() {
        let (mut store, observer) = store_with(&[]).await;
        store.goto("www.youtube.com/results?search_query=rust").await.unwrap();
        store.click_first_result().await.unwrap();
        store.goto("www.google.com/search?q=rust").await.unwrap();
        store.click_first_result().await.unwrap();
        assert_eq!(
            observer.events(),
            vec![
                format!("click {VIDEO_RESULT_SELECTOR}"),
                format!("click {SEARCH_RESULT_SELECTOR}"),
            ]
        );

        store.goto("example.org").await.unwrap();
        let err = store.click_first_result().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn user_closed_active_tab_is_reconciled() {
        let (mut store, observer) = store_with(&[("a", "A"), ("b", "B"), ("c", "C")]).await;
        store.switch_tab(3).await.unwrap();
        observer.close_externally(2);
        let ctx = store.tab_context().await.unwrap();
        assert_eq!(ctx.titles.len(), 2);
        assert_eq!(ctx.active_index, 1);
    }

    #[tokio::test]
    async fn tab_context_truncates_titles() {
        let long = "A very long page title that keeps going and going";
        let (mut store, _) = store_with(&[("a", long)]).await;
        // start() navigated the active tab to the landing page
        store.open_tab().await.unwrap();
        let ctx = store.tab_context().await.unwrap();
        assert_eq!(ctx.active_index, 1);
        assert_eq!(ctx.titles, vec!["Google", "Google"]);

        let mut settings = fast_settings();
        settings.title_width = 10;
        let driver = MemoryDriver::with_pages(&[("a", long), ("b", long)]);
        let mut store = TabSessionStore::start(driver, settings).await.unwrap();
        let ctx = store.tab_context().await.unwrap();
        assert_eq!(ctx.titles[1], "A very lon...");
    }

    #[tokio::test]
    async fn send_email_presses_chord_in_body() {
        let (mut store, observer) = store_with(&[]).await;
        store.send_email().await.unwrap();
        assert_eq!(
            observer.events(),
            vec![format!("press {COMPOSE_BODY_SELECTOR} {SEND_CHORD}")]
        );
    }

    #[tokio::test]
    async fn shutdown_quits_driver() {
        let (store, observer) = store_with(&[("a", "A")]).await;
        store.shutdown().await.unwrap();
        assert!(observer.is_quit());
    }
}
