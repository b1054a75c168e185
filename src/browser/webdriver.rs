//! W3C WebDriver page driver.
//!
//! Talks to any WebDriver endpoint (chromedriver, geckodriver, a Selenium
//! grid) over HTTP. The session is created with `pageLoadStrategy: none` so
//! navigation returns immediately and load completion is polled through
//! `document.readyState` with the caller's deadline.

use super::driver::{DriverError, PageDriver, TabHandle};
use crate::action::ScrollDirection;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::time::Duration;

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Per-HTTP-call timeout towards the WebDriver endpoint.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const LOAD_POLL: Duration = Duration::from_millis(100);

/// Releases all held modifier keys.
const KEY_NULL: char = '\u{E000}';

/// Map a key name to its WebDriver code point. Unknown names are typed as-is.
fn key_code(name: &str) -> Option<char> {
    let code = match name.to_ascii_lowercase().as_str() {
        "enter" | "return" => '\u{E007}',
        "tab" => '\u{E004}',
        "escape" | "esc" => '\u{E00C}',
        "backspace" => '\u{E003}',
        "delete" => '\u{E017}',
        "space" => '\u{E00D}',
        "shift" => '\u{E008}',
        "control" | "ctrl" => '\u{E009}',
        "alt" => '\u{E00A}',
        "meta" | "command" | "cmd" => '\u{E03D}',
        "arrowup" | "up" => '\u{E013}',
        "arrowdown" | "down" => '\u{E015}',
        "arrowleft" | "left" => '\u{E012}',
        "arrowright" | "right" => '\u{E014}',
        "pageup" => '\u{E00E}',
        "pagedown" => '\u{E00F}',
        "home" => '\u{E011}',
        "end" => '\u{E010}',
        _ => return None,
    };
    Some(code)
}

/// Translate `"Enter"` or `"Control+Enter"` into WebDriver key text.
///
/// Chords end with the null key so modifiers are released afterwards.
pub fn key_sequence(key: &str) -> String {
    let parts: Vec<&str> = key.split('+').map(str::trim).filter(|p| !p.is_empty()).collect();
    let mut out = String::new();
    for part in &parts {
        match key_code(part) {
            Some(c) => out.push(c),
            None => out.push_str(part),
        }
    }
    if parts.len() > 1 {
        out.push(KEY_NULL);
    }
    out
}

/// Map a WebDriver error string onto the driver taxonomy.
fn classify(error: &str, message: &str) -> DriverError {
    match error {
        "no such element" | "stale element reference" => DriverError::NoSuchElement {
            selector: String::new(),
        },
        "no such window" => DriverError::NoSuchTab {
            handle: String::new(),
        },
        "invalid session id" | "session not created" => {
            DriverError::Unavailable(format!("{error}: {message}"))
        }
        "timeout" | "script timeout" => DriverError::Timeout { ms: 0 },
        _ => DriverError::Protocol(format!("{error}: {message}")),
    }
}

fn classify_reqwest(err: &reqwest::Error) -> DriverError {
    if err.is_timeout() {
        DriverError::Timeout {
            ms: u64::try_from(HTTP_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        }
    } else if err.is_connect() {
        DriverError::Unavailable(format!("cannot reach WebDriver endpoint: {err}"))
    } else {
        DriverError::Protocol(format!("HTTP error: {err}"))
    }
}

/// A WebDriver session.
#[derive(Debug)]
pub struct WebDriverDriver {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    current: Option<TabHandle>,
}

impl WebDriverDriver {
    /// Create a new session at `base_url` (e.g. `http://localhost:9515`).
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Unavailable`] when the endpoint cannot be
    /// reached or refuses to create a session.
    pub async fn connect(base_url: &str) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| DriverError::Protocol(format!("failed to build HTTP client: {e}")))?;
        let base_url = base_url.trim_end_matches('/').to_owned();

        let body = json!({
            "capabilities": {
                "alwaysMatch": { "pageLoadStrategy": "none" }
            }
        });
        let value = send(&client, Method::POST, &format!("{base_url}/session"), Some(body))
            .await
            .map_err(|e| match e {
                DriverError::Protocol(m) => DriverError::Unavailable(m),
                other => other,
            })?;
        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| DriverError::Unavailable("no sessionId in new session reply".to_owned()))?
            .to_owned();

        tracing::info!(%base_url, %session_id, "WebDriver session created");
        Ok(Self {
            client,
            base_url,
            session_id,
            current: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}/session/{}{path}", self.base_url, self.session_id);
        send(&self.client, method, &url, body).await
    }

    /// Switch the session's current window to `tab` if needed.
    async fn focus(&mut self, tab: &TabHandle) -> Result<(), DriverError> {
        if self.current.as_ref() == Some(tab) {
            return Ok(());
        }
        self.command(Method::POST, "/window", Some(json!({ "handle": tab.as_str() })))
            .await
            .map_err(|e| match e {
                DriverError::NoSuchTab { .. } => DriverError::NoSuchTab {
                    handle: tab.to_string(),
                },
                other => other,
            })?;
        self.current = Some(tab.clone());
        Ok(())
    }

    async fn find(&mut self, tab: &TabHandle, selector: &str) -> Result<String, DriverError> {
        self.focus(tab).await?;
        let value = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await
            .map_err(|e| match e {
                DriverError::NoSuchElement { .. } => DriverError::NoSuchElement {
                    selector: selector.to_owned(),
                },
                other => other,
            })?;
        value[ELEMENT_KEY]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| DriverError::Protocol("element reply without reference".to_owned()))
    }

    async fn execute(&mut self, tab: &TabHandle, script: &str, args: Value) -> Result<Value, DriverError> {
        self.focus(tab).await?;
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }
}

/// One HTTP round trip; unwraps the W3C `{"value": ...}` envelope.
async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, DriverError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await.map_err(|e| classify_reqwest(&e))?;
    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| DriverError::Protocol(format!("invalid WebDriver reply ({status}): {e}")))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }
    let error = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"].as_str().unwrap_or("");
    tracing::debug!(%status, error, message, "WebDriver command failed");
    Err(classify(error, message))
}

#[async_trait]
impl PageDriver for WebDriverDriver {
    fn name(&self) -> &'static str {
        "webdriver"
    }

    async fn handles(&mut self) -> Result<Vec<TabHandle>, DriverError> {
        let value = self.command(Method::GET, "/window/handles", None).await?;
        let handles = value
            .as_array()
            .ok_or_else(|| DriverError::Protocol("window handles is not an array".to_owned()))?
            .iter()
            .filter_map(Value::as_str)
            .map(|h| TabHandle(h.to_owned()))
            .collect();
        Ok(handles)
    }

    async fn new_tab(&mut self) -> Result<TabHandle, DriverError> {
        let value = self
            .command(Method::POST, "/window/new", Some(json!({ "type": "tab" })))
            .await?;
        value["handle"]
            .as_str()
            .map(|h| TabHandle(h.to_owned()))
            .ok_or_else(|| DriverError::Protocol("new window reply without handle".to_owned()))
    }

    async fn close_tab(&mut self, tab: &TabHandle) -> Result<(), DriverError> {
        self.focus(tab).await?;
        self.command(Method::DELETE, "/window", None).await?;
        self.current = None;
        Ok(())
    }

    async fn activate(&mut self, tab: &TabHandle) -> Result<(), DriverError> {
        // switching windows is what raises the tab in every driver we target
        self.current = None;
        self.focus(tab).await
    }

    async fn navigate(&mut self, tab: &TabHandle, url: &str) -> Result<(), DriverError> {
        self.focus(tab).await?;
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn wait_for_load(&mut self, tab: &TabHandle, wait: Duration) -> Result<bool, DriverError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let state = self
                .execute(tab, "return document.readyState;", json!([]))
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(LOAD_POLL).await;
        }
    }

    async fn title(&mut self, tab: &TabHandle) -> Result<String, DriverError> {
        self.focus(tab).await?;
        let value = self.command(Method::GET, "/title", None).await?;
        Ok(value.as_str().unwrap_or_default().to_owned())
    }

    async fn fill(&mut self, tab: &TabHandle, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self.find(tab, selector).await?;
        self.command(Method::POST, &format!("/element/{element}/clear"), Some(json!({})))
            .await?;
        self.command(
            Method::POST,
            &format!("/element/{element}/value"),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn press(&mut self, tab: &TabHandle, selector: &str, key: &str) -> Result<(), DriverError> {
        let element = self.find(tab, selector).await?;
        self.command(
            Method::POST,
            &format!("/element/{element}/value"),
            Some(json!({ "text": key_sequence(key) })),
        )
        .await?;
        Ok(())
    }

    async fn click(&mut self, tab: &TabHandle, selector: &str) -> Result<(), DriverError> {
        let element = self.find(tab, selector).await?;
        self.command(Method::POST, &format!("/element/{element}/click"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn scroll(&mut self, tab: &TabHandle, direction: ScrollDirection) -> Result<(), DriverError> {
        let sign = match direction {
            ScrollDirection::Down => 1,
            ScrollDirection::Up => -1,
        };
        self.execute(
            tab,
            "window.scrollBy(0, window.innerHeight * 0.8 * arguments[0]);",
            json!([sign]),
        )
        .await?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), DriverError> {
        self.command(Method::DELETE, "", None).await?;
        self.current = None;
        tracing::info!(session_id = %self.session_id, "WebDriver session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::browser::tabs::{TabSessionStore, TabSettings};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SESSION: &str = "abc123";

    async fn server_with_session() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .and(body_partial_json(json!({
                "capabilities": { "alwaysMatch": { "pageLoadStrategy": "none" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": SESSION, "capabilities": {} }
            })))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn key_sequences() {
        assert_eq!(key_sequence("Enter"), "\u{E007}");
        assert_eq!(key_sequence("Control+Enter"), "\u{E009}\u{E007}\u{E000}");
        assert_eq!(key_sequence("a"), "a");
        assert_eq!(key_sequence("ctrl + a"), "\u{E009}a\u{E000}");
    }

    #[test]
    fn classify_known_errors() {
        assert!(matches!(
            classify("no such element", ""),
            DriverError::NoSuchElement { .. }
        ));
        assert!(matches!(classify("no such window", ""), DriverError::NoSuchTab { .. }));
        assert!(matches!(
            classify("invalid session id", ""),
            DriverError::Unavailable(_)
        ));
        assert!(matches!(
            classify("unknown command", "x"),
            DriverError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn connect_and_list_handles() {
        let server = server_with_session().await;
        Mock::given(method("GET"))
            .and(path(format!("/session/{SESSION}/window/handles")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": ["w1", "w2"] })),
            )
            .mount(&server)
            .await;

        let mut driver = WebDriverDriver::connect(&server.uri()).await.unwrap();
        assert_eq!(driver.session_id(), SESSION);
        let handles = driver.handles().await.unwrap();
        assert_eq!(
            handles,
            vec![TabHandle("w1".to_owned()), TabHandle("w2".to_owned())]
        );
    }

    #[tokio::test]
    async fn missing_element_names_selector() {
        let server = server_with_session().await;
        Mock::given(method("POST"))
            .and(path(format!("/session/{SESSION}/window")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/session/{SESSION}/element")))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": {
                    "error": "no such element",
                    "message": "Unable to locate element",
                    "stacktrace": ""
                }
            })))
            .mount(&server)
            .await;

        let mut driver = WebDriverDriver::connect(&server.uri()).await.unwrap();
        let tab = TabHandle("w1".to_owned());
        let err = driver.click(&tab, "#missing").await.unwrap_err();
        match err {
            DriverError::NoSuchElement { selector } => assert_eq!(selector, "#missing"),
            other => panic!("expected NoSuchElement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn title_switches_window_first() {
        let server = server_with_session().await;
        Mock::given(method("POST"))
            .and(path(format!("/session/{SESSION}/window")))
            .and(body_partial_json(json!({ "handle": "w2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/session/{SESSION}/title")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": "YouTube" })),
            )
            .mount(&server)
            .await;

        let mut driver = WebDriverDriver::connect(&server.uri()).await.unwrap();
        let tab = TabHandle("w2".to_owned());
        assert_eq!(driver.title(&tab).await.unwrap(), "YouTube");
        // already focused: no second switch
        assert_eq!(driver.title(&tab).await.unwrap(), "YouTube");
    }

    /// Two windows, every command succeeds, pages report `ready_state`.
    async fn server_with_two_windows(ready_state: &str) -> MockServer {
        let server = server_with_session().await;
        let null = || ResponseTemplate::new(200).set_body_json(json!({ "value": null }));
        Mock::given(method("GET"))
            .and(path(format!("/session/{SESSION}/window/handles")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": ["w1", "w2"] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/session/{SESSION}/window")))
            .respond_with(null())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/session/{SESSION}/url")))
            .respond_with(null())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/session/{SESSION}/execute/sync")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": ready_state })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/session/{SESSION}/title")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": "Google" })),
            )
            .mount(&server)
            .await;
        server
    }

    /// Handles passed to `POST /window`, in order.
    async fn window_switches(server: &MockServer) -> Vec<String> {
        let window_path = format!("/session/{SESSION}/window");
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "POST" && r.url.path() == window_path)
            .map(|r| {
                let body: Value = serde_json::from_slice(&r.body).unwrap();
                body["handle"].as_str().unwrap().to_owned()
            })
            .collect()
    }

    fn settings(load_wait: Duration) -> TabSettings {
        TabSettings {
            landing_url: "https://www.google.com".to_owned(),
            load_wait,
            element_wait: Duration::from_millis(200),
            title_width: 40,
        }
    }

    #[tokio::test]
    async fn tab_context_leaves_active_window_in_front() {
        let server = server_with_two_windows("complete").await;
        let driver = WebDriverDriver::connect(&server.uri()).await.unwrap();
        let mut store = TabSessionStore::start(driver, settings(Duration::from_millis(200)))
            .await
            .unwrap();

        let ctx = store.tab_context().await.unwrap();
        assert_eq!(ctx.titles.len(), 2);
        assert_eq!(ctx.active_index, 0);

        let switches = window_switches(&server).await;
        assert!(switches.contains(&"w2".to_owned()), "{switches:?}");
        assert_eq!(switches.last().map(String::as_str), Some("w1"));
    }

    #[tokio::test]
    async fn start_does_not_wait_for_landing_load() {
        let server = server_with_two_windows("interactive").await;
        let driver = WebDriverDriver::connect(&server.uri()).await.unwrap();
        let store = tokio::time::timeout(
            Duration::from_secs(2),
            TabSessionStore::start(driver, settings(Duration::from_secs(30))),
        )
        .await
        .expect("start waited for the landing page")
        .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.active_index(), 0);
    }

    #[tokio::test]
    async fn connect_refused_is_unavailable() {
        let err = WebDriverDriver::connect("http://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_)), "{err:?}");
    }
}
