//! Local command protocol between the orchestrator and the browser service.
//!
//! Messages are newline-delimited JSON on the service's stdin/stdout.
//!
//! Request:
//!
//! ```json
//! {"id":7,"action":"switch_tab","index":2}
//! ```
//!
//! Response:
//!
//! ```json
//! {"id":7,"status":"success","reply":"Switched to tab 2: YouTube."}
//! {"id":8,"status":"error","reply":"Tab 5 is out of range, there are 2 tabs.","code":"out_of_range"}
//! {"id":9,"status":"success","reply":{"titles":["Google","YouTube"],"active_index":1}}
//! ```
//!
//! On startup the service writes `{"status":"success","reply":"ready"}` before
//! reading any request. The `id` field is optional and echoed back so a late
//! response to a timed-out request can be told apart from the current one.

use crate::action::ScrollDirection;
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Reply text of the startup line.
pub const READY_REPLY: &str = "ready";

/// Maximum accepted length of one protocol line.
pub const MAX_LINE_BYTES: usize = 256 * 1024;

/// A command for the browser service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserRequest {
    /// Health probe.
    Ping,
    Goto {
        target: String,
    },
    Fill {
        selector: String,
        content: String,
    },
    Press {
        selector: String,
        key: String,
    },
    Click {
        selector: String,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
    },
    ClickFirstResult,
    OpenTab,
    CloseTab,
    /// 1-based tab index.
    SwitchTab {
        index: usize,
    },
    NextTab,
    PrevTab,
    SendEmail,
    GetTabContext,
    GetTitle,
    /// Close the browser and end the service loop.
    Shutdown,
}

impl BrowserRequest {
    /// Wire name of the action, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Goto { .. } => "goto",
            Self::Fill { .. } => "fill",
            Self::Press { .. } => "press",
            Self::Click { .. } => "click",
            Self::Scroll { .. } => "scroll",
            Self::ClickFirstResult => "click_first_result",
            Self::OpenTab => "open_tab",
            Self::CloseTab => "close_tab",
            Self::SwitchTab { .. } => "switch_tab",
            Self::NextTab => "next_tab",
            Self::PrevTab => "prev_tab",
            Self::SendEmail => "send_email",
            Self::GetTabContext => "get_tab_context",
            Self::GetTitle => "get_title",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A request with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub request: BrowserRequest,
}

impl RequestLine {
    pub fn new(id: u64, request: BrowserRequest) -> Self {
        Self {
            id: Some(id),
            request,
        }
    }

    /// Serializes to a JSON line with trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// Titles of the open tabs and which one is active (0-based).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabContext {
    pub titles: Vec<String>,
    pub active_index: usize,
}

impl TabContext {
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn active_title(&self) -> Option<&str> {
        self.titles.get(self.active_index).map(String::as_str)
    }

    /// One-line rendering used in the reasoning prompt, active tab starred:
    /// `Tabs: (Tab 1: Google), *(Tab 2: YouTube)*`.
    pub fn describe(&self) -> String {
        if self.titles.is_empty() {
            return "Tabs: none".to_owned();
        }
        let mut out = String::from("Tabs: ");
        for (i, title) in self.titles.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            if i == self.active_index {
                let _ = write!(out, "*(Tab {}: {title})*", i + 1);
            } else {
                let _ = write!(out, "(Tab {}: {title})", i + 1);
            }
        }
        out
    }
}

/// Reply payload: plain text, or the tab context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyBody {
    Tabs(TabContext),
    Text(String),
}

/// A response from the browser service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub status: Status,
    pub reply: ReplyBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Set when the operation took effect but did not fully complete
    /// (for example a page that was still loading at the deadline).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl BrowserResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            id: None,
            status: Status::Success,
            reply: ReplyBody::Text(text.into()),
            code: None,
            partial: false,
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            partial: true,
            ..Self::success(text)
        }
    }

    pub fn tabs(context: TabContext) -> Self {
        Self {
            id: None,
            status: Status::Success,
            reply: ReplyBody::Tabs(context),
            code: None,
            partial: false,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: None,
            status: Status::Error,
            reply: ReplyBody::Text(message.into()),
            code: Some(code),
            partial: false,
        }
    }

    /// The startup line.
    pub fn ready() -> Self {
        Self::success(READY_REPLY)
    }

    pub fn with_id(mut self, id: Option<u64>) -> Self {
        self.id = id;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn is_ready(&self) -> bool {
        self.is_success() && matches!(&self.reply, ReplyBody::Text(t) if t == READY_REPLY)
    }

    /// Reply rendered as text. Tab contexts use [`TabContext::describe`].
    pub fn text(&self) -> String {
        match &self.reply {
            ReplyBody::Text(t) => t.clone(),
            ReplyBody::Tabs(ctx) => ctx.describe(),
        }
    }

    /// Serializes to a JSON line with trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn request_wire_shape() {
        let line = RequestLine::new(3, BrowserRequest::SwitchTab { index: 2 })
            .to_line()
            .unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["action"], "switch_tab");
        assert_eq!(value["index"], 2);
    }

    #[test]
    fn request_without_id_parses() {
        let parsed = RequestLine::parse(r#"{"action":"goto","target":"google.com"}"#).unwrap();
        assert_eq!(parsed.id, None);
        assert_eq!(
            parsed.request,
            BrowserRequest::Goto {
                target: "google.com".to_owned()
            }
        );
    }

    #[test]
    fn scroll_direction_defaults_down_on_wire() {
        let parsed = RequestLine::parse(r#"{"id":1,"action":"scroll"}"#).unwrap();
        assert_eq!(
            parsed.request,
            BrowserRequest::Scroll {
                direction: ScrollDirection::Down
            }
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(RequestLine::parse(r#"{"action":"fly"}"#).is_err());
    }

    #[test]
    fn error_response_carries_code() {
        let line = BrowserResponse::error(ErrorCode::OutOfRange, "nope")
            .with_id(Some(4))
            .to_line()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["code"], "out_of_range");
        assert!(value.get("partial").is_none());

        let back = BrowserResponse::parse(&line).unwrap();
        assert_eq!(back.id, Some(4));
        assert_eq!(back.code, Some(ErrorCode::OutOfRange));
    }

    #[test]
    fn tab_context_reply_parses_as_tabs() {
        let back = BrowserResponse::parse(
            r#"{"status":"success","reply":{"titles":["Google","YouTube"],"active_index":1}}"#,
        )
        .unwrap();
        match back.reply {
            ReplyBody::Tabs(ctx) => {
                assert_eq!(ctx.len(), 2);
                assert_eq!(ctx.active_title(), Some("YouTube"));
            }
            ReplyBody::Text(t) => panic!("expected tabs, got {t}"),
        }
    }

    #[test]
    fn partial_flag_round_trips() {
        let line = BrowserResponse::partial("still loading").to_line().unwrap();
        assert!(line.contains("\"partial\":true"));
        assert!(BrowserResponse::parse(&line).unwrap().partial);
    }

    #[test]
    fn ready_line() {
        assert!(BrowserResponse::ready().is_ready());
        assert!(!BrowserResponse::success("Navigated").is_ready());
        assert!(!BrowserResponse::error(ErrorCode::BrowserError, "ready").is_ready());
    }

    #[test]
    fn describe_stars_active_tab() {
        let ctx = TabContext {
            titles: vec!["Google".to_owned(), "YouTube".to_owned()],
            active_index: 1,
        };
        assert_eq!(ctx.describe(), "Tabs: (Tab 1: Google), *(Tab 2: YouTube)*");
        assert_eq!(TabContext::default().describe(), "Tabs: none");
    }
}
