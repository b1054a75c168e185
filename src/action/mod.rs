//! Validated actions produced from reasoning output.
//!
//! An [`Action`] is the only thing the router dispatches on. Every variant
//! carries exactly the fields its execution path needs, so a router `match`
//! over it is exhaustive and never has to look at loose JSON again.

pub mod parser;

pub use parser::parse_decision;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scroll direction for the active tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

impl ScrollDirection {
    /// Parses a loose direction word. Anything other than "up" scrolls down.
    pub fn from_word(word: &str) -> Self {
        if word.trim().eq_ignore_ascii_case("up") {
            Self::Up
        } else {
            Self::Down
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Why the parser fell back to [`Action::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseIssue {
    /// No JSON object could be recovered from the text.
    Unparsable,
    /// The object named an action kind nobody handles.
    UnknownKind,
    /// A field the kind requires was absent or empty.
    MissingField,
    /// A tab switch index that is not a number, digit string or cardinal.
    AmbiguousTabIndex,
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unparsable => "unparsable",
            Self::UnknownKind => "unknown_kind",
            Self::MissingField => "missing_field",
            Self::AmbiguousTabIndex => "ambiguous_tab_index",
        };
        f.write_str(s)
    }
}

/// A validated instruction. Exactly one kind, with its own fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Launch a local application.
    OpenApp { target: String },
    /// Close a local application.
    CloseApp { target: String },
    /// Focus a local application window and type text into it.
    WriteText { target: String, content: String },
    /// Open a URL in the system default browser.
    OpenBrowser { target: String },
    /// Tear down the controlled browser.
    CloseBrowser,
    /// Navigate the active controlled tab.
    BrowserGoto { target: String },
    /// Fill an input in the active tab.
    BrowserFill { selector: String, content: String },
    /// Press a key on an element in the active tab.
    BrowserPress { selector: String, key: String },
    /// Scroll the active tab.
    BrowserScroll { direction: ScrollDirection },
    /// Open the first search or video result on the active tab.
    BrowserClickFirstResult,
    BrowserOpenTab,
    BrowserCloseTab,
    /// Switch to a tab by 1-based index.
    BrowserSwitchTab { index: usize },
    BrowserNextTab,
    BrowserPrevTab,
    /// Send the drafted email from the compose surface.
    BrowserSend,
    /// Start a draft to a named contact.
    EmailStartNamed { name: String },
    /// Start a draft to an explicit address.
    EmailStartGeneric { to: String },
    /// Start a draft to an address with subject and body in one step.
    EmailCompose {
        to: String,
        subject: String,
        body: String,
    },
    EmailSetSubject { subject: String },
    EmailSetBody { content: String },
    EmailClearSubject,
    EmailClearBody,
    /// Nothing to execute; reply with text.
    None {
        reply: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        issue: Option<ParseIssue>,
    },
}

impl Action {
    /// Canonical snake_case kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OpenApp { .. } => "open_app",
            Self::CloseApp { .. } => "close_app",
            Self::WriteText { .. } => "write_text",
            Self::OpenBrowser { .. } => "open_browser",
            Self::CloseBrowser => "close_browser",
            Self::BrowserGoto { .. } => "browser_goto",
            Self::BrowserFill { .. } => "browser_fill",
            Self::BrowserPress { .. } => "browser_press",
            Self::BrowserScroll { .. } => "browser_scroll",
            Self::BrowserClickFirstResult => "browser_click_first_result",
            Self::BrowserOpenTab => "browser_open_tab",
            Self::BrowserCloseTab => "browser_close_tab",
            Self::BrowserSwitchTab { .. } => "browser_switch_tab",
            Self::BrowserNextTab => "browser_next_tab",
            Self::BrowserPrevTab => "browser_prev_tab",
            Self::BrowserSend => "browser_send",
            Self::EmailStartNamed { .. } => "email_start_named",
            Self::EmailStartGeneric { .. } => "email_start_generic",
            Self::EmailCompose { .. } => "email_compose",
            Self::EmailSetSubject { .. } => "email_set_subject",
            Self::EmailSetBody { .. } => "email_set_body",
            Self::EmailClearSubject => "email_clear_subject",
            Self::EmailClearBody => "email_clear_body",
            Self::None { .. } => "none",
        }
    }

    /// Plain reply with no parse issue.
    pub fn reply(text: impl Into<String>) -> Self {
        Self::None {
            reply: text.into(),
            issue: None,
        }
    }

    /// Parser fallback carrying the reason.
    pub fn unusable(text: impl Into<String>, issue: ParseIssue) -> Self {
        Self::None {
            reply: text.into(),
            issue: Some(issue),
        }
    }

    /// True for the email kinds that mutate an existing draft or send it.
    /// These require the compose surface to be active.
    pub fn requires_compose_surface(&self) -> bool {
        matches!(
            self,
            Self::EmailSetSubject { .. }
                | Self::EmailSetBody { .. }
                | Self::EmailClearSubject
                | Self::EmailClearBody
                | Self::BrowserSend
        )
    }
}
