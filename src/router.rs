//! Action router: the single dispatch point.
//!
//! Every [`Action`] maps to exactly one execution path and always produces a
//! [`Reply`]. Preconditions are checked before anything is mutated, and
//! failures from the browser or the OS become replies with an [`ErrorCode`];
//! nothing is thrown past [`ActionRouter::dispatch`].

use crate::action::Action;
use crate::browser::tabs::{TabError, normalize_url};
use crate::browser::{BrowserPort, BrowserRequest, BrowserResponse, TabContext};
use crate::desktop::{AppLauncher, LaunchError};
use crate::email::{EmailDraftSession, is_compose_surface};
use crate::error::{ErrorCode, VocalError};
use serde::Serialize;
use std::sync::Arc;

const UNAVAILABLE_REPLY: &str =
    "I couldn't reach the browser right now. Please try again in a moment.";

/// User-facing outcome of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// The action took effect but could not be fully confirmed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl Reply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: None,
            partial: false,
        }
    }

    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: Some(code),
            partial: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.code.is_some()
    }

    /// Reply for a failure that crossed a collaborator boundary.
    pub fn from_error(err: &VocalError) -> Self {
        let code = err.code();
        let text = match code {
            ErrorCode::ServiceUnavailable => UNAVAILABLE_REPLY.to_owned(),
            _ => err.to_string(),
        };
        Self::error(code, text)
    }

    fn from_response(resp: BrowserResponse) -> Self {
        let text = resp.text();
        if resp.is_success() {
            Self {
                text,
                code: None,
                partial: resp.partial,
            }
        } else {
            Self::error(resp.code.unwrap_or(ErrorCode::BrowserError), text)
        }
    }
}

/// Dispatches actions against the browser, the desktop and the email draft.
pub struct ActionRouter {
    browser: Box<dyn BrowserPort>,
    launcher: Arc<dyn AppLauncher>,
    email: EmailDraftSession,
}

impl std::fmt::Debug for ActionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRouter")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl ActionRouter {
    pub fn new(
        browser: Box<dyn BrowserPort>,
        launcher: Arc<dyn AppLauncher>,
        email: EmailDraftSession,
    ) -> Self {
        Self {
            browser,
            launcher,
            email,
        }
    }

    pub fn email(&self) -> &EmailDraftSession {
        &self.email
    }

    /// Current tabs, for prompt context and preconditions.
    pub async fn tab_context(&mut self) -> crate::Result<TabContext> {
        self.browser.tab_context().await
    }

    /// Close the controlled browser.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "browser shutdown failed");
        }
    }

    /// Execute one action. Never fails; failures are replies.
    pub async fn dispatch(&mut self, action: Action) -> Reply {
        let kind = action.kind();
        tracing::info!(action = kind, "dispatching");
        let reply = self.route(action).await;
        match reply.code {
            Some(code) => tracing::warn!(action = kind, %code, reply = %reply.text, "action failed"),
            None => tracing::debug!(action = kind, partial = reply.partial, "action done"),
        }
        reply
    }

    async fn route(&mut self, action: Action) -> Reply {
        if action.requires_compose_surface()
            && let Err(reply) = self.require_compose_surface().await
        {
            return reply;
        }

        match action {
            Action::None { reply, issue } => match issue {
                Some(issue) => {
                    tracing::debug!(%issue, "decision could not be used");
                    Reply::error(ErrorCode::ParseError, reply)
                }
                None => Reply::ok(reply),
            },

            Action::OpenApp { target } => local_reply(self.launcher.open_app(&target).await),
            Action::CloseApp { target } => local_reply(self.launcher.close_app(&target).await),
            Action::WriteText { target, content } => {
                local_reply(self.launcher.write_text(&target, &content).await)
            }
            Action::OpenBrowser { target } => {
                let url = normalize_url(&target);
                local_reply(self.launcher.open_url(&url).await)
            }
            Action::CloseBrowser => match self.browser.close().await {
                Ok(()) => Reply::ok("Closed the browser and all tabs."),
                Err(e) => Reply::from_error(&e),
            },

            Action::BrowserGoto { target } => self.call(BrowserRequest::Goto { target }).await,
            Action::BrowserFill { selector, content } => {
                self.call(BrowserRequest::Fill { selector, content }).await
            }
            Action::BrowserPress { selector, key } => {
                self.call(BrowserRequest::Press { selector, key }).await
            }
            Action::BrowserScroll { direction } => {
                self.call(BrowserRequest::Scroll { direction }).await
            }
            Action::BrowserClickFirstResult => self.call(BrowserRequest::ClickFirstResult).await,
            Action::BrowserOpenTab => self.call(BrowserRequest::OpenTab).await,
            Action::BrowserCloseTab => self.call(BrowserRequest::CloseTab).await,
            Action::BrowserSwitchTab { index } => self.switch_tab(index).await,
            Action::BrowserNextTab => self.call(BrowserRequest::NextTab).await,
            Action::BrowserPrevTab => self.call(BrowserRequest::PrevTab).await,
            Action::BrowserSend => {
                let reply = self.call(BrowserRequest::SendEmail).await;
                if !reply.is_error() {
                    self.email.mark_sent();
                }
                reply
            }

            Action::EmailStartNamed { name } => {
                let mut draft = self.email.clone();
                match draft.start_named(&name) {
                    Ok(()) => self.commit_draft(draft, "Started").await,
                    Err(e) => Reply::error(ErrorCode::NotFound, e.to_string()),
                }
            }
            Action::EmailStartGeneric { to } => {
                let mut draft = self.email.clone();
                match draft.start_generic(&to) {
                    Ok(()) => self.commit_draft(draft, "Started").await,
                    Err(e) => Reply::error(ErrorCode::ParseError, e.to_string()),
                }
            }
            Action::EmailCompose { to, subject, body } => {
                let mut draft = self.email.clone();
                if let Err(e) = draft.start_generic(&to) {
                    return Reply::error(ErrorCode::ParseError, e.to_string());
                }
                draft.set_subject(&subject);
                draft.set_body(&body);
                self.commit_draft(draft, "Drafted").await
            }
            Action::EmailSetSubject { subject } => {
                let mut draft = self.email.clone();
                draft.set_subject(&subject);
                let text = format!("Subject set to '{}'.", draft.subject);
                self.refresh_with(draft, text).await
            }
            Action::EmailSetBody { content } => {
                let mut draft = self.email.clone();
                draft.set_body(&content);
                self.refresh_with(draft, "Updated the email body.".to_owned())
                    .await
            }
            Action::EmailClearSubject => {
                let mut draft = self.email.clone();
                draft.clear_subject();
                self.refresh_with(draft, "Cleared the subject.".to_owned())
                    .await
            }
            Action::EmailClearBody => {
                let mut draft = self.email.clone();
                draft.clear_body();
                self.refresh_with(draft, "Cleared the email body.".to_owned())
                    .await
            }
        }
    }

    async fn call(&mut self, request: BrowserRequest) -> Reply {
        match self.browser.call(request).await {
            Ok(resp) => Reply::from_response(resp),
            Err(e) => Reply::from_error(&e),
        }
    }

    async fn switch_tab(&mut self, index: usize) -> Reply {
        let ctx = match self.browser.tab_context().await {
            Ok(ctx) => ctx,
            Err(e) => return Reply::from_error(&e),
        };
        if index == 0 || index > ctx.len() {
            let err = TabError::OutOfRange {
                requested: index,
                count: ctx.len(),
            };
            return Reply::error(ErrorCode::OutOfRange, err.to_string());
        }
        self.call(BrowserRequest::SwitchTab { index }).await
    }

    /// `Err` carries the rejection reply.
    async fn require_compose_surface(&mut self) -> Result<(), Reply> {
        let ctx = self
            .browser
            .tab_context()
            .await
            .map_err(|e| Reply::from_error(&e))?;
        let title = ctx.active_title().unwrap_or_default();
        if is_compose_surface(title, &self.email.config().compose_title_markers) {
            Ok(())
        } else {
            Err(Reply::error(
                ErrorCode::PreconditionFailed,
                "I can only change or send the email from the Gmail compose screen.",
            ))
        }
    }

    async fn commit_draft(&mut self, draft: EmailDraftSession, verb: &str) -> Reply {
        let text = format!("{verb} an email to {}.", draft.to_name);
        self.refresh_with(draft, text).await
    }

    /// Render `draft` into the active tab; adopt it only if the browser took it.
    async fn refresh_with(&mut self, draft: EmailDraftSession, text: String) -> Reply {
        let url = draft.compose_url();
        let reply = self.call(BrowserRequest::Goto { target: url }).await;
        if reply.is_error() {
            return reply;
        }
        self.email = draft;
        Reply {
            text,
            code: None,
            partial: reply.partial,
        }
    }
}

fn local_reply(result: Result<String, LaunchError>) -> Reply {
    match result {
        Ok(text) => Reply::ok(text),
        Err(e) => Reply::error(e.code(), format!("Sorry, {e}.")),
    }
}
