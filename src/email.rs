//! Multi-turn email draft state.
//!
//! The session is the single source of truth for the draft. After every
//! mutation the router renders it into a compose link with
//! [`EmailDraftSession::compose_url`] and navigates the active tab there, so
//! the visible draft always matches this state.

use crate::config::EmailConfig;
use std::fmt;

/// Lifecycle of a draft.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DraftPhase {
    #[default]
    Empty,
    Drafting,
    Sent,
    Abandoned,
}

impl fmt::Display for DraftPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Empty => "empty",
            Self::Drafting => "drafting",
            Self::Sent => "sent",
            Self::Abandoned => "abandoned",
        };
        f.write_str(label)
    }
}

/// Errors starting a draft.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmailError {
    #[error("I don't have an address for {name}.")]
    UnknownContact { name: String },

    #[error("'{to}' doesn't look like an email address.")]
    InvalidAddress { to: String },
}

/// The process-wide draft.
#[derive(Debug, Clone)]
pub struct EmailDraftSession {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub body_content: String,
    phase: DraftPhase,
    config: EmailConfig,
}

impl EmailDraftSession {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            to: String::new(),
            to_name: String::new(),
            subject: String::new(),
            body_content: String::new(),
            phase: DraftPhase::Empty,
            config,
        }
    }

    pub fn phase(&self) -> DraftPhase {
        self.phase
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }

    /// True while a draft has been started and not yet sent or abandoned.
    pub fn is_drafting(&self) -> bool {
        self.phase == DraftPhase::Drafting
    }

    /// Start a draft to a contact from the configured contact book.
    ///
    /// Unknown names leave the session untouched.
    pub fn start_named(&mut self, name: &str) -> Result<(), EmailError> {
        let wanted = name.trim();
        let (key, address) = self
            .config
            .contacts
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
            .map(|(k, v)| (k.clone(), v.clone()))
            .ok_or_else(|| EmailError::UnknownContact {
                name: wanted.to_owned(),
            })?;
        self.reset(address, title_case(&key));
        Ok(())
    }

    /// Start a draft to an explicit address. The greeting name is derived
    /// from the local part (`jane.doe@x` greets "Jane Doe").
    pub fn start_generic(&mut self, to: &str) -> Result<(), EmailError> {
        let to = to.trim();
        let local = match to.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => local,
            _ => {
                return Err(EmailError::InvalidAddress { to: to.to_owned() });
            }
        };
        let name = title_case(&local.replace(['.', '_', '-', '+'], " "));
        self.reset(to.to_owned(), name);
        Ok(())
    }

    fn reset(&mut self, to: String, to_name: String) {
        if self.phase == DraftPhase::Drafting {
            tracing::info!(to = %self.to, "abandoning unsent draft");
            self.phase = DraftPhase::Abandoned;
        }
        self.to = to;
        self.to_name = to_name;
        self.subject.clear();
        self.body_content.clear();
        self.phase = DraftPhase::Drafting;
    }

    pub fn set_subject(&mut self, subject: &str) {
        self.subject = subject.trim().to_owned();
        self.phase = DraftPhase::Drafting;
    }

    pub fn set_body(&mut self, content: &str) {
        self.body_content = content.trim().to_owned();
        self.phase = DraftPhase::Drafting;
    }

    pub fn clear_subject(&mut self) {
        self.subject.clear();
        self.phase = DraftPhase::Drafting;
    }

    pub fn clear_body(&mut self) {
        self.body_content.clear();
        self.phase = DraftPhase::Drafting;
    }

    pub fn mark_sent(&mut self) {
        self.phase = DraftPhase::Sent;
    }

    /// Greeting, body and closing as they appear in the message.
    pub fn compose_body(&self) -> String {
        let mut closing = self.config.closing.clone();
        if !self.config.sender_name.is_empty() {
            closing.push_str(",\n");
            closing.push_str(&self.config.sender_name);
        }
        format!(
            "Dear {},\n\n{}\n\n{}",
            self.to_name, self.body_content, closing
        )
    }

    /// Compose link carrying the whole draft.
    pub fn compose_url(&self) -> String {
        let base = &self.config.compose_base;
        let sep = if base.contains('?') { '&' } else { '?' };
        format!(
            "{base}{sep}to={}&su={}&body={}",
            urlencoding::encode(&self.to),
            urlencoding::encode(&self.subject),
            urlencoding::encode(&self.compose_body()),
        )
    }
}

/// Whether `title` shows the compose surface: every marker must appear,
/// case-insensitively. An empty marker list never matches.
pub fn is_compose_surface(title: &str, markers: &[String]) -> bool {
    if markers.is_empty() {
        return false;
    }
    let title = title.to_lowercase();
    markers
        .iter()
        .all(|m| title.contains(&m.to_lowercase()))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn session() -> EmailDraftSession {
        let mut config = EmailConfig::default();
        config
            .contacts
            .insert("faiz".to_owned(), "faiz@uni.edu".to_owned());
        EmailDraftSession::new(config)
    }

    #[test]
    fn start_named_resolves_case_insensitively() {
        let mut s = session();
        s.start_named("Faiz").unwrap();
        assert_eq!(s.to, "faiz@uni.edu");
        assert_eq!(s.to_name, "Faiz");
        assert_eq!(s.phase(), DraftPhase::Drafting);
    }

    #[test]
    fn unknown_contact_leaves_session_untouched() {
        let mut s = session();
        s.start_generic("a@b.com").unwrap();
        s.set_subject("Hi");
        let err = s.start_named("nobody").unwrap_err();
        assert_eq!(
            err,
            EmailError::UnknownContact {
                name: "nobody".to_owned()
            }
        );
        assert_eq!(s.to, "a@b.com");
        assert_eq!(s.subject, "Hi");
    }

    #[test]
    fn generic_derives_greeting_name() {
        let mut s = session();
        s.start_generic("jane.doe@example.com").unwrap();
        assert_eq!(s.to_name, "Jane Doe");
        assert!(s.start_generic("not-an-address").is_err());
    }

    #[test]
    fn restart_resets_every_field() {
        let mut s = session();
        s.start_generic("a@b.com").unwrap();
        s.set_subject("Old");
        s.set_body("old body");
        s.start_named("faiz").unwrap();
        assert_eq!(s.subject, "");
        assert_eq!(s.body_content, "");
        assert_eq!(s.to, "faiz@uni.edu");
    }

    #[test]
    fn compose_body_layout() {
        let mut s = session();
        s.start_named("faiz").unwrap();
        s.set_body("See you at noon.");
        assert_eq!(
            s.compose_body(),
            "Dear Faiz,\n\nSee you at noon.\n\nBest regards"
        );

        s.config.sender_name = "Sam".to_owned();
        assert!(s.compose_body().ends_with("Best regards,\nSam"));
    }

    #[test]
    fn compose_url_encodes_fields() {
        let mut s = session();
        s.start_named("faiz").unwrap();
        s.set_subject("Lab & report");
        s.set_body("Done.");
        let url = s.compose_url();
        assert!(url.starts_with("https://mail.google.com/mail/?view=cm&fs=1&to=faiz%40uni.edu"));
        assert!(url.contains("&su=Lab%20%26%20report"));
        assert!(url.contains("&body=Dear%20Faiz%2C%0A%0ADone.%0A%0ABest%20regards"));
    }

    #[test]
    fn clear_and_send_phases() {
        let mut s = session();
        assert_eq!(s.phase(), DraftPhase::Empty);
        s.start_named("faiz").unwrap();
        s.set_subject("x");
        s.clear_subject();
        assert_eq!(s.subject, "");
        s.mark_sent();
        assert_eq!(s.phase(), DraftPhase::Sent);
        assert!(!s.is_drafting());
    }

    #[test]
    fn compose_surface_needs_all_markers() {
        let markers = vec!["Gmail".to_owned(), "Compose".to_owned()];
        assert!(is_compose_surface("Compose Mail - Gmail", &markers));
        assert!(is_compose_surface("compose mail - gmail", &markers));
        assert!(!is_compose_surface("Inbox - Gmail", &markers));
        assert!(!is_compose_surface("Compose Mail", &[]));
    }
}
