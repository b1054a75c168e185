//! Error types for the vocal orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable failure category attached to replies and HTTP responses.
///
/// The first five codes form the core taxonomy of the dispatch layer; the
/// rest cover the surrounding capture and launch paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Reasoning output could not be turned into a usable action.
    ParseError,
    /// Selector, tab, contact or application was not found.
    NotFound,
    /// Browser subprocess unreachable after one restart attempt.
    ServiceUnavailable,
    /// Email mutation attempted outside the compose surface.
    PreconditionFailed,
    /// Tab index outside the current tab count.
    OutOfRange,
    /// Browser protocol or driver failure.
    BrowserError,
    /// The listening gate is held by another capture.
    Busy,
    /// Speech was captured but not understood.
    NoSpeech,
    /// Nothing was heard before the capture window closed.
    SpeechTimeout,
    /// The transcription service failed.
    SpeechUnavailable,
    /// Speaker verification rejected the utterance.
    SpeakerRejected,
    /// A local application could not be launched, closed or typed into.
    LaunchFailed,
    /// The reasoning service call failed.
    ReasoningFailed,
}

impl ErrorCode {
    /// Stable snake_case label, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::NotFound => "not_found",
            Self::ServiceUnavailable => "service_unavailable",
            Self::PreconditionFailed => "precondition_failed",
            Self::OutOfRange => "out_of_range",
            Self::BrowserError => "browser_error",
            Self::Busy => "busy",
            Self::NoSpeech => "no_speech",
            Self::SpeechTimeout => "speech_timeout",
            Self::SpeechUnavailable => "speech_unavailable",
            Self::SpeakerRejected => "speaker_rejected",
            Self::LaunchFailed => "launch_failed",
            Self::ReasoningFailed => "reasoning_failed",
        }
    }

    /// HTTP status used when this code is surfaced to programmatic callers.
    pub fn http_status(self) -> u16 {
        match self {
            Self::ParseError => 422,
            Self::NotFound => 404,
            Self::ServiceUnavailable => 503,
            Self::PreconditionFailed => 412,
            Self::OutOfRange => 400,
            Self::BrowserError => 502,
            Self::Busy => 409,
            Self::NoSpeech => 400,
            Self::SpeechTimeout => 408,
            Self::SpeechUnavailable => 502,
            Self::SpeakerRejected => 403,
            Self::LaunchFailed => 500,
            Self::ReasoningFailed => 502,
        }
    }

    /// Whether a client may reasonably retry the same request later.
    pub fn can_retry(self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable
                | Self::Busy
                | Self::NoSpeech
                | Self::SpeechTimeout
                | Self::ReasoningFailed
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum VocalError {
    /// Browser subprocess could not be reached.
    #[error("browser service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The browser service answered with a typed error.
    #[error("{message}")]
    Browser {
        /// Code reported by the service.
        code: ErrorCode,
        /// Human-readable message from the service.
        message: String,
    },

    /// Speech capture or transcription error.
    #[error("speech error: {0}")]
    Speech(#[from] crate::speech::SttError),

    /// Reasoning service error.
    #[error("reasoning error: {0}")]
    Reasoning(#[from] crate::reasoning::ReasoningError),

    /// Local application launch error.
    #[error("launch error: {0}")]
    Launch(#[from] crate::desktop::LaunchError),

    /// The listening gate is already held.
    #[error("busy: {0}")]
    Busy(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VocalError {
    /// Maps the error onto the reply taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            Self::Browser { code, .. } => *code,
            Self::Speech(e) => e.code(),
            Self::Reasoning(_) => ErrorCode::ReasoningFailed,
            Self::Launch(e) => e.code(),
            Self::Busy(_) => ErrorCode::Busy,
            Self::Config(_) | Self::Io(_) => ErrorCode::BrowserError,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VocalError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn codes_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ServiceUnavailable).unwrap();
        assert_eq!(json, "\"service_unavailable\"");
        let back: ErrorCode = serde_json::from_str("\"out_of_range\"").unwrap();
        assert_eq!(back, ErrorCode::OutOfRange);
    }

    #[test]
    fn as_str_matches_serde() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::NotFound,
            ErrorCode::PreconditionFailed,
            ErrorCode::SpeechTimeout,
            ErrorCode::LaunchFailed,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn speech_statuses_follow_http_conventions() {
        assert_eq!(ErrorCode::NoSpeech.http_status(), 400);
        assert_eq!(ErrorCode::SpeechTimeout.http_status(), 408);
        assert_eq!(ErrorCode::SpeechUnavailable.http_status(), 502);
        assert_eq!(ErrorCode::ServiceUnavailable.http_status(), 503);
    }

    #[test]
    fn browser_error_keeps_remote_code() {
        let err = VocalError::Browser {
            code: ErrorCode::NotFound,
            message: "no element matches `#q`".to_owned(),
        };
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.to_string(), "no element matches `#q`");
    }

    #[test]
    fn service_unavailable_is_retryable() {
        assert!(ErrorCode::ServiceUnavailable.can_retry());
        assert!(!ErrorCode::OutOfRange.can_retry());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VocalError>();
    }
}
