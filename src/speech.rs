//! Speech-to-text collaborator and speaker verification check.
//!
//! Transcription itself is external. [`CommandStt`] runs a configured
//! program per capture window; it prints either a bare transcript or a JSON
//! object `{"text": "...", "speaker_score": 0.82}` on stdout.

use crate::error::ErrorCode;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

/// Extra time a transcription program gets beyond its capture window.
const TRANSCRIBE_GRACE: Duration = Duration::from_secs(10);

/// Speech capture failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SttError {
    /// Audio was captured but nothing intelligible was in it.
    #[error("no speech recognised")]
    NoSpeech,

    /// Nothing arrived before the deadline.
    #[error("listening timed out after {ms} ms")]
    TimedOut { ms: u64 },

    /// The transcription backend failed or is missing.
    #[error("speech service unavailable: {0}")]
    Unavailable(String),
}

impl SttError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoSpeech => ErrorCode::NoSpeech,
            Self::TimedOut { .. } => ErrorCode::SpeechTimeout,
            Self::Unavailable(_) => ErrorCode::SpeechUnavailable,
        }
    }

    /// What the assistant says back.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoSpeech => "Sorry, I couldn't understand that. Please try again.",
            Self::TimedOut { .. } => "I didn't hear anything. Please try again.",
            Self::Unavailable(_) => "Speech recognition is unavailable right now.",
        }
    }
}

/// One transcribed capture.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transcript {
    pub text: String,
    /// Similarity to the enrolled speaker, when the backend verifies voices.
    #[serde(default)]
    pub speaker_score: Option<f32>,
}

impl Transcript {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_score: None,
        }
    }
}

/// Capture and transcribe one window of audio.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn listen(&self, window: Duration) -> Result<Transcript, SttError>;
}

/// Speaker verification: similarity score in, decision out.
pub fn speaker_accepted(score: f32, threshold: f32) -> bool {
    score.is_finite() && score >= threshold
}

/// Transcription through an external program.
#[derive(Debug, Clone)]
pub struct CommandStt {
    program: String,
    args: Vec<String>,
}

impl CommandStt {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

fn parse_output(stdout: &str) -> Result<Transcript, SttError> {
    let trimmed = stdout.trim();
    let transcript = if trimmed.starts_with('{') {
        serde_json::from_str::<Transcript>(trimmed)
            .map_err(|e| SttError::Unavailable(format!("invalid transcript JSON: {e}")))?
    } else {
        Transcript::from_text(trimmed)
    };
    if transcript.text.trim().is_empty() {
        return Err(SttError::NoSpeech);
    }
    Ok(transcript)
}

#[async_trait]
impl SpeechToText for CommandStt {
    async fn listen(&self, window: Duration) -> Result<Transcript, SttError> {
        let seconds = format!("{:.1}", window.as_secs_f32());
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&seconds)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SttError::Unavailable(format!("failed to run {}: {e}", self.program)))?;

        let deadline = window + TRANSCRIBE_GRACE;
        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| SttError::TimedOut {
                ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| SttError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(program = %self.program, status = %output.status, %stderr, "transcription failed");
            return Err(SttError::Unavailable(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Used when no transcription program is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStt;

#[async_trait]
impl SpeechToText for NoStt {
    async fn listen(&self, _window: Duration) -> Result<Transcript, SttError> {
        Err(SttError::Unavailable(
            "no transcription program configured".to_owned(),
        ))
    }
}

/// Plays back a fixed sequence of results; `NoSpeech` once exhausted.
///
/// Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct ScriptedStt {
    queue: Mutex<VecDeque<Result<Transcript, SttError>>>,
}

impl ScriptedStt {
    pub fn new(results: impl IntoIterator<Item = Result<Transcript, SttError>>) -> Self {
        Self {
            queue: Mutex::new(results.into_iter().collect()),
        }
    }

    pub fn push(&self, result: Result<Transcript, SttError>) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn listen(&self, _window: Duration) -> Result<Transcript, SttError> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Err(SttError::NoSpeech))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(SttError::NoSpeech.code(), ErrorCode::NoSpeech);
        assert_eq!(SttError::TimedOut { ms: 1 }.code(), ErrorCode::SpeechTimeout);
        assert_eq!(
            SttError::Unavailable("x".into()).code(),
            ErrorCode::SpeechUnavailable
        );
    }

    #[test]
    fn speaker_threshold() {
        assert!(speaker_accepted(0.65, 0.65));
        assert!(speaker_accepted(0.9, 0.65));
        assert!(!speaker_accepted(0.64, 0.65));
        assert!(!speaker_accepted(f32::NAN, 0.65));
    }

    #[test]
    fn parse_plain_and_json_output() {
        assert_eq!(parse_output("open notepad\n").unwrap().text, "open notepad");
        let t = parse_output(r#"{"text":"hi","speaker_score":0.8}"#).unwrap();
        assert_eq!(t.text, "hi");
        assert_eq!(t.speaker_score, Some(0.8));
        assert_eq!(parse_output("   \n"), Err(SttError::NoSpeech));
        assert_eq!(parse_output(r#"{"text":""}"#), Err(SttError::NoSpeech));
        assert!(matches!(parse_output("{broken"), Err(SttError::Unavailable(_))));
    }

    #[tokio::test]
    async fn command_receives_window_seconds() {
        let stt = CommandStt::new("sh", vec!["-c".into(), "echo \"heard $0\"".into()]);
        let t = stt.listen(Duration::from_millis(2500)).await.unwrap();
        assert_eq!(t.text, "heard 2.5");
    }

    #[tokio::test]
    async fn failing_command_is_unavailable() {
        let stt = CommandStt::new("sh", vec!["-c".into(), "exit 3".into()]);
        let err = stt.listen(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SttError::Unavailable(_)));

        let missing = CommandStt::new("/nonexistent/vocal-stt", Vec::new());
        assert!(matches!(
            missing.listen(Duration::from_secs(1)).await,
            Err(SttError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn scripted_plays_in_order() {
        let stt = ScriptedStt::new([Ok(Transcript::from_text("one")), Err(SttError::TimedOut { ms: 5 })]);
        assert_eq!(stt.listen(Duration::ZERO).await.unwrap().text, "one");
        assert!(matches!(
            stt.listen(Duration::ZERO).await,
            Err(SttError::TimedOut { .. })
        ));
        assert_eq!(stt.listen(Duration::ZERO).await, Err(SttError::NoSpeech));
    }
}
