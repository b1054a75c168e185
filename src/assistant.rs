//! The assistant: utterance in, reply out.
//!
//! [`Assistant`] ties the pieces together. A text utterance goes to the
//! reasoning service with the current browser context, the decision is
//! parsed into an action, and the router executes it. Voice requests take
//! the listening gate first; the passive loop listens for the wake phrase
//! between them.

use crate::action::parse_decision;
use crate::action::parser::EMPTY_REPLY;
use crate::config::ListeningConfig;
use crate::error::ErrorCode;
use crate::gate::ListeningGate;
use crate::reasoning::{ReasoningService, prompt};
use crate::router::{ActionRouter, Reply};
use crate::speech::{SpeechToText, speaker_accepted};
use crate::wake::WakeDetector;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Back-off after the transcription backend fails in the passive loop.
const STT_FAILURE_BACKOFF: Duration = Duration::from_secs(5);

const SPEAKER_REJECTED_REPLY: &str = "Sorry, I only take commands from my registered user.";

/// Capture timings and thresholds.
#[derive(Debug, Clone)]
pub struct ListenSettings {
    pub command_window: Duration,
    pub passive_window: Duration,
    pub passive_pause: Duration,
    pub speaker_threshold: f32,
}

impl From<&ListeningConfig> for ListenSettings {
    fn from(config: &ListeningConfig) -> Self {
        Self {
            command_window: Duration::from_millis(config.command_window_ms),
            passive_window: Duration::from_millis(config.passive_window_ms),
            passive_pause: Duration::from_millis(config.passive_pause_ms),
            speaker_threshold: config.speaker_threshold,
        }
    }
}

/// Result of one handled request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    /// What was heard, for voice requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heard: Option<String>,
    pub reply: Reply,
}

impl Outcome {
    fn reply(reply: Reply) -> Self {
        Self { heard: None, reply }
    }
}

/// Orchestrates reasoning, dispatch and listening.
pub struct Assistant {
    router: Mutex<ActionRouter>,
    reasoning: Arc<dyn ReasoningService>,
    stt: Arc<dyn SpeechToText>,
    gate: ListeningGate,
    wake: WakeDetector,
    settings: ListenSettings,
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("wake", &self.wake)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Assistant {
    pub fn new(
        router: ActionRouter,
        reasoning: Arc<dyn ReasoningService>,
        stt: Arc<dyn SpeechToText>,
        config: &ListeningConfig,
    ) -> Self {
        Self {
            router: Mutex::new(router),
            reasoning,
            stt,
            gate: ListeningGate::new(),
            wake: WakeDetector::new(&config.wake_phrase, config.wake_max_distance),
            settings: ListenSettings::from(config),
        }
    }

    pub fn gate(&self) -> &ListeningGate {
        &self.gate
    }

    /// Handle a typed utterance.
    pub async fn handle_text(&self, utterance: &str) -> Outcome {
        Outcome::reply(self.decide_and_dispatch(utterance).await)
    }

    /// Capture one command from the microphone and handle it.
    ///
    /// Rejected with [`ErrorCode::Busy`] while another capture holds the gate.
    pub async fn handle_voice(&self) -> Outcome {
        let _session = match self.gate.begin_active().await {
            Ok(session) => session,
            Err(e) => return Outcome::reply(Reply::error(e.code(), "I'm already listening.")),
        };

        let transcript = match self.stt.listen(self.settings.command_window).await {
            Ok(t) => t,
            Err(e) => {
                tracing::info!(error = %e, "voice capture failed");
                return Outcome::reply(Reply::error(e.code(), e.user_message()));
            }
        };
        if let Some(score) = transcript.speaker_score
            && !speaker_accepted(score, self.settings.speaker_threshold)
        {
            tracing::info!(score, "speaker rejected");
            return Outcome {
                heard: Some(transcript.text),
                reply: Reply::error(ErrorCode::SpeakerRejected, SPEAKER_REJECTED_REPLY),
            };
        }

        tracing::info!(heard = %transcript.text, "voice command");
        let reply = self.decide_and_dispatch(&transcript.text).await;
        Outcome {
            heard: Some(transcript.text),
            reply,
        }
    }

    /// Run a command that followed the wake phrase in the same breath.
    async fn handle_inline(&self, command: &str) -> Outcome {
        let _session = match self.gate.begin_active().await {
            Ok(session) => session,
            Err(e) => return Outcome::reply(Reply::error(e.code(), "I'm already listening.")),
        };
        Outcome {
            heard: Some(command.to_owned()),
            reply: self.decide_and_dispatch(command).await,
        }
    }

    async fn decide_and_dispatch(&self, utterance: &str) -> Reply {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Reply::error(ErrorCode::ParseError, EMPTY_REPLY);
        }

        let mut router = self.router.lock().await;
        let tabs = match router.tab_context().await {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                tracing::debug!(error = %e, "no browser context");
                None
            }
        };
        let system = prompt::system_prompt(&prompt::browser_context(tabs.as_ref()));

        let decision = match self.reasoning.decide(&system, utterance).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "reasoning failed");
                return Reply::error(
                    ErrorCode::ReasoningFailed,
                    "Sorry, I couldn't work out what to do just now.",
                );
            }
        };
        tracing::debug!(decision = %decision, "reasoning decision");
        router.dispatch(parse_decision(&decision)).await
    }

    /// Wake-word loop. Runs until `cancel` fires.
    ///
    /// Each cycle is skipped while an active capture holds the gate. A
    /// detection from a cycle that an active capture interrupted is dropped.
    pub async fn run_passive_loop(&self, cancel: CancellationToken) {
        tracing::info!(phrase = self.wake.phrase(), "passive listening started");
        loop {
            let pause = match self.passive_cycle().await {
                Some(Ok(outcome)) => {
                    tracing::info!(heard = ?outcome.heard, reply = %outcome.reply.text, "wake command handled");
                    self.settings.passive_pause
                }
                Some(Err(backoff)) => backoff,
                None => self.settings.passive_pause,
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }
        tracing::info!("passive listening stopped");
    }

    /// `Err` carries the back-off before the next cycle.
    async fn passive_cycle(&self) -> Option<Result<Outcome, Duration>> {
        let cycle = self.gate.try_passive_cycle()?;
        let heard = self.stt.listen(self.settings.passive_window).await;
        if cycle.interrupted() {
            tracing::debug!("passive cycle interrupted by an active capture");
            return None;
        }
        drop(cycle);

        let transcript = match heard {
            Ok(t) => t,
            Err(crate::speech::SttError::Unavailable(message)) => {
                tracing::warn!(%message, "transcription unavailable, backing off");
                return Some(Err(STT_FAILURE_BACKOFF));
            }
            Err(_) => return None,
        };
        let rest = self.wake.detect(&transcript.text)?;
        tracing::info!(heard = %transcript.text, "wake phrase detected");
        if rest.is_empty() {
            Some(Ok(self.handle_voice().await))
        } else {
            Some(Ok(self.handle_inline(&rest).await))
        }
    }

    /// Current tabs, if the browser answers.
    pub async fn tab_context(&self) -> crate::Result<crate::browser::TabContext> {
        self.router.lock().await.tab_context().await
    }

    /// Close the controlled browser.
    pub async fn shutdown(&self) {
        self.router.lock().await.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::browser::{LocalBrowser, MemoryDriver, TabSettings};
    use crate::config::EmailConfig;
    use crate::desktop::DryRunLauncher;
    use crate::email::EmailDraftSession;
    use crate::reasoning::ReasoningError;
    use crate::speech::{ScriptedStt, SttError, Transcript};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Returns canned decisions and records the prompts it saw.
    #[derive(Default)]
    struct CannedReasoning {
        decisions: StdMutex<Vec<Result<String, ReasoningError>>>,
        prompts: StdMutex<Vec<(String, String)>>,
    }

    impl CannedReasoning {
        fn answering(decisions: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                decisions: StdMutex::new(decisions.iter().rev().map(|d| Ok((*d).to_owned())).collect()),
                prompts: StdMutex::default(),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for CannedReasoning {
        async fn decide(&self, system_prompt: &str, utterance: &str) -> Result<String, ReasoningError> {
            self.prompts
                .lock()
                .unwrap()
                .push((system_prompt.to_owned(), utterance.to_owned()));
            self.decisions
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(ReasoningError::EmptyResponse))
        }
    }

    fn assistant(reasoning: Arc<CannedReasoning>, stt: Arc<ScriptedStt>) -> (Assistant, MemoryDriver) {
        let driver = MemoryDriver::with_pages(&[("https://www.google.com", "Google")]);
        let observer = driver.clone();
        let settings = TabSettings {
            element_wait: Duration::from_millis(100),
            ..TabSettings::default()
        };
        let router = ActionRouter::new(
            Box::new(LocalBrowser::new(settings, move || driver.clone())),
            Arc::new(DryRunLauncher::new()),
            EmailDraftSession::new(EmailConfig::default()),
        );
        let config = ListeningConfig {
            command_window_ms: 10,
            passive_window_ms: 10,
            passive_pause_ms: 5,
            ..ListeningConfig::default()
        };
        (Assistant::new(router, reasoning, stt, &config), observer)
    }

    #[tokio::test]
    async fn text_goes_through_reasoning_and_router() {
        let reasoning = CannedReasoning::answering(&[
            r#"{"action":"browser_fill","selector":"[name='q']","content":"rust"}"#,
        ]);
        let (assistant, observer) = assistant(reasoning.clone(), Arc::new(ScriptedStt::default()));

        let outcome = assistant.handle_text("search for rust").await;
        assert!(!outcome.reply.is_error(), "{:?}", outcome.reply);
        assert_eq!(observer.field(0, "[name='q']").as_deref(), Some("rust"));

        let prompts = reasoning.prompts.lock().unwrap();
        assert_eq!(prompts[0].1, "search for rust");
        assert!(prompts[0].0.contains("*(Tab 1: Google)*"));
    }

    #[tokio::test]
    async fn empty_text_skips_reasoning() {
        let reasoning = CannedReasoning::answering(&[]);
        let (assistant, _) = assistant(reasoning.clone(), Arc::new(ScriptedStt::default()));
        let outcome = assistant.handle_text("   ").await;
        assert_eq!(outcome.reply.text, EMPTY_REPLY);
        assert!(reasoning.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reasoning_failure_is_a_reply() {
        let reasoning = CannedReasoning::answering(&[]);
        let (assistant, _) = assistant(reasoning, Arc::new(ScriptedStt::default()));
        let outcome = assistant.handle_text("open notepad").await;
        assert_eq!(outcome.reply.code, Some(ErrorCode::ReasoningFailed));
    }

    #[tokio::test]
    async fn voice_reports_what_was_heard() {
        let reasoning = CannedReasoning::answering(&[r#"{"action":"open_app","target":"calculator"}"#]);
        let stt = Arc::new(ScriptedStt::new([Ok(Transcript::from_text("open the calculator"))]));
        let (assistant, _) = assistant(reasoning, stt);

        let outcome = assistant.handle_voice().await;
        assert_eq!(outcome.heard.as_deref(), Some("open the calculator"));
        assert_eq!(outcome.reply, Reply::ok("Launching Calculator."));
        assert_eq!(assistant.gate().state(), crate::gate::ListeningState::Idle);
    }

    #[tokio::test]
    async fn voice_errors_map_to_codes() {
        let stt = Arc::new(ScriptedStt::new([
            Err(SttError::TimedOut { ms: 10 }),
            Ok(Transcript {
                text: "open notepad".into(),
                speaker_score: Some(0.2),
            }),
        ]));
        let (assistant, _) = assistant(CannedReasoning::answering(&[]), stt);

        let outcome = assistant.handle_voice().await;
        assert_eq!(outcome.reply.code, Some(ErrorCode::SpeechTimeout));
        let outcome = assistant.handle_voice().await;
        assert_eq!(outcome.reply.code, Some(ErrorCode::SpeakerRejected));
        assert_eq!(assistant.gate().state(), crate::gate::ListeningState::Idle);
    }

    #[tokio::test]
    async fn voice_rejected_while_gate_held() {
        let (assistant, _) = assistant(CannedReasoning::answering(&[]), Arc::new(ScriptedStt::default()));
        let _held = assistant.gate().begin_active().await.unwrap();
        let outcome = assistant.handle_voice().await;
        assert_eq!(outcome.reply.code, Some(ErrorCode::Busy));
    }

    #[tokio::test]
    async fn wake_phrase_with_inline_command() {
        let reasoning = CannedReasoning::answering(&[r#"{"action":"open_app","target":"notepad"}"#]);
        let stt = Arc::new(ScriptedStt::new([
            Ok(Transcript::from_text("some background chatter")),
            Ok(Transcript::from_text("hey vocal, open notepad")),
        ]));
        let (assistant, _) = assistant(reasoning.clone(), stt.clone());

        assert!(assistant.passive_cycle().await.is_none());
        let outcome = assistant.passive_cycle().await.unwrap().unwrap();
        assert_eq!(outcome.heard.as_deref(), Some("open notepad"));
        assert_eq!(outcome.reply, Reply::ok("Launching Notepad."));
        assert_eq!(reasoning.prompts.lock().unwrap()[0].1, "open notepad");
    }

    #[tokio::test]
    async fn bare_wake_phrase_captures_a_command() {
        let reasoning = CannedReasoning::answering(&[r#"{"action":"none","reply":"Hi!"}"#]);
        let stt = Arc::new(ScriptedStt::new([
            Ok(Transcript::from_text("hey vocal")),
            Ok(Transcript::from_text("say hello")),
        ]));
        let (assistant, _) = assistant(reasoning, stt.clone());

        let outcome = assistant.passive_cycle().await.unwrap().unwrap();
        assert_eq!(outcome.heard.as_deref(), Some("say hello"));
        assert_eq!(outcome.reply, Reply::ok("Hi!"));
        assert_eq!(stt.remaining(), 0);
    }

    #[tokio::test]
    async fn passive_cycle_skipped_while_active() {
        let stt = Arc::new(ScriptedStt::new([Ok(Transcript::from_text("hey vocal open notepad"))]));
        let (assistant, _) = assistant(CannedReasoning::answering(&[]), stt.clone());
        let held = assistant.gate().begin_active().await.unwrap();
        assert!(assistant.passive_cycle().await.is_none());
        assert_eq!(stt.remaining(), 1);
        drop(held);
    }

    #[tokio::test]
    async fn passive_loop_stops_on_cancel() {
        let (assistant, _) = assistant(CannedReasoning::answering(&[]), Arc::new(ScriptedStt::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), assistant.run_passive_loop(cancel))
            .await
            .unwrap();
    }
}
