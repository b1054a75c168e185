//! Remote reasoning service: utterance plus context in, decision text out.
//!
//! The reply is raw model text; turning it into an [`Action`] is the
//! decision parser's job.
//!
//! [`Action`]: crate::action::Action

pub mod prompt;

use crate::config::ReasoningConfig;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Reasoning call failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReasoningError {
    /// The configured API key variable is unset or empty.
    #[error("API key not set (expected in ${var})")]
    MissingApiKey { var: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider rejected the request.
    #[error("request rejected: {0}")]
    Request(String),

    /// The provider failed.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("reasoning request timed out")]
    Timeout,

    #[error("reasoning service unreachable: {0}")]
    Unreachable(String),

    /// A 200 reply without any text in it.
    #[error("reasoning service returned no text")]
    EmptyResponse,
}

/// Anything that can turn a prompt into decision text.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn decide(&self, system_prompt: &str, utterance: &str) -> Result<String, ReasoningError>;
}

/// Client for a Gemini-style `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from config, reading the key from the configured variable.
    ///
    /// # Errors
    ///
    /// Returns [`ReasoningError::MissingApiKey`] when the variable is unset.
    pub fn from_config(config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ReasoningError::MissingApiKey {
                var: config.api_key_env.clone(),
            })?;
        Ok(Self::new(
            config.base_url.clone(),
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn request_body(system_prompt: &str, utterance: &str) -> Value {
        json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{
                "role": "user",
                "parts": [{ "text": format!("User: {utterance}") }]
            }],
            "generationConfig": { "temperature": 0.1 }
        })
    }
}

/// Offline stand-in that returns the utterance as the decision.
///
/// A typed JSON decision runs as-is; anything else is spoken back through
/// the parser's verbatim fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoReasoning;

#[async_trait]
impl ReasoningService for EchoReasoning {
    async fn decide(&self, _system_prompt: &str, utterance: &str) -> Result<String, ReasoningError> {
        Ok(utterance.to_owned())
    }
}

/// The configured client. With `offline_fallback`, a missing API key yields
/// [`EchoReasoning`] instead of an error.
///
/// # Errors
///
/// Returns [`ReasoningError::MissingApiKey`] when the key is unset and
/// `offline_fallback` is false.
pub fn from_config(
    config: &ReasoningConfig,
    offline_fallback: bool,
) -> Result<Arc<dyn ReasoningService>, ReasoningError> {
    match GeminiClient::from_config(config) {
        Ok(client) => {
            tracing::info!(model = client.model(), "reasoning service ready");
            Ok(Arc::new(client))
        }
        Err(ReasoningError::MissingApiKey { var }) if offline_fallback => {
            tracing::warn!(%var, "no API key, decisions are read from the typed text");
            Ok(Arc::new(EchoReasoning))
        }
        Err(e) => Err(e),
    }
}

/// Concatenate every text part of the first candidate.
fn extract_text(body: &Value) -> Option<String> {
    let parts = body
        .pointer("/candidates/0/content/parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no response body".to_owned()
            } else {
                body.chars().take(500).collect()
            }
        })
}

/// Map a non-success HTTP status to a typed error.
pub fn map_http_error(status: reqwest::StatusCode, body: &str) -> ReasoningError {
    let detail = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => ReasoningError::Auth(detail),
        429 => ReasoningError::RateLimited(detail),
        s if s >= 500 => ReasoningError::Provider(detail),
        _ => ReasoningError::Request(format!("HTTP {status}: {detail}")),
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> ReasoningError {
    if err.is_timeout() {
        ReasoningError::Timeout
    } else if err.is_connect() {
        ReasoningError::Unreachable(err.to_string())
    } else {
        ReasoningError::Request(format!("transport error: {err}"))
    }
}

#[async_trait]
impl ReasoningService for GeminiClient {
    async fn decide(&self, system_prompt: &str, utterance: &str) -> Result<String, ReasoningError> {
        tracing::debug!(model = %self.model, utterance, "asking reasoning service");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(system_prompt, utterance))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            let err = map_http_error(status, &body);
            tracing::warn!(%status, error = %err, "reasoning request failed");
            return Err(err);
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| ReasoningError::Provider(format!("invalid JSON reply: {e}")))?;
        extract_text(&json).ok_or(ReasoningError::EmptyResponse)
    }
}
