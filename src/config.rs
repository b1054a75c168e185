//! Configuration types for the orchestrator and the browser service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VocalConfig {
    /// HTTP surface settings.
    pub server: ServerConfig,
    /// Browser subprocess and tab session settings.
    pub browser: BrowserConfig,
    /// Remote reasoning service settings.
    pub reasoning: ReasoningConfig,
    /// Email draft settings.
    pub email: EmailConfig,
    /// Local application launch table.
    pub apps: AppsConfig,
    /// Passive and active listening settings.
    pub listening: ListeningConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5000,
        }
    }
}

/// Browser subprocess configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Program that runs the browser service.
    pub command: String,
    /// Extra arguments passed to `command`.
    pub args: Vec<String>,
    /// Page opened in fresh and reset tabs.
    pub landing_url: String,
    /// Health probe deadline in milliseconds.
    pub probe_timeout_ms: u64,
    /// How long to wait for the service's `ready` line after spawning.
    /// Covers creating the browser session plus one landing-page load wait.
    pub warmup_ms: u64,
    /// Per-request deadline once the service is healthy.
    pub request_timeout_ms: u64,
    /// Page load wait inside the service.
    pub load_wait_ms: u64,
    /// Element lookup wait inside the service.
    pub element_wait_ms: u64,
    /// Tab titles longer than this are truncated in tab context replies.
    pub title_width: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            command: "vocal-browser".to_owned(),
            args: Vec::new(),
            landing_url: "https://www.google.com".to_owned(),
            probe_timeout_ms: 500,
            warmup_ms: 10_000,
            request_timeout_ms: 15_000,
            load_wait_ms: 5_000,
            element_wait_ms: 5_000,
            title_width: 40,
        }
    }
}

impl BrowserConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Command line for the service: `args`, then the tab settings as flags.
    pub fn service_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "--landing-url".to_owned(),
            self.landing_url.clone(),
            "--load-wait-ms".to_owned(),
            self.load_wait_ms.to_string(),
            "--element-wait-ms".to_owned(),
            self.element_wait_ms.to_string(),
            "--title-width".to_owned(),
            self.title_width.to_string(),
        ]);
        args
    }
}

/// Remote reasoning service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Base URL of the `generateContent` API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_owned(),
            model: "gemini-2.5-flash".to_owned(),
            api_key_env: "GOOGLE_API_KEY".to_owned(),
            timeout_secs: 30,
        }
    }
}

/// Email draft configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Compose link base; query parameters are appended to it.
    pub compose_base: String,
    /// Closing line appended after the body.
    pub closing: String,
    /// Signed under the closing line when non-empty.
    pub sender_name: String,
    /// Every marker must appear in the active tab title for the compose
    /// surface to be recognised (case-insensitive).
    pub compose_title_markers: Vec<String>,
    /// Named contacts: spoken name to address.
    pub contacts: BTreeMap<String, String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            compose_base: "https://mail.google.com/mail/?view=cm&fs=1".to_owned(),
            closing: "Best regards".to_owned(),
            sender_name: String::new(),
            compose_title_markers: vec!["Gmail".to_owned(), "Compose".to_owned()],
            contacts: BTreeMap::new(),
        }
    }
}

/// Application launch table overrides.
///
/// Keys are lower-case spoken names; values are the program or path to run.
/// Entries here take precedence over the built-in table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsConfig {
    pub paths: BTreeMap<String, String>,
}

/// Listening configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListeningConfig {
    /// Phrase that starts an active command capture.
    pub wake_phrase: String,
    /// Maximum edit distance tolerated when matching the wake phrase.
    pub wake_max_distance: usize,
    /// Length of one passive capture window in milliseconds.
    pub passive_window_ms: u64,
    /// Length of the active command capture window in milliseconds.
    pub command_window_ms: u64,
    /// Pause between passive cycles in milliseconds.
    pub passive_pause_ms: u64,
    /// Minimum speaker-verification similarity.
    pub speaker_threshold: f32,
    /// External transcription program. It receives the capture window in
    /// seconds as its last argument and prints the transcript on stdout.
    pub stt_command: Option<String>,
    /// Extra arguments for `stt_command`.
    pub stt_args: Vec<String>,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            wake_phrase: "hey vocal".to_owned(),
            wake_max_distance: 2,
            passive_window_ms: 2_000,
            command_window_ms: 8_000,
            passive_pause_ms: 700,
            speaker_threshold: 0.65,
            stt_command: None,
            stt_args: Vec::new(),
        }
    }
}

impl VocalConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::VocalError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VocalError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path` when given, else from the default path when it
    /// exists, else defaults.
    pub fn load_or_default(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Self::default_config_path();
                if default.exists() {
                    Self::from_file(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Returns the default config file path: `<config dir>/vocal/config.toml`.
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("vocal").join("config.toml"),
            None => PathBuf::from("/tmp/vocal-config/config.toml"),
        }
    }
}
