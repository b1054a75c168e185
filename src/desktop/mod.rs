//! Local application launch, close and typing.
//!
//! [`SystemLauncher`] shells out per OS: direct launch or `open -a` or
//! `start` to open, `pkill`/`osascript`/`taskkill` to close, `xdotool`
//! (Linux/X11) or `osascript` (macOS) to focus a window and type into it.
//! All of it is fire-and-forget with a best-effort confirmation.

pub mod apps;

use crate::config::AppsConfig;
use crate::error::ErrorCode;
use apps::{CommandPlan, Platform, display_name};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

/// Timeout for helper commands that are expected to exit promptly.
const HELPER_TIMEOUT: Duration = Duration::from_secs(30);

/// Window lookups after launching an app for typing.
const FOCUS_ATTEMPTS: u32 = 12;
const FOCUS_POLL: Duration = Duration::from_millis(500);

/// Per-keystroke delay when typing, in milliseconds.
const TYPE_DELAY_MS: u32 = 40;

/// Launch failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    /// The program does not exist.
    #[error("couldn't find an application called {app}")]
    NotFound { app: String },

    /// Nothing matching the app is running.
    #[error("{app} doesn't seem to be running")]
    NotRunning { app: String },

    /// No window for the app showed up in time.
    #[error("could not find a {app} window")]
    WindowNotFound { app: String },

    /// A helper command failed.
    #[error("{program} failed: {message}")]
    Failed { program: String, message: String },

    /// Not supported on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl LaunchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } | Self::NotRunning { .. } | Self::WindowNotFound { .. } => {
                ErrorCode::NotFound
            }
            Self::Failed { .. } | Self::Unsupported(_) => ErrorCode::LaunchFailed,
        }
    }
}

/// Local OS actions. Each returns the reply spoken back on success.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    async fn open_app(&self, name: &str) -> Result<String, LaunchError>;

    async fn close_app(&self, name: &str) -> Result<String, LaunchError>;

    /// Focus the app's window (launching it if needed) and type `text`.
    async fn write_text(&self, name: &str, text: &str) -> Result<String, LaunchError>;

    /// Open `url` in the system default browser.
    async fn open_url(&self, url: &str) -> Result<String, LaunchError>;
}

/// Launcher backed by the host OS.
#[derive(Debug, Clone)]
pub struct SystemLauncher {
    platform: Platform,
    overrides: BTreeMap<String, String>,
}

impl SystemLauncher {
    pub fn new(config: &AppsConfig) -> Self {
        Self {
            platform: Platform::current(),
            overrides: config
                .paths
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Spawn and detach.
    fn spawn_detached(plan: &CommandPlan, app: &str) -> Result<(), LaunchError> {
        tracing::info!(program = %plan.program, args = ?plan.args, "launching");
        tokio::process::Command::new(&plan.program)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
            .map_err(|e| spawn_error(e, &plan.program, app))
    }

    async fn find_window(&self, app: &str) -> Result<Option<String>, LaunchError> {
        match self.platform {
            Platform::Linux => {
                let plan = CommandPlan {
                    program: "xdotool".to_owned(),
                    args: vec![
                        "search".to_owned(),
                        "--onlyvisible".to_owned(),
                        "--name".to_owned(),
                        format!("(?i){}", regex_escape(app)),
                    ],
                };
                // xdotool exits 1 when nothing matches
                match run_checked(&plan, app).await {
                    Ok(out) => Ok(out.lines().next().map(|l| l.trim().to_owned())),
                    Err(LaunchError::Failed { .. }) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Platform::MacOs => Ok(Some(app.to_owned())),
            Platform::Windows => Err(LaunchError::Unsupported("typing into applications")),
        }
    }
}

/// Run to completion, returning stdout. Non-zero exit is [`LaunchError::Failed`].
pub async fn run_checked(plan: &CommandPlan, app: &str) -> Result<String, LaunchError> {
    let child = tokio::process::Command::new(&plan.program)
        .args(&plan.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(e, &plan.program, app))?;

    let output = tokio::time::timeout(HELPER_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| LaunchError::Failed {
            program: plan.program.clone(),
            message: format!("timed out after {}s", HELPER_TIMEOUT.as_secs()),
        })?
        .map_err(|e| LaunchError::Failed {
            program: plan.program.clone(),
            message: e.to_string(),
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LaunchError::Failed {
            program: plan.program.clone(),
            message: format!("exit code {}: {}", output.status.code().unwrap_or(-1), stderr.trim()),
        })
    }
}

fn spawn_error(e: std::io::Error, program: &str, app: &str) -> LaunchError {
    if e.kind() == std::io::ErrorKind::NotFound {
        LaunchError::NotFound {
            app: app.to_owned(),
        }
    } else {
        LaunchError::Failed {
            program: program.to_owned(),
            message: e.to_string(),
        }
    }
}

fn regex_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn applescript_string(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl AppLauncher for SystemLauncher {
    async fn open_app(&self, name: &str) -> Result<String, LaunchError> {
        let plan = apps::open_plan(self.platform, &self.overrides, name);
        Self::spawn_detached(&plan, name)?;
        Ok(format!("Launching {}.", display_name(name)))
    }

    async fn close_app(&self, name: &str) -> Result<String, LaunchError> {
        let plan = apps::close_plan(self.platform, &self.overrides, name);
        match run_checked(&plan, name).await {
            Ok(_) => Ok(format!("Closed {}.", display_name(name))),
            Err(LaunchError::Failed { .. }) if self.platform != Platform::MacOs => {
                Err(LaunchError::NotRunning {
                    app: name.to_owned(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn write_text(&self, name: &str, text: &str) -> Result<String, LaunchError> {
        if self.platform == Platform::Linux && which::which("xdotool").is_err() {
            return Err(LaunchError::Failed {
                program: "xdotool".to_owned(),
                message: "not installed; it is needed to type into windows".to_owned(),
            });
        }
        let mut window = self.find_window(name).await?;
        if window.is_none() {
            tracing::info!(app = name, "no window found, launching first");
            self.open_app(name).await?;
            for _ in 0..FOCUS_ATTEMPTS {
                tokio::time::sleep(FOCUS_POLL).await;
                window = self.find_window(name).await?;
                if window.is_some() {
                    break;
                }
            }
        }
        let window = window.ok_or_else(|| LaunchError::WindowNotFound {
            app: name.to_owned(),
        })?;

        match self.platform {
            Platform::Linux => {
                let activate = CommandPlan {
                    program: "xdotool".to_owned(),
                    args: vec!["windowactivate".into(), "--sync".into(), window],
                };
                run_checked(&activate, name).await?;
                let typing = CommandPlan {
                    program: "xdotool".to_owned(),
                    args: vec![
                        "type".into(),
                        "--delay".into(),
                        TYPE_DELAY_MS.to_string(),
                        "--".into(),
                        text.to_owned(),
                    ],
                };
                run_checked(&typing, name).await?;
            }
            Platform::MacOs => {
                let script = CommandPlan {
                    program: "osascript".to_owned(),
                    args: vec![
                        "-e".into(),
                        format!("tell application \"{}\" to activate", applescript_string(name)),
                        "-e".into(),
                        format!(
                            "tell application \"System Events\" to keystroke \"{}\"",
                            applescript_string(text)
                        ),
                    ],
                };
                run_checked(&script, name).await?;
            }
            Platform::Windows => return Err(LaunchError::Unsupported("typing into applications")),
        }
        Ok(format!("Wrote your text into {}.", display_name(name)))
    }

    async fn open_url(&self, url: &str) -> Result<String, LaunchError> {
        let plan = apps::open_url_plan(self.platform, url);
        Self::spawn_detached(&plan, url)?;
        Ok(format!("Opening {url} in a new tab."))
    }
}

/// Launcher that only records what it would do.
///
/// Backs `vocal --dry-run`. Names listed as missing fail with
/// [`LaunchError::NotFound`].
#[derive(Debug, Default)]
pub struct DryRunLauncher {
    calls: std::sync::Mutex<Vec<String>>,
    missing: Vec<String>,
}

impl DryRunLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing(apps: &[&str]) -> Self {
        Self {
            calls: std::sync::Mutex::default(),
            missing: apps.iter().map(|a| a.to_lowercase()).collect(),
        }
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, name: &str, call: String) -> Result<(), LaunchError> {
        tracing::info!(call = %call, "dry run");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if self.missing.contains(&name.trim().to_lowercase()) {
            return Err(LaunchError::NotFound {
                app: name.to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AppLauncher for DryRunLauncher {
    async fn open_app(&self, name: &str) -> Result<String, LaunchError> {
        self.record(name, format!("open {name}"))?;
        Ok(format!("Launching {}.", display_name(name)))
    }

    async fn close_app(&self, name: &str) -> Result<String, LaunchError> {
        self.record(name, format!("close {name}"))?;
        Ok(format!("Closed {}.", display_name(name)))
    }

    async fn write_text(&self, name: &str, text: &str) -> Result<String, LaunchError> {
        self.record(name, format!("write {name}: {text}"))?;
        Ok(format!("Wrote your text into {}.", display_name(name)))
    }

    async fn open_url(&self, url: &str) -> Result<String, LaunchError> {
        self.record(url, format!("url {url}"))?;
        Ok(format!("Opening {url} in a new tab."))
    }
}
