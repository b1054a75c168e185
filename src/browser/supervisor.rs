//! Lifecycle management for the browser service subprocess.
//!
//! The supervisor spawns the service lazily, health-checks it before every
//! request, and restarts it at most once per request. Communication is
//! newline-delimited JSON over the child's stdin/stdout with a deadline on
//! every read and a bound on line length.

use super::protocol::{BrowserRequest, BrowserResponse, MAX_LINE_BYTES, RequestLine};
use crate::config::BrowserConfig;
use crate::error::{ErrorCode, VocalError};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{Instant, timeout};

/// How long `shutdown()` waits for a clean exit before killing.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Service lifecycle states.
///
/// ```text
/// Stopped → Starting → Healthy → Stopped
///     ↑         ↓          ↓
///     └──── Failed ←───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// No child process.
    Stopped,
    /// Spawned, waiting for the ready line and first probe.
    Starting,
    /// Answering probes.
    Healthy,
    /// Did not come up, or stopped answering.
    Failed,
}

impl ServiceState {
    /// Returns `true` if a transition from `self` to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Healthy)
                | (Self::Starting, Self::Failed)
                | (Self::Healthy, Self::Failed)
                | (Self::Healthy, Self::Stopped)
                | (Self::Failed, Self::Starting)
                | (Self::Failed, Self::Stopped)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Errors from the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Failed to spawn the service.
    #[error("failed to spawn browser service: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The service never wrote its ready line.
    #[error("browser service was not ready within {waited_ms} ms")]
    NotReady { waited_ms: u64 },

    /// The service was restarted but still does not answer.
    #[error("browser service is unreachable after a restart")]
    Unreachable,

    /// A request exceeded its deadline.
    #[error("browser service did not answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The service closed its pipes.
    #[error("browser service exited unexpectedly")]
    ProcessExited,

    /// A line exceeded the protocol bound.
    #[error("browser service output exceeded {max_bytes} bytes")]
    OutputTruncated { max_bytes: usize },

    /// Malformed traffic.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Internal lifecycle bug.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: ServiceState, to: ServiceState },
}

impl From<SupervisorError> for VocalError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::SpawnFailed(_)
            | SupervisorError::NotReady { .. }
            | SupervisorError::Unreachable
            | SupervisorError::ProcessExited => VocalError::ServiceUnavailable(err.to_string()),
            SupervisorError::Timeout { .. }
            | SupervisorError::OutputTruncated { .. }
            | SupervisorError::Protocol { .. }
            | SupervisorError::InvalidTransition { .. } => VocalError::Browser {
                code: ErrorCode::BrowserError,
                message: err.to_string(),
            },
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A spawned service with its stdio pipes.
///
/// The child process is killed when this value is dropped.
struct ServiceProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ServiceProcess {
    fn spawn(config: &BrowserConfig) -> Result<Self, SupervisorError> {
        let mut child = Command::new(&config.command)
            .args(config.service_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::SpawnFailed)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(SupervisorError::Protocol {
                message: "child stdio was not piped".to_owned(),
            });
        };
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SupervisorError> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(map_write_error)?;
        self.stdin.flush().await.map_err(map_write_error)
    }

    /// Reads exactly one response line. EOF means the process is gone.
    async fn read_response(&mut self) -> Result<BrowserResponse, SupervisorError> {
        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| SupervisorError::Protocol {
                message: format!("stdout read error: {e}"),
            })?;
        if n == 0 {
            return Err(SupervisorError::ProcessExited);
        }
        if line.len() > MAX_LINE_BYTES {
            return Err(SupervisorError::OutputTruncated {
                max_bytes: MAX_LINE_BYTES,
            });
        }
        BrowserResponse::parse(&line).map_err(|e| SupervisorError::Protocol {
            message: format!("unparsable response: {e}"),
        })
    }

    /// Reads until the ready line.
    async fn wait_ready(&mut self) -> Result<(), SupervisorError> {
        loop {
            match self.read_response().await {
                Ok(resp) if resp.is_ready() => return Ok(()),
                Ok(other) => {
                    tracing::debug!(reply = %other.text(), "ignoring line before ready");
                }
                Err(SupervisorError::Protocol { message }) => {
                    tracing::debug!(%message, "ignoring non-protocol line before ready");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads until the response whose id matches, dropping stale ones.
    async fn read_matching(&mut self, id: u64) -> Result<BrowserResponse, SupervisorError> {
        loop {
            let resp = self.read_response().await?;
            match resp.id {
                Some(got) if got == id => return Ok(resp),
                got => {
                    tracing::debug!(expected = id, ?got, "discarding stale response");
                }
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for ServiceProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Maps a stdin write error to `ProcessExited` (broken pipe) or `Protocol`.
fn map_write_error(e: std::io::Error) -> SupervisorError {
    if e.kind() == std::io::ErrorKind::BrokenPipe {
        tracing::warn!("stdin broken pipe, browser service exited");
        SupervisorError::ProcessExited
    } else {
        SupervisorError::Protocol {
            message: format!("stdin write error: {e}"),
        }
    }
}

/// Owns the browser service subprocess.
pub struct BrowserSupervisor {
    config: BrowserConfig,
    state: ServiceState,
    process: Option<ServiceProcess>,
    next_id: u64,
    restarts: u32,
}

impl fmt::Debug for BrowserSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserSupervisor")
            .field("command", &self.config.command)
            .field("state", &self.state)
            .field("has_child", &self.process.is_some())
            .field("restarts", &self.restarts)
            .finish()
    }
}

impl BrowserSupervisor {
    /// Creates a supervisor in `Stopped` state; nothing is spawned yet.
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            state: ServiceState::Stopped,
            process: None,
            next_id: 0,
            restarts: 0,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Number of times a child has been spawned.
    pub fn spawn_count(&self) -> u32 {
        self.restarts
    }

    /// OS pid of the current child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    fn transition(&mut self, target: ServiceState) -> Result<(), SupervisorError> {
        if !self.state.can_transition_to(target) {
            return Err(SupervisorError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        tracing::debug!(from = %self.state, to = %target, "browser service state transition");
        self.state = target;
        Ok(())
    }

    /// Force a transition used on failure paths, where the source state may
    /// already be `Failed`.
    fn mark_failed(&mut self) {
        if self.state != ServiceState::Failed {
            let _ = self.transition(ServiceState::Failed);
        }
        self.process = None;
    }

    /// Send one request and wait for its response.
    async fn exchange(
        &mut self,
        request: BrowserRequest,
        deadline: Duration,
    ) -> Result<BrowserResponse, SupervisorError> {
        let Some(process) = self.process.as_mut() else {
            return Err(SupervisorError::ProcessExited);
        };
        self.next_id += 1;
        let id = self.next_id;
        let line = RequestLine::new(id, request)
            .to_line()
            .map_err(|e| SupervisorError::Protocol {
                message: format!("failed to serialize request: {e}"),
            })?;

        let started = Instant::now();
        timeout(deadline, async {
            process.write_line(&line).await?;
            process.read_matching(id).await
        })
        .await
        .map_err(|_| SupervisorError::Timeout {
            timeout_ms: millis(started.elapsed()),
        })?
    }

    /// Lightweight `ping` with the probe deadline.
    async fn probe(&mut self) -> bool {
        if !self.process.as_mut().is_some_and(ServiceProcess::is_alive) {
            return false;
        }
        let deadline = self.config.probe_timeout();
        match self.exchange(BrowserRequest::Ping, deadline).await {
            Ok(resp) => resp.is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    /// Spawn the child and wait for its ready line within the warm-up bound.
    async fn spawn(&mut self) -> Result<(), SupervisorError> {
        self.process = None;
        self.transition(ServiceState::Starting)?;
        self.restarts += 1;
        tracing::info!(command = %self.config.command, attempt = self.restarts, "starting browser service");

        let mut process = match ServiceProcess::spawn(&self.config) {
            Ok(p) => p,
            Err(e) => {
                self.mark_failed();
                return Err(e);
            }
        };
        let warmup = self.config.warmup();
        match timeout(warmup, process.wait_ready()).await {
            Ok(Ok(())) => {
                self.process = Some(process);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "browser service failed during warm-up");
                self.mark_failed();
                Err(SupervisorError::NotReady {
                    waited_ms: millis(warmup),
                })
            }
            Err(_) => {
                tracing::warn!(warmup_ms = millis(warmup), "browser service warm-up timed out");
                self.mark_failed();
                Err(SupervisorError::NotReady {
                    waited_ms: millis(warmup),
                })
            }
        }
    }

    /// Probe; on failure start the service and probe once more.
    pub async fn ensure_running(&mut self) -> Result<(), SupervisorError> {
        if self.process.is_some() && self.probe().await {
            return Ok(());
        }
        if self.state == ServiceState::Healthy {
            tracing::warn!("browser service stopped answering, restarting");
            self.mark_failed();
        }

        self.spawn().await?;
        if self.probe().await {
            self.transition(ServiceState::Healthy)?;
            tracing::info!(pid = ?self.pid(), "browser service healthy");
            Ok(())
        } else {
            self.mark_failed();
            Err(SupervisorError::Unreachable)
        }
    }

    /// Run one request against a healthy service.
    pub async fn request(
        &mut self,
        request: BrowserRequest,
    ) -> Result<BrowserResponse, SupervisorError> {
        self.ensure_running().await?;
        let name = request.name();
        let deadline = self.config.request_timeout();
        match self.exchange(request, deadline).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                tracing::warn!(action = name, error = %e, "browser request failed");
                if matches!(
                    e,
                    SupervisorError::ProcessExited | SupervisorError::OutputTruncated { .. }
                ) {
                    self.mark_failed();
                }
                Err(e)
            }
        }
    }

    /// Ask the service to close the browser, then make sure the child is gone.
    pub async fn shutdown(&mut self) {
        let Some(mut process) = self.process.take() else {
            if self.state != ServiceState::Stopped {
                let _ = self.transition(ServiceState::Stopped);
            }
            return;
        };

        let line = RequestLine::new(self.next_id + 1, BrowserRequest::Shutdown).to_line();
        if let Ok(line) = line {
            let _ = timeout(self.config.probe_timeout(), process.write_line(&line)).await;
        }
        match timeout(EXIT_GRACE, process.child.wait()).await {
            Ok(Ok(status)) => tracing::info!(%status, "browser service exited"),
            _ => {
                tracing::warn!("browser service did not exit, killing");
                let _ = process.child.kill().await;
            }
        }
        self.next_id += 1;
        if self.state != ServiceState::Stopped {
            let _ = self.transition(ServiceState::Stopped);
        }
    }
}
