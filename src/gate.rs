//! Listening gate: exclusive ownership of the microphone.
//!
//! Two parties contend for the one input device. The passive wake loop runs
//! short opportunistic cycles; an active capture (wake event or client
//! request) takes the device for a whole command. The gate has two parts:
//!
//! - an `active` flag, flipped with compare-and-swap so two overlapping
//!   active requests can never both win;
//! - a microphone lock, held by whoever is currently reading audio.
//!
//! An active session sets the flag first and then waits for the lock, so an
//! in-flight passive cycle finishes its short read and the passive loop
//! skips every cycle after that. The flag is cleared when the
//! [`ActiveSession`] guard drops, on every exit path.

use crate::error::VocalError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, watch};

/// Observable gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningState {
    Idle,
    Active,
}

impl fmt::Display for ListeningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Active => f.write_str("active-session"),
        }
    }
}

#[derive(Debug)]
struct GateInner {
    active: AtomicBool,
    mic: Arc<Mutex<()>>,
    state: watch::Sender<ListeningState>,
}

/// Shared handle to the gate. Clones refer to the same gate.
#[derive(Debug, Clone)]
pub struct ListeningGate {
    inner: Arc<GateInner>,
}

impl Default for ListeningGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ListeningGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ListeningState::Idle);
        Self {
            inner: Arc::new(GateInner {
                active: AtomicBool::new(false),
                mic: Arc::new(Mutex::new(())),
                state,
            }),
        }
    }

    pub fn state(&self) -> ListeningState {
        if self.inner.active.load(Ordering::Acquire) {
            ListeningState::Active
        } else {
            ListeningState::Idle
        }
    }

    /// Receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<ListeningState> {
        self.inner.state.subscribe()
    }

    /// Enter the active session.
    ///
    /// Fails immediately with [`VocalError::Busy`] when another active
    /// session holds the gate. Otherwise waits for any in-flight passive
    /// cycle to release the microphone.
    pub async fn begin_active(&self) -> crate::Result<ActiveSession> {
        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("active capture rejected: gate already held");
            return Err(VocalError::Busy(
                "already handling a voice command".to_owned(),
            ));
        }
        // Constructed before the await so a cancelled wait still clears the flag.
        let flag = ActiveFlag {
            inner: Arc::clone(&self.inner),
        };
        self.inner.state.send_replace(ListeningState::Active);
        tracing::debug!("listening gate: active");

        let mic = Arc::clone(&self.inner.mic).lock_owned().await;
        Ok(ActiveSession { _mic: mic, _flag: flag })
    }

    /// Try to start one passive detection cycle.
    ///
    /// Returns `None` when an active session holds or is acquiring the gate,
    /// or when the microphone is busy. The caller skips the cycle entirely.
    pub fn try_passive_cycle(&self) -> Option<PassiveCycle> {
        if self.inner.active.load(Ordering::Acquire) {
            return None;
        }
        let mic = Arc::clone(&self.inner.mic).try_lock_owned().ok()?;
        if self.inner.active.load(Ordering::Acquire) {
            return None;
        }
        Some(PassiveCycle {
            _mic: mic,
            inner: Arc::clone(&self.inner),
        })
    }
}

#[derive(Debug)]
struct ActiveFlag {
    inner: Arc<GateInner>,
}

impl Drop for ActiveFlag {
    fn drop(&mut self) {
        self.inner.active.store(false, Ordering::Release);
        self.inner.state.send_replace(ListeningState::Idle);
        tracing::debug!("listening gate: idle");
    }
}

/// Exclusive active session. Dropping it returns the gate to idle.
#[derive(Debug)]
pub struct ActiveSession {
    // field order matters: the microphone is released before the flag
    _mic: OwnedMutexGuard<()>,
    _flag: ActiveFlag,
}

/// One passive read of the microphone.
#[derive(Debug)]
pub struct PassiveCycle {
    _mic: OwnedMutexGuard<()>,
    inner: Arc<GateInner>,
}

impl PassiveCycle {
    /// True when an active session started while this cycle was reading.
    /// A detection from such a cycle must be discarded.
    pub fn interrupted(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_active_session_is_rejected() {
        let gate = ListeningGate::new();
        let first = gate.begin_active().await.unwrap();
        assert_eq!(gate.state(), ListeningState::Active);

        let err = gate.begin_active().await.unwrap_err();
        assert!(matches!(err, VocalError::Busy(_)));

        drop(first);
        assert_eq!(gate.state(), ListeningState::Idle);
        assert!(gate.begin_active().await.is_ok());
    }

    #[tokio::test]
    async fn passive_cycle_skipped_while_active() {
        let gate = ListeningGate::new();
        let session = gate.begin_active().await.unwrap();
        assert!(gate.try_passive_cycle().is_none());
        drop(session);
        assert!(gate.try_passive_cycle().is_some());
    }

    #[tokio::test]
    async fn active_waits_for_passive_cycle_and_marks_it_interrupted() {
        let gate = ListeningGate::new();
        let cycle = gate.try_passive_cycle().unwrap();

        let g = gate.clone();
        let waiter = tokio::spawn(async move { g.begin_active().await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cycle.interrupted());
        assert!(!waiter.is_finished());
        // the passive loop cannot start another cycle while the active one waits
        assert!(gate.try_passive_cycle().is_none());

        drop(cycle);
        waiter.await.unwrap().unwrap();
        assert_eq!(gate.state(), ListeningState::Idle);
    }

    #[tokio::test]
    async fn cancelled_acquire_releases_flag() {
        let gate = ListeningGate::new();
        let cycle = gate.try_passive_cycle().unwrap();

        let attempt = tokio::time::timeout(Duration::from_millis(20), gate.begin_active()).await;
        assert!(attempt.is_err());
        assert_eq!(gate.state(), ListeningState::Idle);
        drop(cycle);
    }

    #[tokio::test]
    async fn session_released_when_task_errors() {
        let gate = ListeningGate::new();
        let g = gate.clone();
        let result: Result<(), &str> = async move {
            let _session = g.begin_active().await.map_err(|_| "busy")?;
            Err("handler failed")
        }
        .await;
        assert!(result.is_err());
        assert_eq!(gate.state(), ListeningState::Idle);
    }

    #[tokio::test]
    async fn watch_reports_transitions() {
        let gate = ListeningGate::new();
        let mut rx = gate.subscribe();
        assert_eq!(*rx.borrow(), ListeningState::Idle);

        let session = gate.begin_active().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ListeningState::Active);

        drop(session);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ListeningState::Idle);
    }

    #[tokio::test]
    async fn overlapping_requests_never_both_active() {
        let gate = ListeningGate::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = gate.clone();
            handles.push(tokio::spawn(async move {
                match g.begin_active().await {
                    Ok(session) => {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        drop(session);
                        true
                    }
                    Err(_) => false,
                }
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(gate.state(), ListeningState::Idle);
    }
}
