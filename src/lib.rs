//! Vocal: voice-driven desktop automation.
//!
//! An utterance (typed, or transcribed after the wake phrase) goes to a
//! remote reasoning service together with the state of the controlled
//! browser. The reply is parsed into one [`Action`], and the
//! [`ActionRouter`] executes it against the browser, the local desktop or
//! the email draft.
//!
//! # Architecture
//!
//! - **Decision parser** (`action`): model text to a typed action, never failing
//! - **Browser** (`browser`): tab session store in the `vocal-browser`
//!   subprocess, restarted on demand by the supervisor
//! - **Email** (`email`): the single in-progress draft
//! - **Router** (`router`): one dispatch point, replies for every outcome
//! - **Gate** (`gate`): exclusive microphone ownership between passive and
//!   active listening

pub mod action;
pub mod assistant;
pub mod browser;
pub mod config;
pub mod desktop;
pub mod email;
pub mod error;
pub mod gate;
pub mod reasoning;
pub mod router;
pub mod server;
pub mod speech;
pub mod wake;

pub use action::{Action, ParseIssue, parse_decision};
pub use assistant::{Assistant, Outcome};
pub use browser::{BrowserPort, BrowserSupervisor, LocalBrowser, TabContext};
pub use config::VocalConfig;
pub use email::EmailDraftSession;
pub use error::{ErrorCode, Result, VocalError};
pub use gate::{ListeningGate, ListeningState};
pub use router::{ActionRouter, Reply};
pub use server::VocalServer;
