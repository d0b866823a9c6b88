//! Checker trait abstractions.
//!
//! The pool and the per-target state machine only talk to these traits, so
//! the SSH stack can be swapped for a synthetic session in tests.

use crate::error::{CheckError, CheckResult};
use crate::types::Target;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One login attempt against one endpoint.
#[async_trait]
pub trait Session: Send {
    /// Open the connection and finish the key exchange.
    async fn establish(&mut self, connect_timeout: Duration, kex_timeout: Duration) -> CheckResult<()>;

    /// Try the credentials. `Ok(false)` means the server said no.
    async fn authenticate(&mut self, user: &str, pass: &str) -> CheckResult<bool>;

    /// Release the connection. Must be safe to call in any state.
    async fn shutdown(&mut self);
}

/// Opens sessions for targets.
pub trait SessionFactory: Send + Sync {
    /// Cancelling `cancel` must interrupt any in-flight call on the session.
    fn open(&self, target: &Target, cancel: CancellationToken) -> Box<dyn Session>;
}

/// Final classification of a checked target.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// The credentials work.
    On,
    /// The server was reached and refused the credentials.
    Off,
    /// The attempt failed before an answer was obtained.
    Error(Arc<CheckError>),
    /// The attempt was cancelled; not reported anywhere.
    Discarded,
}

impl CheckOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::On => OutcomeKind::On,
            Self::Off => OutcomeKind::Off,
            Self::Error(_) => OutcomeKind::Error,
            Self::Discarded => OutcomeKind::Discarded,
        }
    }
}

/// [`CheckOutcome`] without the error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    On,
    Off,
    Error,
    Discarded,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
            Self::Error => write!(f, "error"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

/// Pool progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub checked: usize,
    pub total: usize,
    pub workers_done: usize,
    pub workers: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}, {}/{}",
            self.checked, self.total, self.workers_done, self.workers
        )
    }
}

/// Receives pool lifecycle events from the monitor.
pub trait PoolObserver: Send + Sync {
    /// Called on every monitor tick until the run completes.
    fn on_progress(&self, _progress: Progress) {}

    /// Called exactly once, after every worker has finished.
    fn on_complete(&self, _progress: Progress) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PoolObserver for NoopObserver {}
