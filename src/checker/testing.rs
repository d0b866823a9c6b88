//! Synthetic sessions for exercising the checker without a network.
//!
//! The password decides what the fake server does: `good` logs in, `bad` is
//! refused, `error` fails the handshake and `hang` never finishes until
//! cancelled. Anything else is refused.

use crate::checker::traits::{Session, SessionFactory};
use crate::error::{CheckError, CheckResult};
use crate::types::Target;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    shutdowns: AtomicUsize,
}

/// Opens [`FakeSession`]s and counts them.
#[derive(Default)]
pub struct FakeFactory {
    delay: Duration,
    counters: Arc<Counters>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every handshake takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.counters.shutdowns.load(Ordering::SeqCst)
    }
}

impl SessionFactory for FakeFactory {
    fn open(&self, target: &Target, cancel: CancellationToken) -> Box<dyn Session> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeSession {
            mode: target.pass.clone(),
            delay: self.delay,
            cancel,
            counters: self.counters.clone(),
        })
    }
}

pub struct FakeSession {
    mode: String,
    delay: Duration,
    cancel: CancellationToken,
    counters: Arc<Counters>,
}

#[async_trait]
impl Session for FakeSession {
    async fn establish(&mut self, _connect: Duration, _kex: Duration) -> CheckResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = self.cancel.cancelled() => return Err(CheckError::Cancelled),
            }
        }
        match self.mode.as_str() {
            "error" => Err(CheckError::Protocol("scripted handshake failure".to_string())),
            "hang" => {
                self.cancel.cancelled().await;
                Err(CheckError::Cancelled)
            }
            _ => Ok(()),
        }
    }

    async fn authenticate(&mut self, _user: &str, pass: &str) -> CheckResult<bool> {
        Ok(pass == "good")
    }

    async fn shutdown(&mut self) {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
