//! Per-target check state machine.
//!
//! A [`TargetCheck`] moves `NotStarted -> Connecting -> Authenticating ->
//! Complete` exactly once. Stopping is orthogonal: it cancels the check's
//! token, which interrupts whatever the session is doing, and the check
//! still runs to `Complete`.

use crate::checker::traits::{CheckOutcome, SessionFactory};
use crate::config::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_KEX_TIMEOUT_MS};
use crate::error::{CheckError, CheckResult};
use crate::types::Target;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Where a check is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    NotStarted,
    Connecting,
    Authenticating,
    Complete,
}

type CompletionHook = Box<dyn Fn(&TargetCheck) + Send + Sync>;

#[derive(Debug)]
struct CheckState {
    phase: CheckPhase,
    authenticated: bool,
    error: Option<Arc<CheckError>>,
}

/// One login attempt for one target.
pub struct TargetCheck {
    target: Target,
    factory: Arc<dyn SessionFactory>,
    connect_timeout: Duration,
    kex_timeout: Duration,
    cancel: CancellationToken,
    state: Mutex<CheckState>,
    on_complete: Option<CompletionHook>,
}

impl TargetCheck {
    pub fn new(target: Target, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            target,
            factory,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            kex_timeout: Duration::from_millis(DEFAULT_KEX_TIMEOUT_MS),
            cancel: CancellationToken::new(),
            state: Mutex::new(CheckState {
                phase: CheckPhase::NotStarted,
                authenticated: false,
                error: None,
            }),
            on_complete: None,
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, kex_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.kex_timeout = kex_timeout;
        self
    }

    /// Use `token` as this check's stop signal.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run `hook` once the check reaches `Complete`, stopped or not.
    pub fn on_complete(mut self, hook: impl Fn(&TargetCheck) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn phase(&self) -> CheckPhase {
        self.lock().phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == CheckPhase::Complete
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the check. Safe to call at any time, from any task.
    pub fn stop_check(&self) {
        self.cancel.cancel();
    }

    /// Whether the credentials worked. Fails until the check is complete.
    pub fn is_on(&self) -> CheckResult<bool> {
        let state = self.lock();
        if state.phase != CheckPhase::Complete {
            return Err(CheckError::NotChecked);
        }
        Ok(state.authenticated)
    }

    /// The error the attempt ended with, if any.
    pub fn error(&self) -> Option<Arc<CheckError>> {
        self.lock().error.clone()
    }

    /// How the run should report this check, once it is complete.
    pub fn outcome(&self) -> Option<CheckOutcome> {
        let state = self.lock();
        if state.phase != CheckPhase::Complete {
            return None;
        }
        Some(if self.is_stopped() {
            CheckOutcome::Discarded
        } else if let Some(e) = &state.error {
            CheckOutcome::Error(e.clone())
        } else if state.authenticated {
            CheckOutcome::On
        } else {
            CheckOutcome::Off
        })
    }

    /// Run the check on a new task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let check = Arc::clone(self);
        tokio::spawn(async move { check.run().await })
    }

    /// Run the check on the current task. Later calls are no-ops.
    pub async fn run(&self) {
        {
            let mut state = self.lock();
            if state.phase != CheckPhase::NotStarted {
                return;
            }
            state.phase = CheckPhase::Connecting;
        }

        trace!(host = %self.target.host, port = self.target.port, "checking target");
        let mut session = self.factory.open(&self.target, self.cancel.clone());
        let result = async {
            session
                .establish(self.connect_timeout, self.kex_timeout)
                .await?;
            self.lock().phase = CheckPhase::Authenticating;
            let authenticated = session
                .authenticate(&self.target.user, &self.target.pass)
                .await?;
            Ok::<_, CheckError>(authenticated)
        }
        .await;
        session.shutdown().await;

        {
            let mut state = self.lock();
            match result {
                Ok(authenticated) => state.authenticated = authenticated,
                Err(e) => {
                    debug!(host = %self.target.host, port = self.target.port, error = %e, "check failed");
                    state.error = Some(Arc::new(e));
                }
            }
            state.phase = CheckPhase::Complete;
        }

        if let Some(hook) = &self.on_complete {
            hook(self);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CheckState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TargetCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetCheck")
            .field("target", &self.target)
            .field("state", &*self.lock())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::testing::FakeFactory;
    use crate::checker::traits::OutcomeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn check(pass: &str, factory: &Arc<FakeFactory>) -> TargetCheck {
        TargetCheck::new(Target::new("10.0.0.1", 22, "root", pass), factory.clone())
    }

    #[tokio::test]
    async fn test_accepted_credentials() {
        let factory = Arc::new(FakeFactory::new());
        let check = check("good", &factory);

        check.run().await;
        assert!(check.is_on().unwrap());
        assert_eq!(check.outcome().unwrap().kind(), OutcomeKind::On);
        assert_eq!(factory.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let factory = Arc::new(FakeFactory::new());
        let check = check("bad", &factory);

        check.run().await;
        assert!(!check.is_on().unwrap());
        assert!(check.error().is_none());
        assert_eq!(check.outcome().unwrap().kind(), OutcomeKind::Off);
    }

    #[tokio::test]
    async fn test_failed_connect_is_error() {
        let factory = Arc::new(FakeFactory::new());
        let check = check("error", &factory);

        check.run().await;
        assert!(check.error().is_some());
        assert_eq!(check.outcome().unwrap().kind(), OutcomeKind::Error);
        // The session is released on the error path too.
        assert_eq!(factory.shutdowns(), 1);
    }

    #[test]
    fn test_is_on_before_completion() {
        let factory = Arc::new(FakeFactory::new());
        let check = check("good", &factory);

        let err = check.is_on().unwrap_err();
        assert_eq!(err.to_string(), "target not yet checked");
        assert!(check.outcome().is_none());
        assert_eq!(check.phase(), CheckPhase::NotStarted);
    }

    #[tokio::test]
    async fn test_stop_during_handshake() {
        let factory = Arc::new(FakeFactory::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let hook_count = fired.clone();
        let check = Arc::new(check("hang", &factory).on_complete(move |c| {
            assert!(c.is_complete());
            hook_count.fetch_add(1, Ordering::SeqCst);
        }));

        let handle = check.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(check.phase(), CheckPhase::Connecting);
        check.stop_check();
        handle.await.unwrap();

        assert!(check.is_stopped());
        assert!(check.is_complete());
        assert_eq!(check.outcome().unwrap().kind(), OutcomeKind::Discarded);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(factory.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_run_only_once() {
        let factory = Arc::new(FakeFactory::new());
        let check = check("good", &factory);

        check.run().await;
        check.run().await;
        assert_eq!(factory.opened(), 1);
    }
}
