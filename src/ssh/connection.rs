//! Client connection lifecycle.
//!
//! A [`Connection`] owns one transport for one check attempt: connect with a
//! key-exchange deadline, authenticate with a password, close. Closing resets
//! the state so a fresh [`Connection::connect`] would be possible, but callers
//! never reuse a connection across targets.

use crate::config::DEFAULT_FLOOD_THRESHOLD;
use crate::error::{CheckError, CheckResult, TimeoutPhase};
use crate::ssh::auth::AuthSession;
use crate::ssh::transport::{ConnectionInfo, HostKeyVerifier, Transport, TransportFactory};
use crate::types::ProxyAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Terminal result of the initial key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum KexOutcome {
    Pending = 0,
    Completed = 1,
    TimedOut = 2,
}

/// Single-assignment cell deciding the race between the handshake and its
/// deadline timer. The first claim wins; later claims are no-ops.
#[derive(Debug)]
struct OutcomeCell(AtomicU8);

impl OutcomeCell {
    fn new() -> Self {
        Self(AtomicU8::new(KexOutcome::Pending as u8))
    }

    fn claim(&self, outcome: KexOutcome) -> bool {
        self.0
            .compare_exchange(
                KexOutcome::Pending as u8,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// An SSH client connection to one endpoint.
pub struct Connection {
    hostname: String,
    port: u16,
    proxy: Option<ProxyAddr>,
    factory: Arc<dyn TransportFactory>,
    verifier: Option<Arc<dyn HostKeyVerifier>>,
    transport: Option<Arc<dyn Transport>>,
    auth: Option<AuthSession>,
    authenticated: bool,
    flood_threshold: usize,
    cancel: CancellationToken,
}

impl Connection {
    /// Prepare a connection. Nothing touches the network until
    /// [`Connection::connect`].
    pub fn new(hostname: impl Into<String>, port: u16, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            proxy: None,
            factory,
            verifier: None,
            transport: None,
            auth: None,
            authenticated: false,
            flood_threshold: DEFAULT_FLOOD_THRESHOLD,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_proxy(mut self, proxy: Option<ProxyAddr>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Host key verifier used by the [`Session`](crate::checker::Session)
    /// entry point.
    pub fn with_verifier(mut self, verifier: Option<Arc<dyn HostKeyVerifier>>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_flood_threshold(mut self, threshold: usize) -> Self {
        self.flood_threshold = threshold;
        self
    }

    /// Cancelling `token` aborts any in-flight connect or authentication and
    /// hard-closes the transport.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn verifier(&self) -> Option<Arc<dyn HostKeyVerifier>> {
        self.verifier.clone()
    }

    /// Open the transport and finish the initial key exchange.
    ///
    /// `connect_timeout` bounds the TCP connect only. A non-zero
    /// `kex_timeout` arms a timer that hard-closes the transport if the key
    /// exchange has not finished in time; the caller then sees
    /// [`CheckError::ConnectTimeout`], never a generic I/O error.
    pub async fn connect(
        &mut self,
        verifier: Option<Arc<dyn HostKeyVerifier>>,
        connect_timeout: Duration,
        kex_timeout: Duration,
    ) -> CheckResult<ConnectionInfo> {
        if self.transport.is_some() {
            return Err(CheckError::AlreadyConnected {
                host: self.hostname.clone(),
                port: self.port,
            });
        }
        if self.cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }

        debug!(host = %self.hostname, port = self.port, "connecting");
        let transport = self
            .factory
            .create(&self.hostname, self.port, self.proxy.as_ref());
        self.transport = Some(transport.clone());

        let outcome = Arc::new(OutcomeCell::new());
        let timer = (!kex_timeout.is_zero()).then(|| {
            let outcome = outcome.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                tokio::time::sleep(kex_timeout).await;
                if outcome.claim(KexOutcome::TimedOut) {
                    trace!("key exchange deadline passed");
                    transport.close_hard();
                }
            })
        });

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            result = transport.initialize(verifier, connect_timeout) => result,
            _ = cancel.cancelled() => Err(CheckError::Cancelled),
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        if !outcome.claim(KexOutcome::Completed) {
            self.close_hard();
            return Err(CheckError::ConnectTimeout {
                phase: TimeoutPhase::KeyExchange,
                after: kex_timeout,
            });
        }

        match result {
            Ok(info) => {
                debug!(
                    host = %self.hostname,
                    port = self.port,
                    server = info.server_version.as_deref().unwrap_or("unknown"),
                    "key exchange complete"
                );
                Ok(info)
            }
            Err(e) => {
                self.close_hard();
                Err(e)
            }
        }
    }

    /// Try a password login.
    ///
    /// Returns `Ok(false)` when the server refuses the credentials, asks for a
    /// further step, or does not offer password authentication at all.
    /// [`Connection::remaining_methods`] and
    /// [`Connection::is_partial_success`] then tell what the server wants.
    pub async fn authenticate_password(&mut self, user: &str, pass: &str) -> CheckResult<bool> {
        let Some(transport) = self.transport.clone() else {
            return Err(CheckError::NotConnected);
        };
        if self.authenticated {
            return Err(CheckError::AlreadyAuthenticated);
        }

        let threshold = self.flood_threshold;
        let auth = self
            .auth
            .get_or_insert_with(|| AuthSession::with_flood_threshold(transport, threshold));
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            result = auth.authenticate_password(user, pass) => result,
            _ = cancel.cancelled() => Err(CheckError::Cancelled),
        };

        match result {
            Ok(authenticated) => {
                self.authenticated = authenticated;
                Ok(authenticated)
            }
            Err(CheckError::AuthUnsupported { offered, .. }) => {
                debug!(host = %self.hostname, ?offered, "server does not offer password authentication");
                Ok(false)
            }
            Err(e) => {
                self.close_hard();
                Err(e)
            }
        }
    }

    /// Like [`Connection::authenticate_password`], but a refusal is an error.
    pub async fn login(&mut self, user: &str, pass: &str) -> CheckResult<()> {
        if self.authenticate_password(user, pass).await? {
            Ok(())
        } else {
            Err(CheckError::AuthRejected {
                partial_success: self.is_partial_success(),
            })
        }
    }

    /// Ask the server which methods it accepts for `user`.
    pub async fn remaining_auth_methods(&mut self, user: &str) -> CheckResult<Vec<String>> {
        let Some(transport) = self.transport.clone() else {
            return Err(CheckError::NotConnected);
        };
        let threshold = self.flood_threshold;
        let auth = self
            .auth
            .get_or_insert_with(|| AuthSession::with_flood_threshold(transport, threshold));
        let methods = auth.remaining_methods_for(user).await?.to_vec();
        Ok(methods)
    }

    /// Start a new key exchange on the open transport.
    pub async fn force_key_exchange(&self) -> CheckResult<()> {
        match &self.transport {
            Some(transport) => transport.force_key_exchange().await,
            None => Err(CheckError::NotConnected),
        }
    }

    /// Methods listed in the server's last failure reply.
    pub fn remaining_methods(&self) -> &[String] {
        self.auth
            .as_ref()
            .map(AuthSession::remaining_methods)
            .unwrap_or_default()
    }

    pub fn is_partial_success(&self) -> bool {
        self.auth.as_ref().is_some_and(AuthSession::partial_success)
    }

    /// The last authentication banner the server sent.
    pub fn banner(&self) -> Option<&str> {
        self.auth.as_ref().and_then(AuthSession::banner)
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.transport.as_ref().and_then(|t| t.connection_info())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| !t.is_closed())
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Graceful close. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.reset();
    }

    /// Immediate close. Safe to call more than once.
    pub fn close_hard(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close_hard();
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.auth = None;
        self.authenticated = false;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close_hard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::{KexBehavior, ScriptedFactory, ServerScript};
    use std::time::Instant;

    const CONNECT: Duration = Duration::from_secs(10);
    const KEX: Duration = Duration::from_secs(15);

    fn connection(script: ServerScript) -> (Arc<ScriptedFactory>, Connection) {
        let factory = Arc::new(ScriptedFactory::new(script));
        let conn = Connection::new("10.0.0.5", 2222, factory.clone());
        (factory, conn)
    }

    #[test]
    fn test_outcome_cell_single_winner() {
        let cell = OutcomeCell::new();
        assert!(cell.claim(KexOutcome::TimedOut));
        assert!(!cell.claim(KexOutcome::Completed));
        assert!(!cell.claim(KexOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_connect_and_login() {
        let (factory, mut conn) = connection(ServerScript::accepting("secret"));

        let info = conn.connect(None, CONNECT, KEX).await.unwrap();
        assert_eq!(info.host_key_algorithm.as_deref(), Some("ssh-ed25519"));
        assert!(conn.authenticate_password("bob", "secret").await.unwrap());
        assert!(conn.is_authenticated());

        let created = factory.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].port(), 2222);
    }

    #[tokio::test]
    async fn test_kex_timeout_against_silent_server() {
        let (factory, mut conn) = connection(ServerScript::default().with_kex(KexBehavior::Hang));

        let started = Instant::now();
        let err = conn
            .connect(None, CONNECT, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(err.is_timeout(), "unexpected error {err}");
        assert!(matches!(
            err,
            CheckError::ConnectTimeout {
                phase: TimeoutPhase::KeyExchange,
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(factory.created()[0].is_closed());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_fast_kex_beats_timer() {
        let (factory, mut conn) = connection(
            ServerScript::default().with_kex(KexBehavior::CompleteAfter(Duration::from_millis(10))),
        );

        conn.connect(None, CONNECT, Duration::from_millis(500))
            .await
            .unwrap();
        // Give a stray timer the chance to fire.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!factory.created()[0].is_closed());
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_zero_kex_timeout_disables_timer() {
        let (_factory, mut conn) = connection(
            ServerScript::default().with_kex(KexBehavior::CompleteAfter(Duration::from_millis(20))),
        );
        conn.connect(None, CONNECT, Duration::ZERO).await.unwrap();
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_twice() {
        let (_factory, mut conn) = connection(ServerScript::default());
        conn.connect(None, CONNECT, KEX).await.unwrap();
        let err = conn.connect(None, CONNECT, KEX).await.unwrap_err();
        assert!(matches!(err, CheckError::AlreadyConnected { port: 2222, .. }));
    }

    #[tokio::test]
    async fn test_refused_connect_is_io_error() {
        let (_factory, mut conn) = connection(ServerScript::default().with_kex(KexBehavior::Refuse));
        let err = conn.connect(None, CONNECT, KEX).await.unwrap_err();
        assert!(matches!(err, CheckError::Io(_)));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_rejecting_verifier() {
        struct RejectAll;
        impl HostKeyVerifier for RejectAll {
            fn verify(&self, _: &str, _: u16, _: &str, _: &str) -> bool {
                false
            }
        }

        let (_factory, mut conn) = connection(ServerScript::default());
        let err = conn
            .connect(Some(Arc::new(RejectAll)), CONNECT, KEX)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_authenticate_requires_connect() {
        let (_factory, mut conn) = connection(ServerScript::accepting("pw"));
        let err = conn.authenticate_password("bob", "pw").await.unwrap_err();
        assert!(matches!(err, CheckError::NotConnected));
        assert!(matches!(
            conn.force_key_exchange().await,
            Err(CheckError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_authenticate_twice() {
        let (_factory, mut conn) = connection(ServerScript::accepting("pw"));
        conn.connect(None, CONNECT, KEX).await.unwrap();
        assert!(conn.authenticate_password("bob", "pw").await.unwrap());
        let err = conn.authenticate_password("bob", "pw").await.unwrap_err();
        assert!(matches!(err, CheckError::AlreadyAuthenticated));
    }

    #[tokio::test]
    async fn test_publickey_only_returns_false() {
        let (_factory, mut conn) =
            connection(ServerScript::default().with_methods(&["publickey"]));
        conn.connect(None, CONNECT, KEX).await.unwrap();

        assert!(!conn.authenticate_password("bob", "pw").await.unwrap());
        assert_eq!(conn.remaining_methods(), ["publickey"]);
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let (_factory, mut conn) = connection(ServerScript::accepting("right"));
        conn.connect(None, CONNECT, KEX).await.unwrap();

        let err = conn.login("bob", "wrong").await.unwrap_err();
        assert!(matches!(
            err,
            CheckError::AuthRejected {
                partial_success: false
            }
        ));
    }

    #[tokio::test]
    async fn test_remaining_auth_methods_and_banner() {
        let (_factory, mut conn) = connection(
            ServerScript::accepting("pw").with_banner("Welcome"),
        );
        conn.connect(None, CONNECT, KEX).await.unwrap();

        let methods = conn.remaining_auth_methods("bob").await.unwrap();
        assert_eq!(methods, vec!["publickey", "password"]);
        assert_eq!(conn.banner(), Some("Welcome"));
    }

    #[tokio::test]
    async fn test_force_key_exchange() {
        let (factory, mut conn) = connection(ServerScript::default());
        conn.connect(None, CONNECT, KEX).await.unwrap();
        conn.force_key_exchange().await.unwrap();
        assert_eq!(factory.created()[0].key_exchanges(), 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_handshake() {
        let token = CancellationToken::new();
        let factory = Arc::new(ScriptedFactory::new(
            ServerScript::default().with_kex(KexBehavior::Hang),
        ));
        let mut conn = Connection::new("10.0.0.5", 22, factory.clone()).with_cancel(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = conn.connect(None, CONNECT, KEX).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(factory.created()[0].is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_resets() {
        let (factory, mut conn) = connection(ServerScript::accepting("pw"));
        conn.connect(None, CONNECT, KEX).await.unwrap();
        assert!(conn.authenticate_password("bob", "pw").await.unwrap());

        conn.close().await;
        conn.close().await;
        conn.close_hard();

        assert!(!conn.is_authenticated());
        assert!(conn.connection_info().is_none());
        assert!(factory.created()[0].is_closed());
        assert!(matches!(
            conn.authenticate_password("bob", "pw").await,
            Err(CheckError::NotConnected)
        ));
    }
}
