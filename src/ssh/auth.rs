//! Password authentication over the transport's message stream.
//!
//! The engine pushes inbound payloads from its receiver task into a bounded
//! channel; [`AuthSession`] awaits them as ordinary request/response calls.
//! The channel is the only hand-off point. Once the transport closes, or the
//! peer overruns the channel, the inbox reaches a terminal state and every
//! pending or future read fails instead of waiting forever.

use crate::config::DEFAULT_FLOOD_THRESHOLD;
use crate::error::{CheckError, CheckResult};
use crate::ssh::message::{
    peek_type, AuthMessage, SERVICE_USERAUTH, SSH_MSG_USERAUTH_BANNER,
};
use crate::ssh::transport::{MessageHandler, Transport};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

const INBOX_OPEN: u8 = 0;
const INBOX_CLOSED: u8 = 1;
const INBOX_FLOODED: u8 = 2;

/// Sending half of the auth channel, registered with the transport.
struct Inbox {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    state: AtomicU8,
}

impl Inbox {
    fn flood_error() -> CheckError {
        CheckError::Protocol("peer is flooding us with authentication messages".to_string())
    }

    fn is_flooded(&self) -> bool {
        self.state.load(Ordering::Acquire) == INBOX_FLOODED
    }
}

impl MessageHandler for Inbox {
    fn handle_message(&self, payload: &[u8]) -> CheckResult<()> {
        let mut tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = tx.as_ref() else {
            return if self.is_flooded() {
                Err(Self::flood_error())
            } else {
                Ok(())
            };
        };

        match sender.try_send(payload.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                // Queued messages stay readable; nothing new gets in.
                self.state.store(INBOX_FLOODED, Ordering::Release);
                *tx = None;
                warn!("authentication inbox overrun, dropping connection");
                Err(Self::flood_error())
            }
            Err(TrySendError::Closed(_)) => Ok(()),
        }
    }

    fn handle_close(&self) {
        let _ = self.state.compare_exchange(
            INBOX_OPEN,
            INBOX_CLOSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Drives the `ssh-userauth` service for one connection.
pub struct AuthSession {
    transport: Arc<dyn Transport>,
    inbox: Arc<Inbox>,
    rx: mpsc::Receiver<Vec<u8>>,
    remaining_methods: Vec<String>,
    partial_success: bool,
    init_done: bool,
    authenticated: bool,
    banner: Option<String>,
}

impl AuthSession {
    /// Create a session with the default flood threshold.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_flood_threshold(transport, DEFAULT_FLOOD_THRESHOLD)
    }

    /// Create a session that tolerates at most `threshold` undrained messages.
    pub fn with_flood_threshold(transport: Arc<dyn Transport>, threshold: usize) -> Self {
        let (tx, rx) = mpsc::channel(threshold.max(1));
        Self {
            transport,
            inbox: Arc::new(Inbox {
                tx: Mutex::new(Some(tx)),
                state: AtomicU8::new(INBOX_OPEN),
            }),
            rx,
            remaining_methods: Vec::new(),
            partial_success: false,
            init_done: false,
            authenticated: false,
            banner: None,
        }
    }

    /// Try to log in with a password.
    ///
    /// Returns `Ok(false)` when the server refuses the credentials or asks for
    /// another step; [`AuthSession::remaining_methods`] and
    /// [`AuthSession::partial_success`] then describe what the server wants.
    /// If the server does not offer `password` at all, the attempt fails
    /// locally with [`CheckError::AuthUnsupported`] and nothing is sent.
    /// Every other error tears the transport down.
    pub async fn authenticate_password(&mut self, user: &str, pass: &str) -> CheckResult<bool> {
        let result = self.try_password(user, pass).await;
        match &result {
            Err(CheckError::AuthUnsupported { .. }) | Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "password authentication failed");
                self.transport.close_hard();
            }
        }
        result
    }

    async fn try_password(&mut self, user: &str, pass: &str) -> CheckResult<bool> {
        if self.initialize(user).await? {
            return Ok(true);
        }

        if !self.method_possible("password") {
            return Err(CheckError::AuthUnsupported {
                method: "password".to_string(),
                offered: self.remaining_methods.clone(),
            });
        }

        self.send(&AuthMessage::password_request(user, pass))
            .await?;
        let reply = self.next_message().await?;
        self.handle_reply(reply)
    }

    /// Methods the server will accept for `user`, running the `none` probe
    /// first if it has not happened yet.
    pub async fn remaining_methods_for(&mut self, user: &str) -> CheckResult<&[String]> {
        self.initialize(user).await?;
        Ok(&self.remaining_methods)
    }

    /// Methods the server listed in its last failure reply.
    pub fn remaining_methods(&self) -> &[String] {
        &self.remaining_methods
    }

    /// Whether the last failure reply carried the partial-success flag.
    pub fn partial_success(&self) -> bool {
        self.partial_success
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The last banner the server sent during authentication.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Request the auth service and probe with the `none` method. Runs once;
    /// later calls return the memoized result.
    async fn initialize(&mut self, user: &str) -> CheckResult<bool> {
        if self.init_done {
            return Ok(self.authenticated);
        }

        self.transport.register_handler(self.inbox.clone());

        self.send(&AuthMessage::service_request(SERVICE_USERAUTH))
            .await?;
        self.send(&AuthMessage::none_request(user)).await?;

        match self.next_message().await? {
            AuthMessage::ServiceAccept { .. } => {}
            other => {
                return Err(CheckError::Protocol(format!(
                    "expected service accept, got message type {}",
                    other.message_type()
                )))
            }
        }

        let reply = self.next_message().await?;
        self.init_done = true;
        self.handle_reply(reply)
    }

    fn handle_reply(&mut self, reply: AuthMessage) -> CheckResult<bool> {
        match reply {
            AuthMessage::UserauthSuccess => {
                self.authenticated = true;
                self.transport.remove_handler();
                Ok(true)
            }
            AuthMessage::UserauthFailure {
                methods,
                partial_success,
            } => {
                trace!(?methods, partial_success, "server refused authentication");
                self.remaining_methods = methods;
                self.partial_success = partial_success;
                Ok(false)
            }
            other => Err(CheckError::Protocol(format!(
                "unexpected SSH message (type {})",
                other.message_type()
            ))),
        }
    }

    fn method_possible(&self, method: &str) -> bool {
        self.remaining_methods.iter().any(|m| m == method)
    }

    async fn send(&self, msg: &AuthMessage) -> CheckResult<()> {
        self.transport.send_message(&msg.encode()).await
    }

    /// Next substantive message, recording banners on the way.
    async fn next_message(&mut self) -> CheckResult<AuthMessage> {
        loop {
            let payload = self.dequeue().await?;
            if peek_type(&payload) == Some(SSH_MSG_USERAUTH_BANNER) {
                if let AuthMessage::UserauthBanner { message, .. } = AuthMessage::decode(&payload)? {
                    trace!(len = message.len(), "received authentication banner");
                    self.banner = Some(message);
                }
                continue;
            }
            return AuthMessage::decode(&payload);
        }
    }

    async fn dequeue(&mut self) -> CheckResult<Vec<u8>> {
        match self.rx.recv().await {
            Some(payload) => Ok(payload),
            None if self.inbox.is_flooded() => Err(Inbox::flood_error()),
            None => Err(CheckError::ConnectionClosed),
        }
    }
}
