//! Transport engine abstraction.
//!
//! The engine owns the socket, key exchange and packet encryption. The rest of
//! the client only sees unencrypted message payloads: it sends them with
//! [`Transport::send_message`] and receives them through a registered
//! [`MessageHandler`], which the engine calls from its own receiver task.

use crate::error::CheckResult;
use crate::types::ProxyAddr;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Receives inbound messages from the engine's receiver task.
///
/// Implementations must not block: they are called while the engine is
/// dispatching. Returning an error tells the engine the peer misbehaved and
/// the transport must be torn down.
pub trait MessageHandler: Send + Sync {
    /// Called once per inbound message payload.
    fn handle_message(&self, payload: &[u8]) -> CheckResult<()>;

    /// Called when the transport closes for any reason.
    fn handle_close(&self);
}

/// Decides whether a server host key is acceptable.
pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, host: &str, port: u16, algorithm: &str, fingerprint: &str) -> bool;
}

/// Accepts every host key. Credential checking does not pin keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyHostKey;

impl HostKeyVerifier for AcceptAnyHostKey {
    fn verify(&self, _host: &str, _port: u16, _algorithm: &str, _fingerprint: &str) -> bool {
        true
    }
}

/// Details about an established transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Server identification string, when the engine exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// Host key algorithm offered by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key_algorithm: Option<String>,
    /// SHA-256 fingerprint of the server host key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,
    /// Proxy the connection was tunnelled through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyAddr>,
}

/// An SSH transport engine bound to one remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the socket and run the initial key exchange.
    ///
    /// `connect_timeout` bounds only the TCP (or proxy) connect. Returns once
    /// the first key exchange completed, or with an error once the transport
    /// was closed.
    async fn initialize(
        &self,
        verifier: Option<Arc<dyn HostKeyVerifier>>,
        connect_timeout: Duration,
    ) -> CheckResult<ConnectionInfo>;

    /// Start a new key exchange on an established transport.
    async fn force_key_exchange(&self) -> CheckResult<()>;

    /// Details recorded during [`Transport::initialize`].
    fn connection_info(&self) -> Option<ConnectionInfo>;

    /// Queue an unencrypted message payload for sending.
    async fn send_message(&self, payload: &[u8]) -> CheckResult<()>;

    /// Route inbound messages to `handler`, replacing any previous handler.
    fn register_handler(&self, handler: Arc<dyn MessageHandler>);

    /// Stop routing inbound messages.
    fn remove_handler(&self);

    /// Graceful teardown: say goodbye to the peer, then close.
    async fn close(&self);

    /// Immediate teardown. Must be callable from any task, including while
    /// another task is blocked in [`Transport::initialize`].
    fn close_hard(&self);

    /// Whether the transport has been closed.
    fn is_closed(&self) -> bool;
}

/// Creates transports for connection attempts.
pub trait TransportFactory: Send + Sync {
    fn create(&self, host: &str, port: u16, proxy: Option<&ProxyAddr>) -> Arc<dyn Transport>;
}
