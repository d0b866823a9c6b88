//! In-memory transport that plays a scripted SSH server.
//!
//! Replies are pushed to the registered handler from a separate receiver
//! task, the same way a real engine delivers them.

use crate::error::{CheckError, CheckResult};
use crate::ssh::message::{AuthMessage, AuthMethod, SERVICE_USERAUTH};
use crate::ssh::transport::{
    ConnectionInfo, HostKeyVerifier, MessageHandler, Transport, TransportFactory,
};
use crate::types::ProxyAddr;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How the scripted server behaves during the initial key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexBehavior {
    Complete,
    CompleteAfter(Duration),
    /// Never finishes; only closing the transport ends `initialize`.
    Hang,
    /// The TCP connect is refused.
    Refuse,
}

/// What the scripted server says.
#[derive(Debug, Clone)]
pub struct ServerScript {
    methods: Vec<String>,
    password: Option<String>,
    none_accepted: bool,
    partial_success: bool,
    banner: Option<String>,
    flood: usize,
    silent: bool,
    kex: KexBehavior,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            methods: vec!["publickey".to_string(), "password".to_string()],
            password: None,
            none_accepted: false,
            partial_success: false,
            banner: None,
            flood: 0,
            silent: false,
            kex: KexBehavior::Complete,
        }
    }
}

impl ServerScript {
    /// A server that accepts exactly `password`.
    pub fn accepting(password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            ..Self::default()
        }
    }

    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn accepting_none(mut self) -> Self {
        self.none_accepted = true;
        self
    }

    /// Failed password attempts carry the partial-success flag.
    pub fn with_partial_success(mut self) -> Self {
        self.partial_success = true;
        self
    }

    pub fn with_banner(mut self, banner: &str) -> Self {
        self.banner = Some(banner.to_string());
        self
    }

    /// Follow the service accept with `count` junk banners in one burst.
    pub fn flooding(mut self, count: usize) -> Self {
        self.flood = count;
        self
    }

    /// Never answer anything.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn with_kex(mut self, kex: KexBehavior) -> Self {
        self.kex = kex;
        self
    }

    fn replies(&self, msg: &AuthMessage) -> Vec<AuthMessage> {
        if self.silent {
            return Vec::new();
        }

        match msg {
            AuthMessage::ServiceRequest { service } if service == SERVICE_USERAUTH => {
                let mut out = vec![AuthMessage::ServiceAccept {
                    service: service.clone(),
                }];
                out.extend((0..self.flood).map(|i| AuthMessage::UserauthBanner {
                    message: format!("junk {i}"),
                    language: String::new(),
                }));
                out
            }
            AuthMessage::UserauthRequest {
                method: AuthMethod::None,
                ..
            } => {
                let mut out = Vec::new();
                if let Some(banner) = &self.banner {
                    out.push(AuthMessage::UserauthBanner {
                        message: banner.clone(),
                        language: "en".to_string(),
                    });
                }
                out.push(if self.none_accepted {
                    AuthMessage::UserauthSuccess
                } else {
                    self.failure(false)
                });
                out
            }
            AuthMessage::UserauthRequest {
                method: AuthMethod::Password { password },
                ..
            } => {
                if self.password.as_deref() == Some(password.as_str()) {
                    vec![AuthMessage::UserauthSuccess]
                } else {
                    vec![self.failure(self.partial_success)]
                }
            }
            _ => Vec::new(),
        }
    }

    fn failure(&self, partial_success: bool) -> AuthMessage {
        AuthMessage::UserauthFailure {
            methods: self.methods.clone(),
            partial_success,
        }
    }
}

struct Shared {
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Shared {
    fn shut(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let handler = self.handler.lock().unwrap().take();
        if let Some(handler) = handler {
            handler.handle_close();
        }
    }
}

/// A transport whose peer is a [`ServerScript`].
pub struct ScriptedTransport {
    script: ServerScript,
    host: String,
    port: u16,
    proxy: Option<ProxyAddr>,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    sent: Mutex<Vec<AuthMessage>>,
    key_exchanges: AtomicUsize,
}

impl ScriptedTransport {
    /// Must be called inside a tokio runtime.
    pub fn new(script: ServerScript) -> Arc<Self> {
        Self::with_endpoint(script, "127.0.0.1", 22, None)
    }

    pub fn with_endpoint(
        script: ServerScript,
        host: &str,
        port: u16,
        proxy: Option<ProxyAddr>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        let (outbound, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(shared.clone(), rx));

        Arc::new(Self {
            script,
            host: host.to_string(),
            port,
            proxy,
            shared,
            outbound,
            sent: Mutex::new(Vec::new()),
            key_exchanges: AtomicUsize::new(0),
        })
    }

    /// Every message the client sent, decoded.
    pub fn sent(&self) -> Vec<AuthMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn has_handler(&self) -> bool {
        self.shared.handler.lock().unwrap().is_some()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Completed key exchanges, the initial one included.
    pub fn key_exchanges(&self) -> usize {
        self.key_exchanges.load(Ordering::Acquire)
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            server_version: Some("SSH-2.0-Scripted_1.0".to_string()),
            host_key_algorithm: Some("ssh-ed25519".to_string()),
            host_key_fingerprint: Some("SHA256:scripted".to_string()),
            proxy: self.proxy.clone(),
        }
    }
}

async fn deliver(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Vec<Vec<u8>>>) {
    'recv: loop {
        let batch = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            batch = rx.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };
        for payload in batch {
            let handler = shared.handler.lock().unwrap().clone();
            let Some(handler) = handler else {
                continue;
            };
            if handler.handle_message(&payload).is_err() {
                shared.shut();
                break 'recv;
            }
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn initialize(
        &self,
        verifier: Option<Arc<dyn HostKeyVerifier>>,
        _connect_timeout: Duration,
    ) -> CheckResult<ConnectionInfo> {
        if self.is_closed() {
            return Err(CheckError::ConnectionClosed);
        }

        match self.script.kex {
            KexBehavior::Complete => {}
            KexBehavior::CompleteAfter(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shared.shutdown.cancelled() => return Err(CheckError::ConnectionClosed),
                }
            }
            KexBehavior::Hang => {
                self.shared.shutdown.cancelled().await;
                return Err(CheckError::ConnectionClosed);
            }
            KexBehavior::Refuse => {
                self.shared.shut();
                return Err(CheckError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
        }

        let info = self.info();
        if let Some(verifier) = verifier {
            let algorithm = info.host_key_algorithm.as_deref().unwrap_or_default();
            let fingerprint = info.host_key_fingerprint.as_deref().unwrap_or_default();
            if !verifier.verify(&self.host, self.port, algorithm, fingerprint) {
                self.shared.shut();
                return Err(CheckError::Protocol("host key rejected".to_string()));
            }
        }

        self.key_exchanges.fetch_add(1, Ordering::AcqRel);
        Ok(info)
    }

    async fn force_key_exchange(&self) -> CheckResult<()> {
        if self.is_closed() {
            return Err(CheckError::ConnectionClosed);
        }
        self.key_exchanges.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        (self.key_exchanges() > 0).then(|| self.info())
    }

    async fn send_message(&self, payload: &[u8]) -> CheckResult<()> {
        if self.is_closed() {
            return Err(CheckError::ConnectionClosed);
        }
        let msg = AuthMessage::decode(payload)?;
        let replies = self.script.replies(&msg);
        self.sent.lock().unwrap().push(msg);

        if !replies.is_empty() {
            let batch = replies.iter().map(AuthMessage::encode).collect();
            let _ = self.outbound.send(batch);
        }
        Ok(())
    }

    fn register_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.shared.handler.lock().unwrap() = Some(handler);
    }

    fn remove_handler(&self) {
        self.shared.handler.lock().unwrap().take();
    }

    async fn close(&self) {
        self.shared.shut();
    }

    fn close_hard(&self) {
        self.shared.shut();
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Hands out [`ScriptedTransport`]s and remembers them.
pub struct ScriptedFactory {
    default_script: ServerScript,
    per_host: HashMap<String, ServerScript>,
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedFactory {
    pub fn new(script: ServerScript) -> Self {
        Self {
            default_script: script,
            per_host: HashMap::new(),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Use `script` for connections to `host`.
    pub fn with_host(mut self, host: &str, script: ServerScript) -> Self {
        self.per_host.insert(host.to_string(), script);
        self
    }

    pub fn created(&self) -> Vec<Arc<ScriptedTransport>> {
        self.created.lock().unwrap().clone()
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, host: &str, port: u16, proxy: Option<&ProxyAddr>) -> Arc<dyn Transport> {
        let script = self
            .per_host
            .get(host)
            .unwrap_or(&self.default_script)
            .clone();
        let transport = ScriptedTransport::with_endpoint(script, host, port, proxy.cloned());
        self.created.lock().unwrap().push(transport.clone());
        transport
    }
}
