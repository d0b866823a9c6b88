//! Transport engine backed by `russh`.
//!
//! russh runs the key exchange and the user-auth protocol itself, so this
//! adapter translates at the message level: outbound auth requests become
//! `Handle::authenticate_*` calls, and their results are re-encoded as the
//! reply messages a server would have sent. A pump task owns the russh
//! handle and serves requests one at a time, which keeps replies in order
//! and delivers them from a task other than the caller's.

use crate::error::{CheckError, CheckResult, TimeoutPhase};
use crate::ssh::message::{AuthMessage, AuthMethod, SERVICE_USERAUTH};
use crate::ssh::transport::{
    ConnectionInfo, HostKeyVerifier, MessageHandler, Transport, TransportFactory,
};
use crate::types::ProxyAddr;
use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle, Handler};
use russh::keys::{HashAlg, PublicKey};
use russh::Disconnect;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, trace};

/// Upper bound on a proxy's response head.
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

/// How long a graceful close waits for the disconnect to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// russh drops a session that has been silent this long.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

/// State shared between the transport, the russh handler and the pump.
struct Shared {
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Shared {
    fn new() -> Self {
        Self {
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    fn deliver(&self, payload: &[u8]) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(handler) = handler else {
            trace!("no message handler registered, dropping message");
            return;
        };
        if let Err(e) = handler.handle_message(payload) {
            debug!(error = %e, "message handler rejected input, closing transport");
            self.shut();
        }
    }

    fn shut(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = handler {
            handler.handle_close();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Socket handed to russh. Once `shutdown` fires every read and write fails,
/// so the session task russh spawns ends and the socket is released even
/// while a handshake read is pending.
struct GuardedStream<S> {
    inner: S,
    token: CancellationToken,
    shutdown: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> GuardedStream<S> {
    fn new(inner: S, token: CancellationToken) -> Self {
        Self {
            shutdown: Box::pin(token.clone().cancelled_owned()),
            inner,
            token,
        }
    }

    /// Registers for the shutdown wakeup; fails once it has fired.
    fn poll_guard(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if self.token.is_cancelled() || self.shutdown.as_mut().poll(cx).is_ready() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "transport closed",
            ));
        }
        Ok(())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for GuardedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_guard(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for GuardedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_guard(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_guard(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Work for the pump task.
enum Request {
    /// Hand a synthesized reply to the message handler.
    Deliver(Vec<u8>),
    Authenticate { user: String, method: AuthMethod },
    Disconnect(oneshot::Sender<()>),
}

/// russh callbacks for one connection.
struct EngineHandler {
    host: String,
    port: u16,
    verifier: Option<Arc<dyn HostKeyVerifier>>,
    host_key: Arc<Mutex<Option<(String, String)>>>,
    shared: Arc<Shared>,
}

impl Handler for EngineHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let algorithm = server_public_key.algorithm().to_string();
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        trace!(host = %self.host, %algorithm, %fingerprint, "server host key");

        let accepted = self
            .verifier
            .as_ref()
            .is_none_or(|v| v.verify(&self.host, self.port, &algorithm, &fingerprint));
        *self
            .host_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((algorithm, fingerprint));
        Ok(accepted)
    }

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let msg = AuthMessage::UserauthBanner {
            message: banner.to_string(),
            language: String::new(),
        };
        self.shared.deliver(&msg.encode());
        Ok(())
    }
}

/// A [`Transport`] running the SSH protocol through `russh`.
pub struct RusshTransport {
    host: String,
    port: u16,
    proxy: Option<ProxyAddr>,
    config: Arc<client::Config>,
    shared: Arc<Shared>,
    requests: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    info: Mutex<Option<ConnectionInfo>>,
}

impl RusshTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        proxy: Option<ProxyAddr>,
        config: Arc<client::Config>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            proxy,
            config,
            shared: Arc::new(Shared::new()),
            requests: Mutex::new(None),
            info: Mutex::new(None),
        }
    }

    /// TCP connect, through the HTTP proxy when one is set.
    async fn open_stream(&self, connect_timeout: Duration) -> CheckResult<TcpStream> {
        let open = async {
            match &self.proxy {
                Some(proxy) => {
                    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;
                    http_connect(&mut stream, proxy, &self.host, self.port).await?;
                    Ok::<_, CheckError>(stream)
                }
                None => Ok(TcpStream::connect((self.host.as_str(), self.port)).await?),
            }
        };

        if connect_timeout.is_zero() {
            return open.await;
        }
        tokio::time::timeout(connect_timeout, open)
            .await
            .map_err(|_| CheckError::ConnectTimeout {
                phase: TimeoutPhase::Tcp,
                after: connect_timeout,
            })?
    }

    fn enqueue(&self, request: Request) -> CheckResult<()> {
        let requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        match requests.as_ref() {
            Some(tx) if !self.shared.is_closed() => {
                tx.send(request).map_err(|_| CheckError::ConnectionClosed)
            }
            _ => Err(CheckError::ConnectionClosed),
        }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn initialize(
        &self,
        verifier: Option<Arc<dyn HostKeyVerifier>>,
        connect_timeout: Duration,
    ) -> CheckResult<ConnectionInfo> {
        if self.shared.is_closed() {
            return Err(CheckError::ConnectionClosed);
        }

        let host_key = Arc::new(Mutex::new(None));
        let handler = EngineHandler {
            host: self.host.clone(),
            port: self.port,
            verifier,
            host_key: host_key.clone(),
            shared: self.shared.clone(),
        };

        let handshake = async {
            let stream = self.open_stream(connect_timeout).await?;
            let stream = GuardedStream::new(stream, self.shared.shutdown.clone());
            client::connect_stream(self.config.clone(), stream, handler)
                .await
                .map_err(engine_error)
        };

        let result = tokio::select! {
            result = handshake => result,
            _ = self.shared.shutdown.cancelled() => Err(CheckError::ConnectionClosed),
        };
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.shut();
                return Err(e);
            }
        };

        let (algorithm, fingerprint) = host_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unzip();
        let info = ConnectionInfo {
            server_version: None,
            host_key_algorithm: algorithm,
            host_key_fingerprint: fingerprint,
            proxy: self.proxy.clone(),
        };
        *self.info.lock().unwrap_or_else(PoisonError::into_inner) = Some(info.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        *self.requests.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        tokio::spawn(pump(handle, rx, self.shared.clone()));

        Ok(info)
    }

    async fn force_key_exchange(&self) -> CheckResult<()> {
        if self.shared.is_closed() {
            return Err(CheckError::ConnectionClosed);
        }
        Err(CheckError::Protocol(
            "key re-exchange not supported by this engine".to_string(),
        ))
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        self.info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn send_message(&self, payload: &[u8]) -> CheckResult<()> {
        let request = match AuthMessage::decode(payload)? {
            AuthMessage::ServiceRequest { service } if service == SERVICE_USERAUTH => {
                // russh requests the service itself on the first auth call.
                Request::Deliver(AuthMessage::ServiceAccept { service }.encode())
            }
            AuthMessage::UserauthRequest { user, method, .. } => {
                Request::Authenticate { user, method }
            }
            other => {
                return Err(CheckError::Protocol(format!(
                    "engine cannot send message type {}",
                    other.message_type()
                )))
            }
        };
        self.enqueue(request)
    }

    fn register_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self
            .shared
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn remove_handler(&self) {
        self.shared
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.enqueue(Request::Disconnect(done_tx)).is_ok() {
            let _ = tokio::time::timeout(DISCONNECT_GRACE, done_rx).await;
        }
        self.shared.shut();
    }

    fn close_hard(&self) {
        self.shared.shut();
    }

    fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Serves requests against the russh handle until shutdown.
async fn pump(
    mut handle: Handle<EngineHandler>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    shared: Arc<Shared>,
) {
    loop {
        let request = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match request {
            Request::Deliver(payload) => shared.deliver(&payload),
            Request::Authenticate { user, method } => {
                let result = tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    result = authenticate(&mut handle, user, method) => result,
                };
                match result {
                    Ok(reply) => shared.deliver(&reply.encode()),
                    Err(e) => {
                        debug!(error = %e, "authentication request failed");
                        shared.shut();
                        break;
                    }
                }
            }
            Request::Disconnect(done) => {
                if let Err(e) = handle.disconnect(Disconnect::ByApplication, "", "en").await {
                    trace!(error = %e, "disconnect failed");
                }
                let _ = done.send(());
                break;
            }
        }
    }
    trace!("transport pump stopped");
}

async fn authenticate(
    handle: &mut Handle<EngineHandler>,
    user: String,
    method: AuthMethod,
) -> Result<AuthMessage, russh::Error> {
    let result = match method {
        AuthMethod::None => handle.authenticate_none(user).await?,
        AuthMethod::Password { password } => handle.authenticate_password(user, password).await?,
    };
    Ok(match result {
        AuthResult::Success => AuthMessage::UserauthSuccess,
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => AuthMessage::UserauthFailure {
            methods: remaining_methods
                .iter()
                .map(|m| <&'static str>::from(m).to_string())
                .collect(),
            partial_success,
        },
    })
}

fn engine_error(e: russh::Error) -> CheckError {
    match e {
        russh::Error::IO(io) => CheckError::Io(io),
        other => CheckError::Protocol(other.to_string()),
    }
}

/// Open an HTTP `CONNECT` tunnel to `host:port` over `stream`.
///
/// Reads exactly the response head so no SSH bytes are consumed.
async fn http_connect<S>(stream: &mut S, proxy: &ProxyAddr, host: &str, port: u16) -> CheckResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let request = format!("CONNECT {authority} HTTP/1.0\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut head = Vec::with_capacity(128);
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_PROXY_RESPONSE {
            return Err(CheckError::Protocol(format!(
                "proxy {proxy} sent an oversized response"
            )));
        }
        head.push(stream.read_u8().await?);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some("200")) if version.starts_with("HTTP/") => {
            debug!(%proxy, target = %authority, "proxy tunnel established");
            Ok(())
        }
        _ => Err(CheckError::ProxyRefused {
            proxy: proxy.to_string(),
            status: status_line.to_string(),
        }),
    }
}

/// Creates [`RusshTransport`]s sharing one client configuration.
#[derive(Clone)]
pub struct RusshTransportFactory {
    config: Arc<client::Config>,
}

impl RusshTransportFactory {
    pub fn new() -> Self {
        Self::with_config(client::Config {
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            ..Default::default()
        })
    }

    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for RusshTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for RusshTransportFactory {
    fn create(&self, host: &str, port: u16, proxy: Option<&ProxyAddr>) -> Arc<dyn Transport> {
        Arc::new(RusshTransport::new(
            host,
            port,
            proxy.cloned(),
            self.config.clone(),
        ))
    }
}
