//! [`Session`] implementation over real SSH connections.

use crate::checker::{Session, SessionFactory};
use crate::config::DEFAULT_FLOOD_THRESHOLD;
use crate::error::CheckResult;
use crate::ssh::connection::Connection;
use crate::ssh::transport::{HostKeyVerifier, TransportFactory};
use crate::types::Target;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Opens one [`Connection`] per target.
pub struct SshSessionFactory {
    transports: Arc<dyn TransportFactory>,
    flood_threshold: usize,
    verifier: Option<Arc<dyn HostKeyVerifier>>,
}

impl SshSessionFactory {
    pub fn new(transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            transports,
            flood_threshold: DEFAULT_FLOOD_THRESHOLD,
            verifier: None,
        }
    }

    pub fn with_flood_threshold(mut self, threshold: usize) -> Self {
        self.flood_threshold = threshold;
        self
    }

    /// Check server host keys with `verifier`. Without one every key is
    /// accepted.
    pub fn with_verifier(mut self, verifier: Arc<dyn HostKeyVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

impl SessionFactory for SshSessionFactory {
    fn open(&self, target: &Target, cancel: CancellationToken) -> Box<dyn Session> {
        Box::new(
            Connection::new(&target.host, target.port, self.transports.clone())
                .with_proxy(target.proxy.clone())
                .with_verifier(self.verifier.clone())
                .with_flood_threshold(self.flood_threshold)
                .with_cancel(cancel),
        )
    }
}

#[async_trait]
impl Session for Connection {
    async fn establish(&mut self, connect_timeout: Duration, kex_timeout: Duration) -> CheckResult<()> {
        let verifier = self.verifier();
        self.connect(verifier, connect_timeout, kex_timeout).await?;
        Ok(())
    }

    async fn authenticate(&mut self, user: &str, pass: &str) -> CheckResult<bool> {
        self.authenticate_password(user, pass).await
    }

    async fn shutdown(&mut self) {
        self.close().await;
    }
}
