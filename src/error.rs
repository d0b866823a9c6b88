//! Error types for sshsweep.
//!
//! Uses `thiserror` for ergonomic error definitions.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::TargetError;

/// Error type for a single connection or authentication attempt.
///
/// Every variant except [`CheckError::Cancelled`] ends up in the error bucket
/// of a check run. Cancellation is never reported as a result.
#[derive(Error, Debug)]
pub enum CheckError {
    /// TCP connect or key exchange exceeded its budget.
    #[error("{phase} timed out after {}ms", .after.as_millis())]
    ConnectTimeout { phase: TimeoutPhase, after: Duration },

    /// Malformed or unexpected message, or a misbehaving peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credentials were refused by the server.
    #[error("authentication rejected (partial success: {partial_success})")]
    AuthRejected { partial_success: bool },

    /// The requested method is not offered by the server at this stage.
    #[error("authentication method {method} not supported by the server (offered: {offered:?})")]
    AuthUnsupported { method: String, offered: Vec<String> },

    /// The attempt was stopped by the user.
    #[error("check cancelled")]
    Cancelled,

    #[error("connection to {host}:{port} is already established")]
    AlreadyConnected { host: String, port: u16 },

    #[error("not connected")]
    NotConnected,

    #[error("connection is already authenticated")]
    AlreadyAuthenticated,

    #[error("the connection is closed")]
    ConnectionClosed,

    #[error("proxy {proxy} refused the tunnel: {status}")]
    ProxyRefused { proxy: String, status: String },

    #[error("target not yet checked")]
    NotChecked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckError {
    /// Whether this error is a connect or key-exchange timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. })
    }

    /// Whether this error represents a user-initiated stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Which phase of connection establishment ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Opening the TCP socket (directly or through a proxy).
    Tcp,
    /// Initial key exchange after the socket was opened.
    KeyExchange,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP connect"),
            Self::KeyExchange => write!(f, "key exchange"),
        }
    }
}

/// Result type alias for connection and check operations.
pub type CheckResult<T> = Result<T, CheckError>;

/// Error type for checker configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error type for CLI operations.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("target error: {0}")]
    Target(#[from] TargetError),

    #[error("failed to read {path}: {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;
