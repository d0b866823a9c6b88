//! SSH client: message codec, transport abstraction, password
//! authentication and connection lifecycle.

pub mod auth;
pub mod connection;
pub mod message;
pub mod russh_transport;
mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::AuthSession;
pub use connection::Connection;
pub use russh_transport::{RusshTransport, RusshTransportFactory};
pub use session::SshSessionFactory;
pub use transport::{
    AcceptAnyHostKey, ConnectionInfo, HostKeyVerifier, MessageHandler, Transport, TransportFactory,
};
