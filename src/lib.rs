//! # sshsweep - A Concurrent SSH Password Checker
//!
//! sshsweep takes a list of `host[:port]|user|pass` targets and tries each
//! password login over SSH, sorting every target into one of three buckets:
//! logged in (on), refused (off) or failed to check (errors).
//!
//! ## Features
//!
//! - **Bounded Concurrency**: A fixed worker pool drains a shared target list
//! - **Hard Timeouts**: TCP connect and key exchange each have their own budget
//! - **Flood Guard**: Peers that spam authentication messages are dropped
//! - **HTTP Proxies**: Connections can be tunnelled with `CONNECT`
//! - **Cancellation**: A running check stops promptly and discards partial work
//! - **Multiple Output Formats**: Plain text, JSON, and CSV
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use sshsweep::checker::CheckerPool;
//! use sshsweep::config::CheckerSettings;
//! use sshsweep::ssh::{RusshTransportFactory, SshSessionFactory};
//! use sshsweep::types::Target;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let targets = vec![Target::parse("192.168.1.10:22|root|toor").unwrap()];
//!     let sessions = SshSessionFactory::new(Arc::new(RusshTransportFactory::new()));
//!     let pool = CheckerPool::new(targets, CheckerSettings::default(), Arc::new(sessions));
//!
//!     pool.check(true).await;
//!     for target in pool.on() {
//!         println!("{target}");
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Targets, proxies and run identifiers
//! - [`loader`] - Target list parsing and IPv4 extraction
//! - [`ssh`] - Connection state machine, authentication and transports
//! - [`checker`] - Per-target checks and the worker pool
//! - [`config`] - Checker settings
//! - [`error`] - Error types
//! - [`output`] - Report formatting

pub mod checker;
pub mod cli;
pub mod config;
pub mod error;
pub mod loader;
pub mod output;
pub mod ssh;
pub mod types;

// Re-export commonly used types
pub use checker::{CheckOutcome, CheckerPool, TargetCheck};
pub use config::CheckerSettings;
pub use error::{CheckError, CliError};
pub use ssh::{Connection, SshSessionFactory};
pub use types::{ProxyAddr, RunId, Target};
