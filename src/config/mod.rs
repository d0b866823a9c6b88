//! Configuration for check runs.
//!
//! Settings are plain serde structs; the CLI fills them from flags and
//! environment variables.

mod settings;

pub use settings::{
    CheckerSettings, DEFAULT_CONCURRENCY, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_FLOOD_THRESHOLD,
    DEFAULT_KEX_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS,
};
