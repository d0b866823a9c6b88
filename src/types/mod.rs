//! Core type definitions.
//!
//! Targets are plain data; parsing and serialization live next to the types
//! so the line format has a single owner.

mod run_id;
mod target;

pub use run_id::RunId;
pub use target::{ProxyAddr, Target, TargetError, DEFAULT_DELIMITER, DEFAULT_PORT};
