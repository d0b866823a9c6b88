//! CLI subcommand definitions and handlers.
//!
//! - `sshsweep check <list>` - Check a target list
//! - `sshsweep extract <file>` - Build a target list from free-form text

mod check;
mod extract;

pub use check::CheckCommand;
pub use extract::ExtractCommand;

use clap::{Parser, Subcommand};

/// sshsweep - concurrent SSH password checker.
///
/// Reads `host[:port]|user|pass` lines and reports which credentials log in,
/// which are refused and which hosts could not be checked.
#[derive(Parser, Debug)]
#[command(name = "sshsweep")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Concurrent SSH password checker", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check credentials against every target in a list
    #[command(alias = "c")]
    Check(CheckCommand),

    /// Extract IPv4 targets from arbitrary text
    #[command(alias = "x")]
    Extract(ExtractCommand),
}

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable plain text
    #[default]
    Plain,
    /// JSON structured output
    Json,
    /// CSV format for data analysis
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}
