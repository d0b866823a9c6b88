//! Extract subcommand implementation.
//!
//! Handles `sshsweep extract <file>`: scrape IPv4 addresses from any text
//! (scanner output, logs) and print them as a ready-to-check target list.

use crate::error::{CliError, CliResult};
use crate::loader;
use crate::output;
use crate::types::{Target, DEFAULT_PORT};
use clap::Parser;
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

/// Extract IPv4 targets from arbitrary text.
#[derive(Parser, Debug)]
pub struct ExtractCommand {
    /// Text to scan for addresses
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Login user to pair with every address
    #[arg(short, long)]
    pub user: String,

    /// Login password to pair with every address
    #[arg(short, long)]
    pub pass: String,

    /// Port for addresses without an explicit `:port`
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Drop repeated host:port pairs
    #[arg(long)]
    pub unique: bool,

    /// Write the list to a file instead of stdout
    #[arg(long = "out", value_name = "PATH")]
    pub out: Option<PathBuf>,
}

impl ExtractCommand {
    /// Execute the extract command.
    pub fn execute(&self, quiet: bool) -> CliResult<()> {
        let text = std::fs::read_to_string(&self.input).map_err(|source| CliError::ReadInput {
            path: self.input.clone(),
            source,
        })?;
        let targets = self.extract(&text);

        match &self.out {
            Some(path) => {
                let mut file = std::fs::File::create(path)?;
                write_targets(&mut file, &targets)?;
                if !quiet {
                    output::print_success(&format!(
                        "{} targets written to {}",
                        targets.len(),
                        path.display()
                    ));
                }
            }
            None => write_targets(&mut std::io::stdout().lock(), &targets)?,
        }
        Ok(())
    }

    fn extract(&self, text: &str) -> Vec<Target> {
        let mut targets = loader::extract_fixed(text, &self.user, &self.pass, self.port);
        if self.unique {
            let mut seen = HashSet::new();
            targets.retain(|t| seen.insert(t.address()));
        }
        targets
    }
}

fn write_targets<W: Write>(out: &mut W, targets: &[Target]) -> std::io::Result<()> {
    for target in targets {
        writeln!(out, "{target}")?;
    }
    out.flush()
}
