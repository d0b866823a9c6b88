//! JSON output formatting.

use crate::output::report::CheckReport;
use std::io::{self, Write};

/// Print a report as pretty JSON to stdout.
pub fn print_json(report: &CheckReport) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_json(&mut out, report)
}

/// Write a report as pretty JSON.
pub fn write_json<W: Write>(out: &mut W, report: &CheckReport) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, report).map_err(io::Error::other)?;
    writeln!(out)
}
