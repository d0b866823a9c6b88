//! CSV output formatting.

use crate::output::report::{CheckReport, ReportEntry};
use std::io::{self, Write};

/// Print a report as CSV to stdout.
pub fn print_csv(report: &CheckReport) -> csv::Result<()> {
    let stdout = io::stdout();
    write_csv(stdout.lock(), report)
}

/// Write one row per reported target.
pub fn write_csv<W: Write>(out: W, report: &CheckReport) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(["result", "host", "port", "line", "error"])?;

    let rows = [("on", &report.on), ("off", &report.off), ("error", &report.errors)];
    for (result, entries) in rows {
        for entry in entries.iter() {
            write_row(&mut wtr, result, entry)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

fn write_row<W: Write>(wtr: &mut csv::Writer<W>, result: &str, entry: &ReportEntry) -> csv::Result<()> {
    wtr.write_record([
        result,
        &entry.host,
        &entry.port.to_string(),
        &entry.line,
        entry.error.as_deref().unwrap_or(""),
    ])
}
