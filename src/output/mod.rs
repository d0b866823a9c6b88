//! Output formatting module.
//!
//! Provides formatters for plain text, JSON, and CSV output of check reports.

mod csv_format;
mod json_format;
mod plain;
mod report;

pub use csv_format::{print_csv, write_csv};
pub use json_format::{print_json, write_json};
pub use plain::{print_error, print_info, print_plain, print_success, print_warning, write_plain};
pub use report::{CheckReport, ReportEntry};

use crate::cli::OutputFormat;
use crate::error::CliResult;

/// Format and print a report according to the specified format.
pub fn format_report(report: &CheckReport, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Plain => plain::print_plain(report)?,
        OutputFormat::Json => json_format::print_json(report)?,
        OutputFormat::Csv => csv_format::print_csv(report)?,
    }
    Ok(())
}
