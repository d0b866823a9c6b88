//! Plain text output formatting.
//!
//! Produces human-readable output with colors and formatting.

use crate::output::report::{CheckReport, ReportEntry};
use console::{style, Style};
use std::io::{self, Write};

const RULE: &str = "═══════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────────";

/// Print a report in human-readable form to stdout.
pub fn print_plain(report: &CheckReport) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_plain(&mut out, report)
}

/// Write a report in human-readable form.
pub fn write_plain<W: Write>(out: &mut W, report: &CheckReport) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(
        out,
        "                    {} Check Results",
        style("sshsweep").cyan().bold()
    )?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out)?;

    writeln!(
        out,
        "  {} {}",
        style("Run ID:").bold(),
        style(report.id.short()).dim()
    )?;
    writeln!(
        out,
        "  {} {} of {} targets checked in {:.2}s{}",
        style("Statistics:").bold(),
        report.checked,
        report.total,
        report.duration_ms as f64 / 1000.0,
        if report.stopped {
            style(" (stopped)").yellow().to_string()
        } else {
            String::new()
        }
    )?;
    writeln!(
        out,
        "               {} on, {} off, {} errors",
        style(report.on.len()).green().bold(),
        style(report.off.len()).red(),
        style(report.errors.len()).yellow()
    )?;

    write_section(out, "ON", &report.on, Style::new().green().bold())?;
    write_section(out, "OFF", &report.off, Style::new().red())?;
    write_section(out, "ERRORS", &report.errors, Style::new().yellow())?;

    writeln!(out)?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out)?;
    Ok(())
}

fn write_section<W: Write>(
    out: &mut W,
    title: &str,
    entries: &[ReportEntry],
    line_style: Style,
) -> io::Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    writeln!(out)?;
    writeln!(out, "  {} ({})", style(title).bold(), entries.len())?;
    writeln!(out, "  {}", style(THIN_RULE).dim())?;
    for entry in entries {
        match &entry.error {
            Some(error) => writeln!(
                out,
                "  {}  {}",
                line_style.apply_to(&entry.line),
                style(truncate_string(error, 60)).dim()
            )?,
            None => writeln!(out, "  {}", line_style.apply_to(&entry.line))?,
        }
    }
    Ok(())
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), msg);
}

/// Print a warning message.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), msg);
}

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an info message.
pub fn print_info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Truncate a string to a maximum number of characters, adding an ellipsis
/// if truncated.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
