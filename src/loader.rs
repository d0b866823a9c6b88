//! Target list loading.
//!
//! Two input shapes are supported:
//! - delimited lines (`host[:port]|user|pass[|...]`), one target per line
//! - unstructured text scraped for IPv4 addresses, paired with fixed
//!   credentials

use crate::types::Target;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// How far past an address a `:port` suffix may extend.
const MAX_PORT_DIGITS: usize = 5;

static IPV4_PATTERN: OnceLock<Regex> = OnceLock::new();

fn ipv4_pattern() -> &'static Regex {
    IPV4_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)",
        )
        .unwrap_or_else(|e| unreachable!("static IPv4 pattern is valid: {e}"))
    })
}

/// Parse delimited target lines.
///
/// Blank lines and lines that do not carry host, user and password fields
/// are skipped.
pub fn parse_list(text: &str, delimiter: char) -> Vec<Target> {
    text.lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| match Target::parse_with(line, delimiter) {
            Ok(target) => Some(target),
            Err(e) => {
                debug!(error = %e, "skipping target line");
                None
            }
        })
        .collect()
}

/// Read and parse a delimited target file.
pub fn load_file(path: &Path, delimiter: char) -> std::io::Result<Vec<Target>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_list(&text, delimiter))
}

/// Extract every IPv4 address from free-form text and pair it with fixed
/// credentials.
///
/// An address immediately followed by `:digits` (up to five) uses that port;
/// otherwise `default_port` applies.
pub fn extract_fixed(text: &str, user: &str, pass: &str, default_port: u16) -> Vec<Target> {
    ipv4_pattern()
        .find_iter(text)
        .map(|m| {
            let port = port_after(&text[m.end()..]).unwrap_or(default_port);
            Target::new(m.as_str(), port, user, pass)
        })
        .collect()
}

/// Overwrite the credentials of every target before a run starts.
pub fn set_credentials(targets: &mut [Target], user: &str, pass: &str) {
    for target in targets {
        target.user = user.to_string();
        target.pass = pass.to_string();
    }
}

fn port_after(rest: &str) -> Option<u16> {
    let digits = rest.strip_prefix(':')?;
    let len = digits
        .bytes()
        .take(MAX_PORT_DIGITS)
        .take_while(u8::is_ascii_digit)
        .count();
    if len == 0 {
        return None;
    }
    digits[..len].parse().ok()
}
