//! Check target types with line-format parsing.
//!
//! A target line looks like `host[:port]|user|pass[|anything else]`.
//! The whole line is kept verbatim so a target can be written back out
//! exactly as it was read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default SSH port used when a line carries no `:port` suffix.
pub const DEFAULT_PORT: u16 = 22;

/// Default field delimiter for target lines.
pub const DEFAULT_DELIMITER: char = '|';

/// An HTTP proxy to tunnel the SSH connection through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyAddr {
    pub host: String,
    pub port: u16,
}

impl ProxyAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One host plus credential set to be checked.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Hostname or IP address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub pass: String,
    /// The line this target was parsed from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,
    /// Optional HTTP proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyAddr>,
}

impl Target {
    /// Create a target without a source line.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            pass: pass.into(),
            raw_line: None,
            proxy: None,
        }
    }

    /// Route the connection through an HTTP proxy.
    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy = Some(ProxyAddr::new(host, port));
        self
    }

    /// Keep the original line for serialization.
    pub fn with_raw_line(mut self, line: impl Into<String>) -> Self {
        self.raw_line = Some(line.into());
        self
    }

    /// Parse a target line using the default `|` delimiter.
    pub fn parse(line: &str) -> Result<Self, TargetError> {
        Self::parse_with(line, DEFAULT_DELIMITER)
    }

    /// Parse a target line split on `delimiter`.
    ///
    /// The first field is `host[:port]`; an unparseable port falls back to
    /// [`DEFAULT_PORT`]. The password runs up to the next delimiter or the end
    /// of the line. Fields are trimmed, and the untouched line is kept as
    /// [`Target::raw_line`].
    pub fn parse_with(line: &str, delimiter: char) -> Result<Self, TargetError> {
        let mut fields = line.splitn(4, delimiter);

        let host_field = fields.next().unwrap_or_default();
        let user = fields.next().ok_or(TargetError::MissingField("user"))?;
        let pass = fields.next().ok_or(TargetError::MissingField("pass"))?;

        let (host, port) = split_host_port(host_field.trim());
        if host.is_empty() {
            return Err(TargetError::EmptyHost(line.to_string()));
        }

        Ok(Self::new(host, port, user.trim(), pass.trim()).with_raw_line(line))
    }

    /// The canonical `host:port|user|pass` form, ignoring any raw line.
    pub fn normalized(&self) -> String {
        format!("{}:{}|{}|{}", self.host, self.port, self.user, self.pass)
    }

    /// The `host:port` address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Passwords never end up in debug output.
impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw_line {
            Some(line) => f.write_str(line),
            None => f.write_str(&self.normalized()),
        }
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error type for target line parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("empty host in line: {0}")]
    EmptyHost(String),
}

/// Split `host:port`. Anything other than exactly one colon leaves the host
/// untouched, so bare IPv6 addresses keep the default port.
fn split_host_port(field: &str) -> (&str, u16) {
    let mut parts = field.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) => (host, port.trim().parse().unwrap_or(DEFAULT_PORT)),
        _ => (field, DEFAULT_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_port() {
        let target = Target::parse("10.0.0.5:2222|bob|secret").unwrap();
        assert_eq!(target.host, "10.0.0.5");
        assert_eq!(target.port, 2222);
        assert_eq!(target.user, "bob");
        assert_eq!(target.pass, "secret");
    }

    #[test]
    fn test_parse_default_port() {
        let target = Target::parse("example.com|root|toor").unwrap();
        assert_eq!(target.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_bad_port_falls_back() {
        let target = Target::parse("10.0.0.1:ssh|root|toor").unwrap();
        assert_eq!(target.host, "10.0.0.1");
        assert_eq!(target.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_trailing_fields_stay_in_raw_line() {
        let line = "10.0.0.1:22|admin|admin|BR - Sao Paulo | 2019";
        let target = Target::parse(line).unwrap();
        assert_eq!(target.pass, "admin");
        assert_eq!(target.to_string(), line);
    }

    #[test]
    fn test_parse_trims_fields() {
        let target = Target::parse(" 10.0.0.1 | root | pw ").unwrap();
        assert_eq!(target.host, "10.0.0.1");
        assert_eq!(target.user, "root");
        assert_eq!(target.pass, "pw");
    }

    #[test]
    fn test_parse_missing_fields() {
        assert_eq!(
            Target::parse("10.0.0.1"),
            Err(TargetError::MissingField("user"))
        );
        assert_eq!(
            Target::parse("10.0.0.1|root"),
            Err(TargetError::MissingField("pass"))
        );
        assert!(matches!(
            Target::parse(":22|root|pw"),
            Err(TargetError::EmptyHost(_))
        ));
    }

    #[test]
    fn test_display_round_trips_raw_line() {
        let line = "10.0.0.5:2222|bob|secret";
        assert_eq!(Target::parse(line).unwrap().to_string(), line);
    }

    #[test]
    fn test_display_normalizes_without_raw_line() {
        let target = Target::new("10.0.0.5", 22, "bob", "secret");
        assert_eq!(target.to_string(), "10.0.0.5:22|bob|secret");
    }

    #[test]
    fn test_custom_delimiter() {
        let target = Target::parse_with("10.0.0.1:2200;root;pw", ';').unwrap();
        assert_eq!(target.port, 2200);
        assert_eq!(target.pass, "pw");
    }

    #[test]
    fn test_ipv6_keeps_default_port() {
        let target = Target::parse("::1|root|pw").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, DEFAULT_PORT);
    }

    #[test]
    fn test_debug_redacts_password() {
        let target = Target::new("h", 22, "u", "hunter2");
        assert!(!format!("{:?}", target).contains("hunter2"));
    }
}
