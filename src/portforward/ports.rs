// Port specification parsing for the `ports` tool argument.

use std::fmt;

use super::PortForwardError;

/// A validated `(local, remote)` port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub local: u16,
    pub remote: u16,
}

impl PortPair {
    /// Fallback used when the caller supplies no port specification.
    pub const DEFAULT: PortPair = PortPair { local: 8080, remote: 80 };

    pub fn new(local: u16, remote: u16) -> Self {
        Self { local, remote }
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

/// Parse a comma-separated list of `local` or `local:remote` segments.
///
/// An absent or blank specification yields `[fallback]` rather than an error,
/// so a request that omits ports still forwards something useful. The output
/// preserves the count and order of the input segments.
pub fn parse_ports(spec: Option<&str>, fallback: PortPair) -> Result<Vec<PortPair>, PortForwardError> {
    let spec = match spec.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(vec![fallback]),
    };

    spec.split(',').map(|segment| parse_segment(segment.trim())).collect()
}

/// Parse a single `local[:remote]` segment.
pub fn parse_segment(segment: &str) -> Result<PortPair, PortForwardError> {
    let parts: Vec<&str> = segment.split(':').collect();
    match parts.as_slice() {
        [port] => {
            let port = parse_port(segment, port)?;
            Ok(PortPair::new(port, port))
        }
        [local, remote] => Ok(PortPair::new(
            parse_port(segment, local)?,
            parse_port(segment, remote)?,
        )),
        _ => Err(invalid(segment, "expected 'local' or 'local:remote'")),
    }
}

/// Normalize a specification into `local:remote` strings.
pub fn normalize_ports(spec: Option<&str>, fallback: PortPair) -> Result<Vec<String>, PortForwardError> {
    Ok(parse_ports(spec, fallback)?
        .iter()
        .map(PortPair::to_string)
        .collect())
}

fn parse_port(segment: &str, token: &str) -> Result<u16, PortForwardError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(invalid(segment, "empty port"));
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(segment, &format!("'{token}' is not a number")));
    }
    match token.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid(segment, &format!("'{token}' is not in range 1-65535"))),
        Ok(port) => Ok(port),
    }
}

fn invalid(segment: &str, reason: &str) -> PortForwardError {
    PortForwardError::InvalidPortSpec {
        segment: segment.to_string(),
        reason: reason.to_string(),
    }
}
