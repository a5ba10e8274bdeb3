//! Transport mode and the gate that confines port forwarding to it.
//!
//! A local listener is only meaningful when exactly one caller process owns
//! the server, which is the case for the stdio transport. Over HTTP any number
//! of remote clients share the server and none of them can reach its
//! loopback ports, so port-forward tools are refused outright.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportMode {
    /// MCP over stdin/stdout, one client.
    Stdio,
    /// MCP over Streamable HTTP, many clients.
    Http,
}

impl TransportMode {
    pub fn is_single_client(self) -> bool {
        matches!(self, Self::Stdio)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
