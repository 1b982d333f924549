//! `host:port` handling for the submission server.

use std::fmt;

use crate::error::{ClientError, Result};

/// A submission server address split into its host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Split `host:port`, accepting bracketed IPv6 literals such as `[::1]:25`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidAddress` when the port is missing or not a
    /// valid number, or the host is ambiguous (an unbracketed IPv6 literal).
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| ClientError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("missing ']' in address"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port in address"))?;
            (host, port)
        } else {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port in address"))?;
            if host.contains(':') {
                return Err(invalid("too many colons in address"));
            }
            if host.contains('[') || host.contains(']') {
                return Err(invalid("unexpected bracket in address"));
            }
            (host, port)
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("invalid port"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// The host part, without IPv6 brackets. Used as the TLS server name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
