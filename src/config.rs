//! Sender configuration.
//!
//! A [`SenderConfig`] carries everything about the submission server that
//! stays the same between messages: where it lives, who we log in as, and
//! how patient we are with it. It can be built in code or loaded from TOML:
//!
//! ```toml
//! server = "mail.example.com:587"
//! username = "user"
//! password = "secret"
//! from = "noreply@example.com"
//!
//! [timeouts]
//! connect_secs = 10
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Certificate handling for the STARTTLS upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Skip certificate and hostname verification entirely.
    ///
    /// **SECURITY WARNING**: this makes the session open to interception.
    /// It is the default because submission servers this is pointed at are
    /// commonly running self-signed certificates.
    ///
    /// Default: `true`
    #[serde(default = "defaults::accept_invalid_certs")]
    pub accept_invalid_certs: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: defaults::accept_invalid_certs(),
        }
    }
}

impl TlsConfig {
    /// Validate the server certificate against the platform root store.
    #[must_use]
    pub const fn verified() -> Self {
        Self {
            accept_invalid_certs: false,
        }
    }
}

/// Per-step timeouts. Unset values mean the step may block indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for establishing the TCP connection.
    #[serde(default)]
    pub connect_secs: Option<u64>,

    /// Timeout for each command/reply round trip, including the TLS handshake.
    #[serde(default)]
    pub command_secs: Option<u64>,

    /// Timeout for transmitting the message body and reading the final reply.
    #[serde(default)]
    pub data_secs: Option<u64>,
}

impl ClientTimeouts {
    #[must_use]
    pub fn connect(&self) -> Option<Duration> {
        self.connect_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn command(&self) -> Option<Duration> {
        self.command_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn data(&self) -> Option<Duration> {
        self.data_secs.map(Duration::from_secs)
    }
}

/// Connection and credential settings for an [`EmailSender`](crate::EmailSender).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Submission server as `host:port`.
    pub server: String,

    pub username: String,

    pub password: String,

    /// Envelope sender, also used for the `From:` header.
    pub from: String,

    /// Name announced in EHLO/HELO.
    ///
    /// Default: `localhost`
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

impl SenderConfig {
    /// Create a configuration with default TLS, timeout and HELO settings.
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            username: username.into(),
            password: password.into(),
            from: from.into(),
            helo_name: defaults::helo_name(),
            tls: TlsConfig::default(),
            timeouts: ClientTimeouts::default(),
        }
    }

    #[must_use]
    pub fn with_helo_name(mut self, name: impl Into<String>) -> Self {
        self.helo_name = name.into();
        self
    }

    #[must_use]
    pub const fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Parse a configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the document is not valid TOML or is
    /// missing a required field.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        Ok(toml::from_str(document)?)
    }

    /// Read and parse a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;

        Self::from_toml_str(&document)
    }
}

mod defaults {
    pub const fn accept_invalid_certs() -> bool {
        true
    }

    pub fn helo_name() -> String {
        "localhost".to_string()
    }
}
