//! SMTP AUTH mechanisms (RFC 4954).

use crate::error::{ClientError, Result};

/// What the client knows about the server when authentication starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server name, as used for the TLS handshake.
    pub name: String,
    /// Whether the session is running over TLS.
    pub tls: bool,
    /// Mechanisms advertised in the EHLO `AUTH` keyword.
    pub auth: Vec<String>,
}

/// A SASL mechanism driven by [`SmtpClient::auth`](crate::client::SmtpClient::auth).
pub trait Authenticator {
    /// Begin the exchange, returning the mechanism name and the initial
    /// response (empty if the mechanism has none).
    ///
    /// # Errors
    ///
    /// Returns an error to abort authentication before anything is sent.
    fn start(&mut self, server: &ServerInfo) -> Result<(String, Vec<u8>)>;

    /// Continue the exchange. `more` is `true` when the server sent a
    /// challenge (decoded into `from_server`) and expects a reply, `false`
    /// once it has accepted the credentials.
    ///
    /// # Errors
    ///
    /// Returns an error to abort authentication; the client cancels the
    /// exchange with the server before propagating it.
    fn next(&mut self, from_server: &[u8], more: bool) -> Result<Option<Vec<u8>>>;
}

/// `PLAIN` authentication that does not care whether the channel is
/// encrypted or the server identity has been verified.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainTextAuthenticator {
    username: String,
    password: String,
}

impl PlainTextAuthenticator {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for PlainTextAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTextAuthenticator")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Authenticator for PlainTextAuthenticator {
    fn start(&mut self, _server: &ServerInfo) -> Result<(String, Vec<u8>)> {
        let mut response = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        response.push(0);
        response.extend_from_slice(self.username.as_bytes());
        response.push(0);
        response.extend_from_slice(self.password.as_bytes());

        Ok(("PLAIN".to_string(), response))
    }

    fn next(&mut self, _from_server: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        // Everything was sent in the initial response.
        if more {
            return Err(ClientError::UnexpectedChallenge);
        }

        Ok(None)
    }
}
