//! Error types for sending mail.

use std::io;

use thiserror::Error;

/// Errors that can occur while submitting a message.
///
/// Every step of a send aborts on the first error, which is handed back to
/// the caller as-is.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server address could not be split into a host and a port.
    #[error("Invalid server address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered with a status code the command does not expect.
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// A command argument contains CR or LF and would split the command.
    #[error("A line must not contain CR or LF: {0:?}")]
    InvalidLine(String),

    /// The server asked for another round trip during a single-step
    /// authentication mechanism.
    #[error("unexpected server challenge")]
    UnexpectedChallenge,

    /// The server sent a challenge that is not valid base64.
    #[error("Malformed authentication challenge: {0}")]
    MalformedChallenge(#[from] base64::DecodeError),

    /// A step did not complete within its configured timeout.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// The sender configuration could not be read or parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Specialized `Result` type for sending mail.
pub type Result<T> = std::result::Result<T, ClientError>;
