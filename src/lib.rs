//! Submit a single email over SMTP.
//!
//! The session is always upgraded with STARTTLS, and credentials are sent
//! with `PLAIN` authentication. By default the server's certificate is not
//! verified, which makes this suitable for internal relays with self-signed
//! certificates and unsuitable for anything crossing an untrusted network.
//!
//! Use [`send`] for a one-off blocking call, or an [`EmailSender`] built from
//! a [`SenderConfig`] to reuse settings (optionally loaded from TOML).
//!
//! Events are emitted through [`tracing`]; call [`logging::init`] from a
//! binary to print them.

pub mod address;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod sender;

pub use tracing;

pub use address::ServerAddress;
pub use auth::{Authenticator, PlainTextAuthenticator, ServerInfo};
pub use config::{ClientTimeouts, SenderConfig, TlsConfig};
pub use error::{ClientError, Result};
pub use message::format_message;
pub use sender::{EmailSender, Message, send};
