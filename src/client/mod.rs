//! A small SMTP client covering what a single submission needs:
//!
//! - EHLO/HELO greeting with extension discovery
//! - STARTTLS upgrade
//! - SASL authentication through the [`Authenticator`](crate::auth::Authenticator) trait
//! - MAIL, RCPT, DATA (with dot-stuffing) and QUIT
//!
//! ```no_run
//! use empath_send::{PlainTextAuthenticator, ServerAddress, TlsConfig};
//! use empath_send::client::{SmtpClient, connector};
//!
//! # async fn example() -> empath_send::Result<()> {
//! let address = ServerAddress::parse("mail.example.com:587")?;
//! let mut client = SmtpClient::connect(&address, Default::default()).await?;
//! client.starttls(&connector(&TlsConfig::default())?).await?;
//! client.auth(&mut PlainTextAuthenticator::new("user", "pwd")).await?;
//! client.mail("sender@example.com").await?;
//! client.rcpt("recipient@example.com").await?;
//! client.data(b"Subject: Test\n\nHello World").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod response;
mod smtp_client;
mod tls;

pub use response::{Response, ResponseLine};
pub use smtp_client::{SmtpClient, encode_data};
pub use tls::{connector, server_name};
