//! One-shot message submission.

use crate::{
    address::ServerAddress,
    auth::PlainTextAuthenticator,
    client::{SmtpClient, connector},
    config::SenderConfig,
    error::Result,
    internal,
    message::format_message,
};

/// What to send, independent of where it is sent from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
    /// Envelope recipients, declared in this order.
    pub to: Vec<String>,
    /// Send the body as `text/html` instead of `text/plain`.
    pub html: bool,
}

impl Message {
    #[must_use]
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Adds multiple recipients.
    #[must_use]
    pub fn to_multiple(mut self, recipients: &[impl AsRef<str>]) -> Self {
        self.to
            .extend(recipients.iter().map(|recipient| recipient.as_ref().to_string()));
        self
    }

    #[must_use]
    pub const fn html(mut self, html: bool) -> Self {
        self.html = html;
        self
    }

    /// The raw bytes submitted after DATA.
    #[must_use]
    pub fn format(&self, from: &str) -> Vec<u8> {
        format_message(&self.subject, &self.body, from, self.html)
    }
}

/// Submits messages to the server described by a [`SenderConfig`].
///
/// Every call to [`send`](Self::send) opens its own connection, upgrades it
/// with STARTTLS, authenticates with `PLAIN`, and closes it again. Nothing is
/// shared between calls, so a sender can be used from several tasks at once.
#[derive(Debug, Clone)]
pub struct EmailSender {
    config: SenderConfig,
}

impl EmailSender {
    #[must_use]
    pub const fn new(config: SenderConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Run a complete SMTP transaction for `message`.
    ///
    /// The first failing step ends the transaction and its error is
    /// returned. In particular, a refused recipient aborts the whole send
    /// before DATA, even if other recipients were accepted.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidAddress` for a malformed server address
    /// before any connection is made, and otherwise whatever the failing
    /// step produced (I/O, TLS, or an SMTP rejection).
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(server = %self.config.server, recipients = message.to.len())
    )]
    pub async fn send(&self, message: &Message) -> Result<()> {
        let address = ServerAddress::parse(&self.config.server)?;
        let connector = connector(&self.config.tls)?;

        let mut client = SmtpClient::connect(&address, self.config.timeouts).await?;
        client.set_local_name(self.config.helo_name.as_str());

        client.starttls(&connector).await?;

        let mut authenticator =
            PlainTextAuthenticator::new(self.config.username.as_str(), self.config.password.as_str());
        client.auth(&mut authenticator).await?;

        client.mail(&self.config.from).await?;
        for recipient in &message.to {
            client.rcpt(recipient).await?;
        }

        client.data(&message.format(&self.config.from)).await?;
        client.quit().await?;

        internal!(level = INFO, "Message submitted to {address}");
        Ok(())
    }

    /// Like [`send`](Self::send), but blocks the calling thread on a private
    /// current-thread runtime.
    ///
    /// Must not be called from within an async runtime.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the runtime cannot be created, otherwise
    /// the same errors as [`send`](Self::send).
    pub fn send_blocking(&self, message: &Message) -> Result<()> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(self.send(message))
    }
}

/// Send a single message, blocking until the server has accepted it.
///
/// Connects to `server` (`host:port`), upgrades with STARTTLS without
/// verifying the certificate, authenticates with `PLAIN` regardless of
/// transport security, and submits the message from `from` to each of `to`.
///
/// ```no_run
/// empath_send::send(
///     "test",
///     "body",
///     "mail.foo.com:25",
///     "user",
///     "pwd",
///     "f@f.f",
///     &["foo@foo.com"],
///     false,
/// )?;
/// # Ok::<(), empath_send::ClientError>(())
/// ```
///
/// # Errors
///
/// Returns the first error encountered; see [`EmailSender::send`].
#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
pub fn send(
    subject: &str,
    body: &str,
    server: &str,
    user: &str,
    password: &str,
    from: &str,
    to: &[impl AsRef<str>],
    html: bool,
) -> Result<()> {
    let sender = EmailSender::new(SenderConfig::new(server, user, password, from));
    let message = Message::new(subject, body).to_multiple(to).html(html);

    sender.send_blocking(&message)
}
