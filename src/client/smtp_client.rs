//! SMTP client connection with STARTTLS and AUTH support.

use std::{collections::HashMap, future::Future, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{TlsConnector, client::TlsStream};

use super::{response::Response, tls};
use crate::{
    address::ServerAddress,
    auth::{Authenticator, ServerInfo},
    config::ClientTimeouts,
    error::{ClientError, Result},
    incoming, internal, outgoing,
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An SMTP client connection that can be either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade(self, connector: &TlsConnector, host: &str) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let tls_stream = connector
                    .connect(tls::server_name(host)?, stream)
                    .await
                    .map_err(|e| ClientError::TlsError(e.to_string()))?;

                Ok(Self::Tls(Box::new(tls_stream)))
            }
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.shutdown().await,
            Self::Tls(stream) => stream.shutdown().await,
        }
    }

    const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

async fn timed<T>(
    limit: Option<Duration>,
    step: &'static str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| ClientError::Timeout(step))?,
        None => future.await,
    }
}

/// Reject command lines that would be split on the wire.
fn validate_line(line: &str) -> Result<()> {
    if line.contains(['\r', '\n']) {
        return Err(ClientError::InvalidLine(line.to_string()));
    }
    Ok(())
}

/// Apply SMTP transparency to a message body (RFC 5321 section 4.5.2).
///
/// Bare `\n` becomes `\r\n`, a `.` at the start of a line is doubled, and the
/// result is terminated by `<CRLF>.<CRLF>`.
#[must_use]
pub fn encode_data(payload: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(payload.len() + payload.len() / 32 + 5);
    let mut line_start = true;
    let mut previous = None;

    for &byte in payload {
        if line_start && byte == b'.' {
            encoded.push(b'.');
        }
        if byte == b'\n' && previous != Some(b'\r') {
            encoded.push(b'\r');
        }
        encoded.push(byte);

        line_start = byte == b'\n';
        previous = Some(byte);
    }

    match previous {
        None | Some(b'\n') => {}
        Some(b'\r') => encoded.push(b'\n'),
        Some(_) => encoded.extend_from_slice(b"\r\n"),
    }
    encoded.extend_from_slice(b".\r\n");

    encoded
}

/// A single SMTP session.
///
/// Each method issues one step of the transaction and fails with
/// `ClientError::SmtpError` if the server answers with a code the step does
/// not expect.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_name: String,
    local_name: String,
    /// EHLO keywords, `None` until the first successful EHLO/HELO.
    extensions: Option<HashMap<String, String>>,
    timeouts: ClientTimeouts,
}

impl SmtpClient {
    /// Connect to `address` and read the 220 greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the greeting is not 220.
    pub async fn connect(address: &ServerAddress, timeouts: ClientTimeouts) -> Result<Self> {
        let target = address.to_string();
        internal!(level = DEBUG, "Connecting to {target}");

        let stream = timed(timeouts.connect(), "connection", async {
            Ok(TcpStream::connect(target.as_str()).await?)
        })
        .await?;

        let mut client = Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_name: address.host().to_string(),
            local_name: "localhost".to_string(),
            extensions: None,
            timeouts,
        };

        timed(timeouts.command(), "greeting", client.read_response())
            .await?
            .expect(&[220])?;

        Ok(client)
    }

    /// Set the name announced in EHLO/HELO. Only effective before the first
    /// greeting exchange.
    pub fn set_local_name(&mut self, name: impl Into<String>) {
        self.local_name = name.into();
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ClientConnection::is_tls)
    }

    /// Parameters of an EHLO keyword, if the server advertised it.
    #[must_use]
    pub fn extension(&self, keyword: &str) -> Option<&str> {
        self.extensions
            .as_ref()?
            .get(&keyword.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Greet the server with EHLO, falling back to HELO. Does nothing if the
    /// greeting has already happened on this connection.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidLine` if the local name contains CR or LF,
    /// or an error if both EHLO and HELO are refused.
    pub async fn hello(&mut self) -> Result<()> {
        if self.extensions.is_some() {
            return Ok(());
        }

        match self.ehlo().await {
            Err(ClientError::SmtpError { .. }) => {
                self.command(&format!("HELO {}", self.local_name))
                    .await?
                    .expect(&[250])?;
                self.extensions = Some(HashMap::new());
                Ok(())
            }
            other => other,
        }
    }

    async fn ehlo(&mut self) -> Result<()> {
        let response = self
            .command(&format!("EHLO {}", self.local_name))
            .await?
            .expect(&[250])?;

        let extensions = response
            .lines
            .iter()
            .skip(1)
            .map(|line| {
                let (keyword, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));
                (keyword.to_ascii_uppercase(), params.to_string())
            })
            .collect();

        self.extensions = Some(extensions);
        Ok(())
    }

    /// Issue STARTTLS, perform the handshake with `connector`, and greet the
    /// server again over the encrypted channel.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is refused or the handshake fails.
    pub async fn starttls(&mut self, connector: &TlsConnector) -> Result<()> {
        self.hello().await?;
        self.command("STARTTLS").await?.expect(&[220])?;

        let connection = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;
        let host = self.server_name.clone();

        let upgraded = timed(
            self.timeouts.command(),
            "TLS handshake",
            connection.upgrade(connector, &host),
        )
        .await?;

        internal!(level = DEBUG, "Connection upgraded to TLS");
        self.connection = Some(upgraded);
        self.buffer_pos = 0;
        self.extensions = None;

        self.ehlo().await
    }

    /// Run an AUTH exchange driven by `authenticator`.
    ///
    /// # Errors
    ///
    /// Returns the authenticator's own error, `ClientError::MalformedChallenge`
    /// for a challenge that is not base64, or `ClientError::SmtpError` if the
    /// server rejects the credentials. The exchange is cancelled with `*`
    /// before any of these is returned.
    pub async fn auth(&mut self, authenticator: &mut dyn Authenticator) -> Result<()> {
        self.hello().await?;

        let info = ServerInfo {
            name: self.server_name.clone(),
            tls: self.is_tls(),
            auth: self
                .extension("AUTH")
                .map(|mechanisms| mechanisms.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        };

        let (mechanism, initial) = authenticator.start(&info)?;
        let line = if initial.is_empty() {
            format!("AUTH {mechanism}")
        } else {
            format!("AUTH {mechanism} {}", STANDARD.encode(initial))
        };
        let mut response = self
            .command_redacted(&line, &format!("AUTH {mechanism} <redacted>"))
            .await?;

        loop {
            let reply = match response.code {
                334 => STANDARD
                    .decode(response.message())
                    .map_err(ClientError::from)
                    .and_then(|challenge| authenticator.next(&challenge, true)),
                235 => authenticator.next(response.message().as_bytes(), false),
                code => Err(ClientError::SmtpError {
                    code,
                    message: response.message(),
                }),
            };

            match reply {
                Ok(Some(data)) => {
                    response = self
                        .command_redacted(&STANDARD.encode(data), "<redacted>")
                        .await?;
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    internal!(level = DEBUG, "Cancelling authentication: {err}");
                    let _ = self.command("*").await;
                    return Err(err);
                }
            }
        }
    }

    /// Issue `MAIL FROM:<from>`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidLine` if `from` contains CR or LF, or an
    /// error if the server does not answer 250.
    pub async fn mail(&mut self, from: &str) -> Result<()> {
        validate_line(from)?;
        self.hello().await?;
        self.command(&format!("MAIL FROM:<{from}>"))
            .await?
            .expect(&[250])?;
        Ok(())
    }

    /// Issue `RCPT TO:<to>`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidLine` if `to` contains CR or LF, or an
    /// error if the server does not answer 250 or 251.
    pub async fn rcpt(&mut self, to: &str) -> Result<()> {
        validate_line(to)?;
        self.command(&format!("RCPT TO:<{to}>"))
            .await?
            .expect(&[250, 251])?;
        Ok(())
    }

    /// Issue DATA, transmit `payload` with dot-stuffing, and wait for the
    /// server to accept the message.
    ///
    /// # Errors
    ///
    /// Returns an error if DATA is refused, writing fails, or the message is
    /// not accepted with 250.
    pub async fn data(&mut self, payload: &[u8]) -> Result<()> {
        self.command("DATA").await?.expect(&[354])?;

        let encoded = encode_data(payload);
        outgoing!("<{} bytes of message data>", encoded.len());

        let limit = self.timeouts.data();
        timed(limit, "message data", async {
            self.connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .send(&encoded)
                .await?;
            self.read_response().await
        })
        .await?
        .expect(&[250])?;

        Ok(())
    }

    /// Issue QUIT and close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer 221.
    pub async fn quit(&mut self) -> Result<()> {
        self.command("QUIT").await?.expect(&[221])?;

        if let Some(mut connection) = self.connection.take()
            && let Err(err) = connection.shutdown().await
        {
            internal!(level = DEBUG, "Error closing connection: {err}");
        }

        Ok(())
    }

    /// Sends a raw command and reads the response.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidLine` if `command` contains CR or LF, or
    /// an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        validate_line(command)?;
        self.command_redacted(command, command).await
    }

    async fn command_redacted(&mut self, command: &str, logged: &str) -> Result<Response> {
        let limit = self.timeouts.command();
        timed(limit, "command reply", async {
            outgoing!("{logged}");
            self.connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .send(format!("{command}\r\n").as_bytes())
                .await?;
            self.read_response().await
        })
        .await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}
