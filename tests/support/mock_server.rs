//! Mock submission server for exercising the client end to end.
#![allow(dead_code)] // Test utility module - not all methods used in every test
//!
//! Speaks just enough SMTP to take a client through a full submission:
//! - STARTTLS with a freshly generated self-signed certificate
//! - scripted AUTH exchanges (including multi-step challenges)
//! - per-recipient RCPT replies
//! - failure injection (delays, refused steps)
//! - recording of every command for later assertions
//! - recording of the SNI name of every TLS handshake
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_rcpt_to_response_at(1, 550, "User unknown")
//!     .build()
//!     .await?;
//!
//! // Point a client at server.addr()
//!
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    StartTls,
    /// AUTH with the mechanism and the decoded initial response, if any
    Auth {
        mechanism: String,
        initial: Option<Vec<u8>>,
    },
    /// A line sent in reply to a 334 challenge (`*` cancels)
    AuthContinuation(String),
    /// Address between the angle brackets of MAIL FROM
    MailFrom(String),
    /// Address between the angle brackets of RCPT TO
    RcptTo(String),
    Data,
    /// Message content after DATA, with dot-stuffing removed
    MessageContent(Vec<u8>),
    Quit,
    Other(String),
}

/// Response configuration for SMTP commands
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct EhloResponse {
    code: u16,
    capabilities: Vec<String>,
}

impl EhloResponse {
    fn to_bytes(&self) -> Vec<u8> {
        let mut response = String::new();
        let cap_count = self.capabilities.len();

        for (i, cap) in self.capabilities.iter().enumerate() {
            let separator = if i + 1 < cap_count { '-' } else { ' ' };
            let _ = write!(&mut response, "{}{separator}{cap}\r\n", self.code);
        }

        response.into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_response: Option<EhloResponse>,
    helo_response: SmtpResponse,
    starttls_response: SmtpResponse,
    auth_script: Vec<SmtpResponse>,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    rcpt_to_overrides: HashMap<usize, SmtpResponse>,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,

    // Failure injection
    connection_delay: Option<Duration>,
    response_delay: Option<Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock SMTP Server"),
            ehlo_response: Some(EhloResponse {
                code: 250,
                capabilities: vec![
                    "localhost".to_string(),
                    "STARTTLS".to_string(),
                    "AUTH PLAIN LOGIN".to_string(),
                ],
            }),
            helo_response: SmtpResponse::new(250, "Hello"),
            starttls_response: SmtpResponse::new(220, "Ready to start TLS"),
            auth_script: vec![SmtpResponse::new(235, "2.7.0 Authentication successful")],
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            rcpt_to_overrides: HashMap::new(),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            quit_response: SmtpResponse::new(221, "Bye"),
            connection_delay: None,
            response_delay: None,
        }
    }
}

/// How a plaintext session ended.
enum Outcome {
    Closed,
    StartTls,
}

/// Per-connection bookkeeping.
#[derive(Default)]
struct SessionState {
    rcpt_count: usize,
}

/// Mock SMTP server for testing
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    server_names: Arc<RwLock<Vec<Option<String>>>>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get all commands received by the server
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// SNI name sent by the client in each TLS handshake, in order
    pub async fn tls_server_names(&self) -> Vec<Option<String>> {
        self.server_names.read().await.clone()
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<MockServerConfig>,
        acceptor: TlsAcceptor,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
        server_names: Arc<RwLock<Vec<Option<String>>>>,
    ) -> Result<(), BoxError> {
        if let Some(delay) = config.connection_delay {
            tokio::time::sleep(delay).await;
        }

        let mut stream = BufReader::new(stream);
        stream.write_all(&config.greeting.to_bytes()).await?;
        stream.flush().await?;

        let mut state = SessionState::default();
        if let Outcome::Closed = Self::session(&mut stream, &config, &commands, &mut state, false).await? {
            return Ok(());
        }

        let tls = acceptor.accept(stream.into_inner()).await?;
        server_names
            .write()
            .await
            .push(tls.get_ref().1.server_name().map(str::to_string));
        let mut stream = BufReader::new(tls);
        Self::session(&mut stream, &config, &commands, &mut state, true).await?;

        Ok(())
    }

    async fn respond<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut BufReader<S>,
        config: &MockServerConfig,
        response: &[u8],
    ) -> std::io::Result<()> {
        if let Some(delay) = config.response_delay {
            tokio::time::sleep(delay).await;
        }
        stream.write_all(response).await?;
        stream.flush().await
    }

    #[allow(clippy::too_many_lines)]
    async fn session<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut BufReader<S>,
        config: &MockServerConfig,
        commands: &RwLock<Vec<SmtpCommand>>,
        state: &mut SessionState,
        tls: bool,
    ) -> Result<Outcome, BoxError> {
        let mut line = String::new();

        loop {
            line.clear();

            let Ok(read_result) = timeout(Duration::from_secs(10), stream.read_line(&mut line)).await
            else {
                return Ok(Outcome::Closed);
            };
            if read_result? == 0 {
                return Ok(Outcome::Closed);
            }

            let cmd_line = line.trim_end().to_string();
            tracing::debug!("Mock server received: {}", cmd_line);

            let (verb, argument) = cmd_line.split_once(' ').unwrap_or((cmd_line.as_str(), ""));
            let argument = argument.to_string();

            match verb.to_uppercase().as_str() {
                "EHLO" => {
                    commands.write().await.push(SmtpCommand::Ehlo(argument));
                    let response = config.ehlo_response.as_ref().map_or_else(
                        || SmtpResponse::new(502, "Command not implemented").to_bytes(),
                        EhloResponse::to_bytes,
                    );
                    Self::respond(stream, config, &response).await?;
                }
                "HELO" => {
                    commands.write().await.push(SmtpCommand::Helo(argument));
                    Self::respond(stream, config, &config.helo_response.to_bytes()).await?;
                }
                "STARTTLS" => {
                    commands.write().await.push(SmtpCommand::StartTls);
                    if tls {
                        let response = SmtpResponse::new(503, "TLS already active");
                        Self::respond(stream, config, &response.to_bytes()).await?;
                        continue;
                    }

                    let response = &config.starttls_response;
                    Self::respond(stream, config, &response.to_bytes()).await?;
                    if response.code == 220 {
                        return Ok(Outcome::StartTls);
                    }
                }
                "AUTH" => {
                    let (mechanism, initial) = argument
                        .split_once(' ')
                        .map_or((argument.as_str(), None), |(m, i)| (m, Some(i)));
                    let initial = initial.map(|i| STANDARD.decode(i)).transpose()?;
                    commands.write().await.push(SmtpCommand::Auth {
                        mechanism: mechanism.to_string(),
                        initial,
                    });

                    Self::authenticate(stream, config, commands).await?;
                }
                "MAIL" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::MailFrom(path_of(&argument, "FROM:")));
                    Self::respond(stream, config, &config.mail_from_response.to_bytes()).await?;
                }
                "RCPT" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::RcptTo(path_of(&argument, "TO:")));
                    let response = config
                        .rcpt_to_overrides
                        .get(&state.rcpt_count)
                        .unwrap_or(&config.rcpt_to_response);
                    state.rcpt_count += 1;
                    Self::respond(stream, config, &response.to_bytes()).await?;
                }
                "DATA" => {
                    commands.write().await.push(SmtpCommand::Data);
                    Self::respond(stream, config, &config.data_response.to_bytes()).await?;
                    if config.data_response.code != 354 {
                        continue;
                    }

                    let content = Self::read_message(stream).await?;
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::MessageContent(content));
                    Self::respond(stream, config, &config.data_end_response.to_bytes()).await?;
                }
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    Self::respond(stream, config, &config.quit_response.to_bytes()).await?;
                    return Ok(Outcome::Closed);
                }
                _ => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Other(cmd_line.clone()));
                    let response = SmtpResponse::new(500, "Unknown command");
                    Self::respond(stream, config, &response.to_bytes()).await?;
                }
            }
        }
    }

    /// Play the AUTH script. Every 334 step waits for a client line.
    async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut BufReader<S>,
        config: &MockServerConfig,
        commands: &RwLock<Vec<SmtpCommand>>,
    ) -> Result<(), BoxError> {
        let mut line = String::new();

        for step in &config.auth_script {
            Self::respond(stream, config, &step.to_bytes()).await?;
            if step.code != 334 {
                return Ok(());
            }

            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let reply = line.trim_end().to_string();
            commands
                .write()
                .await
                .push(SmtpCommand::AuthContinuation(reply.clone()));
            if reply == "*" {
                let response = SmtpResponse::new(501, "Authentication cancelled");
                Self::respond(stream, config, &response.to_bytes()).await?;
                return Ok(());
            }
        }

        let response = SmtpResponse::new(535, "Authentication script exhausted");
        Self::respond(stream, config, &response.to_bytes()).await?;
        Ok(())
    }

    /// Read until `<CRLF>.<CRLF>`, undoing dot-stuffing.
    async fn read_message<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut BufReader<S>,
    ) -> std::io::Result<Vec<u8>> {
        let mut content = Vec::new();
        let mut data_line = Vec::new();

        loop {
            data_line.clear();
            if stream.read_until(b'\n', &mut data_line).await? == 0 {
                return Ok(content);
            }

            if data_line == b".\r\n" {
                return Ok(content);
            }

            let unstuffed = data_line.strip_prefix(b".").unwrap_or(&data_line);
            content.extend_from_slice(unstuffed);
        }
    }
}

/// Extract `addr` from `FROM:<addr>` / `TO:<addr>`.
fn path_of(argument: &str, prefix: &str) -> String {
    let path = argument
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map_or(argument, |_| &argument[prefix.len()..]);

    path.split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn tls_acceptor() -> Result<TlsAcceptor, BoxError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let certs = vec![CertificateDer::from(cert.serialize_der()?)];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Set the EHLO response with capabilities
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, capabilities: Vec<String>) -> Self {
        self.config.ehlo_response = Some(EhloResponse { code, capabilities });
        self
    }

    /// Refuse EHLO with 502 so clients have to fall back to HELO
    #[must_use]
    pub fn without_ehlo(mut self) -> Self {
        self.config.ehlo_response = None;
        self
    }

    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the replies to AUTH and each following client line. Every 334
    /// entry waits for another line from the client.
    #[must_use]
    pub fn with_auth_script(mut self, script: Vec<(u16, &str)>) -> Self {
        self.config.auth_script = script
            .into_iter()
            .map(|(code, message)| SmtpResponse::new(code, message))
            .collect();
        self
    }

    /// Set a single reply to AUTH
    #[must_use]
    pub fn with_auth_response(self, code: u16, message: &str) -> Self {
        self.with_auth_script(vec![(code, message)])
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response for every RCPT TO
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response for the `index`th (0-based) RCPT TO of a session
    #[must_use]
    pub fn with_rcpt_to_response_at(
        mut self,
        index: usize,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.config
            .rcpt_to_overrides
            .insert(index, SmtpResponse::new(code, message));
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_quit_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.quit_response = SmtpResponse::new(code, message);
        self
    }

    /// Delay the greeting
    #[must_use]
    pub const fn with_connection_delay(mut self, delay: Duration) -> Self {
        self.config.connection_delay = Some(delay);
        self
    }

    /// Add a delay before sending each response
    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Build and start the mock SMTP server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or the certificate
    /// cannot be generated
    pub async fn build(self) -> Result<MockSmtpServer, BoxError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let acceptor = tls_acceptor()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let server_names = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let commands_clone = Arc::clone(&commands);
        let server_names_clone = Arc::clone(&server_names);
        let shutdown_clone = Arc::clone(&shutdown);

        tokio::spawn(async move {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }

                // Accept connection with timeout to allow checking shutdown flag
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    let config = Arc::clone(&config);
                    let acceptor = acceptor.clone();
                    let commands = Arc::clone(&commands_clone);
                    let server_names = Arc::clone(&server_names_clone);

                    tokio::spawn(async move {
                        if let Err(e) = MockSmtpServer::handle_client(
                            stream,
                            config,
                            acceptor,
                            commands,
                            server_names,
                        )
                        .await
                        {
                            tracing::debug!("Mock server client error: {}", e);
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            server_names,
            shutdown,
        })
    }
}
