use crate::client_types::*;
use crate::tls::TlsOptions;
use crate::traits::BoxedAsyncReadAndWrite;
use memchr::memmem::Finder;
use openssl::asn1::Asn1Time;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref, X509};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;

const MAX_LINE_LEN: usize = 4096;

static CRLF: LazyLock<Finder> = LazyLock::new(|| Finder::new("\r\n"));

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("response is not UTF8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Malformed Response: {0}")]
    MalformedResponseLine(String),
    #[error("Response line is too long")]
    ResponseTooLong,
    #[error("Not connected")]
    NotConnected,
    #[error("Command rejected {0:?}")]
    Rejected(Response),
    #[error("STARTTLS: {0} is not a valid DNS name")]
    InvalidDnsName(String),
    #[error("Timed Out connecting to {address} after {duration:?}")]
    TimeOutConnect { address: String, duration: Duration },
    #[error("Error {error} connecting to {address}")]
    ConnectError { address: String, error: String },
    #[error("Timed Out waiting {duration:?} for response to {command:?}")]
    TimeOutResponse {
        command: Option<Command>,
        duration: Duration,
    },
    #[error("Timed Out writing {duration:?} {command:?}")]
    TimeOutRequest {
        command: Command,
        duration: Duration,
    },
    #[error("Error {error} reading response to {command:?}")]
    ReadError {
        command: Option<Command>,
        error: String,
        partial: String,
    },
    #[error("Error {error} flushing send buffer")]
    FlushError { error: String },
    #[error("Error {error} writing {command:?}")]
    WriteError { command: Command, error: String },
    #[error("SSL Error: {0}")]
    SslErrorStack(#[from] openssl::error::ErrorStack),
}

impl ClientError {
    /// True when the error represents a timeout rather than an
    /// outright transport failure.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::TimeOutConnect { .. } | Self::TimeOutResponse { .. } | Self::TimeOutRequest { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsmtpCapability {
    pub name: String,
    pub param: Option<String>,
}

#[derive(Debug)]
pub struct SmtpClient {
    socket: Option<BoxedAsyncReadAndWrite>,
    hostname: String,
    capabilities: HashMap<String, EsmtpCapability>,
    read_buffer: Vec<u8>,
    timeouts: SmtpTimeouts,
}

fn extract_hostname(hostname: &str) -> &str {
    // Just the hostname, without any :port
    let fields: Vec<&str> = hostname.rsplitn(2, ':').collect();
    let hostname = if fields.len() == 2 {
        fields[1]
    } else {
        hostname
    };

    let hostname = if hostname.starts_with('[') && hostname.ends_with(']') {
        &hostname[1..hostname.len() - 1]
    } else {
        hostname
    };

    // Remove any trailing FQDN dot
    hostname.strip_suffix('.').unwrap_or(hostname)
}

impl SmtpClient {
    /// Connect to `host:port` within the configured connect timeout.
    pub async fn connect(host: &str, port: u16, timeouts: SmtpTimeouts) -> Result<Self, ClientError> {
        let address = format!("{}:{port}", extract_hostname(host));
        let stream = match timeout(timeouts.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(ClientError::ConnectError {
                    address,
                    error: format!("{err:#}"),
                });
            }
            Err(_) => {
                return Err(ClientError::TimeOutConnect {
                    address,
                    duration: timeouts.connect_timeout,
                });
            }
        };
        // No need for Nagle with SMTP request/response
        stream.set_nodelay(true).map_err(|err| ClientError::ConnectError {
            address: address.clone(),
            error: format!("{err:#}"),
        })?;
        Ok(Self::with_stream(stream, host, timeouts))
    }

    pub fn with_stream<S: crate::traits::AsyncReadAndWrite + 'static, H: AsRef<str>>(
        stream: S,
        peer_hostname: H,
        timeouts: SmtpTimeouts,
    ) -> Self {
        let hostname = extract_hostname(peer_hostname.as_ref()).to_string();

        Self {
            socket: Some(Box::new(stream)),
            hostname,
            capabilities: HashMap::new(),
            read_buffer: Vec::with_capacity(1024),
            timeouts,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    pub fn timeouts(&self) -> &SmtpTimeouts {
        &self.timeouts
    }

    pub fn capabilities(&self) -> &HashMap<String, EsmtpCapability> {
        &self.capabilities
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    async fn read_line(
        &mut self,
        timeout_duration: Duration,
        cmd: Option<&Command>,
    ) -> Result<String, ClientError> {
        let mut too_long = false;
        loop {
            if let Some(i) = CRLF.find(&self.read_buffer) {
                if too_long {
                    self.read_buffer.drain(0..i + 2);
                    return Err(ClientError::ResponseTooLong);
                }

                let line = String::from_utf8(self.read_buffer[0..i].to_vec());
                self.read_buffer.drain(0..i + 2);
                return Ok(line?);
            }
            if self.read_buffer.len() > MAX_LINE_LEN {
                self.read_buffer.clear();
                too_long = true;
            }

            // Didn't find a complete line, fill up the rest of the buffer
            let mut data = [0u8; MAX_LINE_LEN];
            let size = match self.socket.as_mut() {
                Some(s) => match timeout(timeout_duration, s.read(&mut data)).await {
                    Ok(Ok(size)) => size,
                    Ok(Err(err)) => {
                        self.socket.take();
                        return Err(ClientError::ReadError {
                            command: cmd.cloned(),
                            error: format!("{err:#}"),
                            partial: String::from_utf8_lossy(&self.read_buffer).to_string(),
                        });
                    }
                    Err(_) => {
                        self.socket.take();
                        return Err(ClientError::TimeOutResponse {
                            command: cmd.cloned(),
                            duration: timeout_duration,
                        });
                    }
                },
                None => {
                    return Err(ClientError::ReadError {
                        command: cmd.cloned(),
                        error: "the socket was closed in response to an earlier issue".to_string(),
                        partial: String::from_utf8_lossy(&self.read_buffer).to_string(),
                    });
                }
            };
            if size == 0 {
                self.socket.take();
                return Err(ClientError::ReadError {
                    command: cmd.cloned(),
                    error: "Connection closed by peer".to_string(),
                    partial: String::from_utf8_lossy(&self.read_buffer).to_string(),
                });
            }
            self.read_buffer.extend_from_slice(&data[0..size]);
        }
    }

    pub async fn read_response(
        &mut self,
        command: Option<&Command>,
        timeout_duration: Duration,
    ) -> Result<Response, ClientError> {
        if let Some(sock) = self.socket.as_mut() {
            if let Err(err) = sock.flush().await {
                self.socket.take();
                return Err(ClientError::FlushError {
                    error: format!("{err:#}"),
                });
            }
        }

        let mut line = self.read_line(timeout_duration, command).await?;
        tracing::trace!("recv<-{}: {line}", self.hostname);
        let mut parsed = parse_response_line(&line)?;
        let mut response_builder = ResponseBuilder::new(&parsed);

        let subsequent_line_timeout_duration = Duration::from_secs(60).min(timeout_duration);
        while !parsed.is_final {
            line = self
                .read_line(subsequent_line_timeout_duration, command)
                .await?;
            parsed = parse_response_line(&line)?;
            response_builder
                .add_line(&parsed)
                .map_err(ClientError::MalformedResponseLine)?;
        }

        let response = response_builder.build(command.map(|cmd| cmd.encode()));

        tracing::trace!("{}: {response:?}", self.hostname);

        Ok(response)
    }

    /// Read the initial 220 banner the server sends on connect.
    pub async fn read_greeting(&mut self) -> Result<Response, ClientError> {
        self.read_response(None, self.timeouts.greeting_timeout)
            .await
    }

    async fn write_command_request(&mut self, command: &Command) -> Result<(), ClientError> {
        let line = command.encode();
        tracing::trace!("send->{}: {line}", self.hostname);

        let timeout_duration = command.client_timeout(&self.timeouts);
        match self.socket.as_mut() {
            Some(socket) => match timeout(timeout_duration, socket.write_all(line.as_bytes())).await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => {
                    self.socket.take();
                    Err(ClientError::WriteError {
                        command: command.clone(),
                        error: format!("{err:#}"),
                    })
                }
                Err(_) => {
                    self.socket.take();
                    Err(ClientError::TimeOutRequest {
                        command: command.clone(),
                        duration: timeout_duration,
                    })
                }
            },
            None => Err(ClientError::NotConnected),
        }
    }

    pub async fn send_command(&mut self, command: &Command) -> Result<Response, ClientError> {
        self.write_command_request(command).await?;
        self.read_response(Some(command), command.client_timeout(&self.timeouts))
            .await
    }

    pub async fn ehlo(
        &mut self,
        ehlo_name: &str,
    ) -> Result<&HashMap<String, EsmtpCapability>, ClientError> {
        let response = self
            .send_command(&Command::Ehlo(ehlo_name.to_string()))
            .await?;
        if response.code != 250 {
            return Err(ClientError::Rejected(response));
        }

        let mut capabilities = HashMap::new();

        for line in response.content.lines().skip(1) {
            let mut fields = line.splitn(2, ' ');
            if let Some(name) = fields.next() {
                let param = fields.next().map(|s| s.to_string());
                let cap = EsmtpCapability {
                    name: name.to_string(),
                    param,
                };
                capabilities.insert(name.to_ascii_uppercase(), cap);
            }
        }

        self.capabilities = capabilities;
        Ok(&self.capabilities)
    }

    pub async fn helo(&mut self, helo_name: &str) -> Result<Response, ClientError> {
        let response = self
            .send_command(&Command::Helo(helo_name.to_string()))
            .await?;
        if response.code != 250 {
            return Err(ClientError::Rejected(response));
        }
        Ok(response)
    }

    /// EHLO, falling back to HELO when the server rejects EHLO with a
    /// 4xx/5xx, as some legacy servers do.
    pub async fn ehlo_or_helo(&mut self, name: &str) -> Result<(), ClientError> {
        match self.ehlo(name).await {
            Ok(_) => Ok(()),
            Err(ClientError::Rejected(resp)) if resp.code >= 400 => {
                self.helo(name).await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn mail_from(&mut self, address: &str) -> Result<Response, ClientError> {
        self.send_command(&Command::MailFrom(address.to_string()))
            .await
    }

    pub async fn rcpt_to(&mut self, address: &str) -> Result<Response, ClientError> {
        self.send_command(&Command::RcptTo(address.to_string()))
            .await
    }

    pub async fn noop(&mut self) -> Result<Response, ClientError> {
        self.send_command(&Command::Noop).await
    }

    pub async fn rset(&mut self) -> Result<Response, ClientError> {
        self.send_command(&Command::Rset).await
    }

    /// QUIT and drop the connection. The response is returned so that
    /// callers can score the acknowledgement behaviour.
    pub async fn quit(&mut self) -> Result<Response, ClientError> {
        let result = self.send_command(&Command::Quit).await;
        self.socket.take();
        result
    }

    /// Attempt a STARTTLS upgrade.
    /// Returns Err for IO errors.
    /// On completion the result is either information about the peer's
    /// TLS configuration, or the handshake error message.
    pub async fn starttls(&mut self, options: TlsOptions) -> Result<TlsStatus, ClientError> {
        let resp = self.send_command(&Command::StartTls).await?;
        if resp.code != 220 {
            return Err(ClientError::Rejected(resp));
        }

        let connector = options.build_tls_connector();
        let server_name = match IpAddr::from_str(self.hostname.as_str()) {
            Ok(ip) => ServerName::IpAddress(ip.into()),
            Err(_) => ServerName::try_from(self.hostname.clone())
                .map_err(|_| ClientError::InvalidDnsName(self.hostname.clone()))?,
        };

        let plain = match self.socket.take() {
            Some(s) => s,
            None => return Err(ClientError::NotConnected),
        };

        let handshake = connector.connect(server_name, plain).into_fallible();
        match timeout(self.timeouts.starttls_timeout, handshake).await {
            Err(_) => Err(ClientError::TimeOutResponse {
                command: Some(Command::StartTls),
                duration: self.timeouts.starttls_timeout,
            }),
            Ok(Ok(stream)) => {
                let mut info = TlsPeerInfo::default();
                {
                    let (_, conn) = stream.get_ref();
                    info.cipher = match conn.negotiated_cipher_suite() {
                        Some(suite) => suite.suite().as_str().unwrap_or("UNKNOWN").to_string(),
                        None => String::new(),
                    };
                    info.protocol_version = match conn.protocol_version() {
                        Some(version) => version.as_str().unwrap_or("UNKNOWN").to_string(),
                        None => String::new(),
                    };

                    if let Some(certs) = conn.peer_certificates() {
                        let peer_cert = &certs[0];
                        if let Ok(cert) = X509::from_der(peer_cert.as_ref()) {
                            info.apply_certificate(&cert)?;
                        }
                    }
                }
                self.socket.replace(Box::new(stream));
                Ok(TlsStatus::Info(info))
            }
            Ok(Err((err, stream))) => {
                // The plain stream is handed back so that the session can
                // continue in clear text; whether that is useful depends on
                // how far the peer got into the handshake.
                self.socket.replace(stream);
                Ok(TlsStatus::FailedHandshake(format!("{err:#}")))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub enum TlsStatus {
    FailedHandshake(String),
    Info(TlsPeerInfo),
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub struct TlsPeerInfo {
    pub cipher: String,
    pub protocol_version: String,
    pub subject_name: Vec<String>,
    pub subject_common_name: Option<String>,
    pub issuer_common_name: Option<String>,
    pub self_signed: bool,
    pub expired: bool,
}

impl TlsPeerInfo {
    fn apply_certificate(&mut self, cert: &X509Ref) -> Result<(), openssl::error::ErrorStack> {
        self.subject_name = name_entries(cert.subject_name());
        self.subject_common_name = common_name(cert.subject_name());
        self.issuer_common_name = common_name(cert.issuer_name());
        self.self_signed = name_entries(cert.issuer_name()) == self.subject_name;
        let now = Asn1Time::days_from_now(0)?;
        self.expired = cert.not_after() < &*now;
        Ok(())
    }
}

/// Extracts the object=name pairs from a cert name.
/// eg:
/// ```norun
/// ["C=US", "ST=CA", "L=SanFrancisco", "O=Fort-Funston",
/// "CN=mx.example.com", "emailAddress=me@myhost.mydomain"]
/// ```
fn name_entries(name: &X509NameRef) -> Vec<String> {
    let mut entries = vec![];
    for entry in name.entries() {
        if let Ok(obj) = entry.object().nid().short_name() {
            if let Ok(value) = entry.data().as_utf8() {
                entries.push(format!("{obj}={value}"));
            }
        }
    }
    entries
}

fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|value| value.to_string())
}

pub fn parse_response_line(line: &str) -> Result<ResponseLine, ClientError> {
    if line.len() < 4 {
        return Err(ClientError::MalformedResponseLine(line.to_string()));
    }

    match line.as_bytes()[3] {
        b' ' | b'-' => match line[0..3].parse::<u16>() {
            Ok(code) => Ok(ResponseLine {
                code,
                is_final: line.as_bytes()[3] == b' ',
                content: &line[4..],
            }),
            Err(_) => Err(ClientError::MalformedResponseLine(line.to_string())),
        },
        _ => Err(ClientError::MalformedResponseLine(line.to_string())),
    }
}
