//! Single NNTP connection
//!
//! Explicit state machine over one TCP (optionally TLS) socket:
//! `disconnected → connecting → authenticating → ready ⇄ busy →
//! disconnected`. The protocol is strictly one command at a time per
//! connection; the pool enforces exclusive access while a command runs.
//!
//! # Commands used
//!
//! - `AUTHINFO USER/PASS` - authentication
//! - `BODY <message-id>` - article body (the yEnc payload)
//! - `STAT <message-id>` - existence probe
//! - `DATE` - keepalive
//! - `QUIT` - orderly close

use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;
use tracing::{debug, info};

use crate::config::NntpProviderConfig;

use super::NntpError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Busy,
}

enum NntpStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

impl NntpStream {
    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            NntpStream::Plain(reader) => reader.get_mut().write_all(data).await,
            NntpStream::Tls(reader) => reader.get_mut().write_all(data).await,
        }
    }

    /// Read one raw line including the trailing LF. Article bodies are
    /// arbitrary bytes, so lines are never assumed to be UTF-8.
    async fn read_raw_line(&mut self, buf: &mut Vec<u8>) -> std::io::Result<usize> {
        match self {
            NntpStream::Plain(reader) => reader.read_until(b'\n', buf).await,
            NntpStream::Tls(reader) => reader.read_until(b'\n', buf).await,
        }
    }
}

/// A single-line NNTP response
#[derive(Debug)]
struct NntpResponse {
    code: u16,
    message: String,
}

impl NntpResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// One NNTP connection to a provider
pub struct NntpConnection {
    config: NntpProviderConfig,
    stream: Option<NntpStream>,
    state: ConnectionState,
    last_used: Instant,
}

impl NntpConnection {
    /// Connect, read the greeting, and authenticate if credentials are
    /// configured.
    pub async fn connect(config: NntpProviderConfig) -> Result<Self, NntpError> {
        let mut conn = Self {
            config,
            stream: None,
            state: ConnectionState::Connecting,
            last_used: Instant::now(),
        };

        let addr = format!("{}:{}", conn.config.host, conn.config.port);
        debug!(addr = %addr, tls = conn.config.use_tls, "Connecting to NNTP server");

        let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| NntpError::Timeout("connect"))?
            .map_err(|e| NntpError::Io(format!("connect {addr}: {e}")))?;

        if conn.config.use_tls {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| NntpError::Io(format!("TLS connector: {e}")))?;
            let connector = tokio_native_tls::TlsConnector::from(connector);
            let tls = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(&conn.config.host, tcp))
                .await
                .map_err(|_| NntpError::Timeout("tls handshake"))?
                .map_err(|e| NntpError::Io(format!("TLS handshake: {e}")))?;
            conn.stream = Some(NntpStream::Tls(Box::new(BufReader::new(tls))));
        } else {
            conn.stream = Some(NntpStream::Plain(BufReader::new(tcp)));
        }

        let greeting = conn.read_response(COMMAND_TIMEOUT).await?;
        if !matches!(greeting.code, 200 | 201) {
            return Err(NntpError::Protocol(format!(
                "unexpected greeting: {} {}",
                greeting.code, greeting.message
            )));
        }

        if let (Some(user), Some(pass)) = (
            conn.config.username.clone(),
            conn.config.password.clone(),
        ) {
            conn.state = ConnectionState::Authenticating;
            conn.authenticate(&user, &pass).await?;
        }

        conn.state = ConnectionState::Ready;
        conn.last_used = Instant::now();
        info!(host = %conn.config.host, "NNTP connection ready");
        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// How long the connection has sat idle
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Fetch an article body by message ID
    pub async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        let mid = normalize_message_id(message_id);
        self.begin_busy()?;
        let result = self.body_command(&mid).await;
        self.settle(result)
    }

    async fn body_command(&mut self, mid: &str) -> Result<Vec<u8>, NntpError> {
        self.send_command(&format!("BODY {mid}")).await?;
        let (code, message) = self.read_status_line(COMMAND_TIMEOUT).await?;
        match code {
            222 => self.read_multiline_body(BODY_TIMEOUT).await,
            420 | 430 => Err(NntpError::NotFound(code)),
            400 => Err(NntpError::ServiceUnavailable(message)),
            480 | 482 => Err(NntpError::Auth(message)),
            _ => Err(NntpError::Protocol(format!("BODY: {code} {message}"))),
        }
    }

    /// Check whether an article exists
    pub async fn stat(&mut self, message_id: &str) -> Result<bool, NntpError> {
        let mid = normalize_message_id(message_id);
        self.begin_busy()?;
        let result = self.stat_command(&mid).await;
        self.settle(result)
    }

    async fn stat_command(&mut self, mid: &str) -> Result<bool, NntpError> {
        self.send_command(&format!("STAT {mid}")).await?;
        let (code, message) = self.read_status_line(COMMAND_TIMEOUT).await?;
        match code {
            223 => Ok(true),
            420 | 430 => Ok(false),
            400 => Err(NntpError::ServiceUnavailable(message)),
            480 | 482 => Err(NntpError::Auth(message)),
            _ => Err(NntpError::Protocol(format!("STAT: {code} {message}"))),
        }
    }

    /// Issue a `DATE` keepalive; errors are swallowed and reported as a
    /// dead connection.
    pub async fn keepalive(&mut self) -> bool {
        if self.begin_busy().is_err() {
            return false;
        }
        let result = self.date_command().await;
        match self.settle(result) {
            Ok(()) => true,
            Err(e) => {
                debug!(host = %self.config.host, error = %e, "Keepalive failed");
                false
            }
        }
    }

    async fn date_command(&mut self) -> Result<(), NntpError> {
        self.send_command("DATE").await?;
        self.read_status_line(COMMAND_TIMEOUT).await.map(|_| ())
    }

    /// Orderly shutdown
    pub async fn quit(mut self) {
        if self.stream.is_some() {
            let _ = self.send_command("QUIT").await;
            let _ = self.read_response(Duration::from_secs(2)).await;
        }
        self.state = ConnectionState::Disconnected;
    }

    fn begin_busy(&mut self) -> Result<(), NntpError> {
        if self.state != ConnectionState::Ready {
            return Err(NntpError::Protocol(format!(
                "connection not ready (state {:?})",
                self.state
            )));
        }
        self.state = ConnectionState::Busy;
        Ok(())
    }

    /// Restore state after a command: article-level misses keep the socket
    /// healthy, every other error drops the connection.
    fn settle<T>(&mut self, result: Result<T, NntpError>) -> Result<T, NntpError> {
        match &result {
            Ok(_) => {
                self.state = ConnectionState::Ready;
                self.last_used = Instant::now();
            }
            Err(e) if e.is_not_found() => {
                self.state = ConnectionState::Ready;
                self.last_used = Instant::now();
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                self.stream = None;
            }
        }
        result
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), NntpError> {
        self.send_command(&format!("AUTHINFO USER {username}")).await?;
        let response = self.read_response(COMMAND_TIMEOUT).await?;

        if response.code == 381 {
            self.send_command(&format!("AUTHINFO PASS {password}")).await?;
            let response = self.read_response(COMMAND_TIMEOUT).await?;
            if !response.is_success() {
                return Err(NntpError::Auth(format!(
                    "{} {}",
                    response.code, response.message
                )));
            }
        } else if !response.is_success() {
            return Err(NntpError::Auth(format!(
                "{} {}",
                response.code, response.message
            )));
        }

        debug!(host = %self.config.host, "NNTP authentication successful");
        Ok(())
    }

    async fn send_command(&mut self, command: &str) -> Result<(), NntpError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| NntpError::Io("not connected".to_string()))?;

        let log_cmd = if command.starts_with("AUTHINFO PASS") {
            "AUTHINFO PASS ****"
        } else {
            command
        };
        debug!(command = %log_cmd, "Sending NNTP command");

        let line = format!("{command}\r\n");
        tokio::time::timeout(COMMAND_TIMEOUT, stream.write_all(line.as_bytes()))
            .await
            .map_err(|_| NntpError::Timeout("write"))?
            .map_err(|e| NntpError::Io(format!("write: {e}")))
    }

    async fn read_response(&mut self, timeout: Duration) -> Result<NntpResponse, NntpError> {
        let (code, message) = self.read_status_line(timeout).await?;
        Ok(NntpResponse { code, message })
    }

    async fn read_status_line(&mut self, timeout: Duration) -> Result<(u16, String), NntpError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| NntpError::Io("not connected".to_string()))?;

        let mut line = Vec::new();
        let n = tokio::time::timeout(timeout, stream.read_raw_line(&mut line))
            .await
            .map_err(|_| NntpError::Timeout("read"))?
            .map_err(|e| NntpError::Io(format!("read: {e}")))?;
        if n == 0 {
            return Err(NntpError::Io("connection closed by server".to_string()));
        }

        let line = String::from_utf8_lossy(&line);
        parse_status_line(line.trim_end())
    }

    /// Read a dot-terminated multiline body, undoing dot-stuffing
    async fn read_multiline_body(&mut self, timeout: Duration) -> Result<Vec<u8>, NntpError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| NntpError::Io("not connected".to_string()))?;

        let deadline = Instant::now() + timeout;
        let mut data = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NntpError::Timeout("body"));
            }

            let mut line = Vec::new();
            let n = tokio::time::timeout(remaining, stream.read_raw_line(&mut line))
                .await
                .map_err(|_| NntpError::Timeout("body"))?
                .map_err(|e| NntpError::Io(format!("body read: {e}")))?;
            if n == 0 {
                return Err(NntpError::Io("connection closed mid-body".to_string()));
            }

            let mut trimmed: &[u8] = &line;
            while let Some(rest) = trimmed.strip_suffix(b"\n").or_else(|| trimmed.strip_suffix(b"\r")) {
                trimmed = rest;
            }
            if trimmed == b"." {
                break;
            }

            // Undo dot-stuffing: a line sent as ".." began life as "."
            let content = if trimmed.starts_with(b"..") {
                &trimmed[1..]
            } else {
                trimmed
            };
            data.extend_from_slice(content);
            data.extend_from_slice(b"\r\n");
        }

        Ok(data)
    }
}

/// Ensure angle brackets around a message ID
fn normalize_message_id(id: &str) -> String {
    if id.starts_with('<') && id.ends_with('>') {
        id.to_string()
    } else {
        format!("<{id}>")
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String), NntpError> {
    if line.len() < 3 {
        return Err(NntpError::Protocol(format!("short response: {line:?}")));
    }
    let code: u16 = line[..3]
        .parse()
        .map_err(|_| NntpError::Protocol(format!("bad response code: {line:?}")))?;
    let message = line.get(4..).unwrap_or("").to_string();
    Ok((code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_normalization() {
        assert_eq!(normalize_message_id("abc@example.com"), "<abc@example.com>");
        assert_eq!(normalize_message_id("<abc@example.com>"), "<abc@example.com>");
    }

    #[test]
    fn status_line_parsing() {
        let (code, message) = parse_status_line("200 news.example.com ready").unwrap();
        assert_eq!(code, 200);
        assert_eq!(message, "news.example.com ready");

        let (code, _) = parse_status_line("430").unwrap();
        assert_eq!(code, 430);

        assert!(parse_status_line("hi").is_err());
        assert!(parse_status_line("abc welcome").is_err());
    }
}
