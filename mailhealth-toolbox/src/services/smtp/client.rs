//! Line-level SMTP session over a boxed stream.

use std::io;
use std::time::Duration;

use rustls_pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use super::BoxedStream;
use super::response::{Reply, parse_reply};
use crate::utils::log_sanitizer::truncate_for_log;

/// Read chunk size.
const READ_CHUNK: usize = 4096;

/// Upper bound for a single buffered reply.
const MAX_REPLY_BYTES: usize = 64 * 1024;

/// Failure below the SMTP reply level.
#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("timed out after {timeout_ms} ms waiting for {stage}")]
    Timeout { stage: &'static str, timeout_ms: u128 },

    #[error("connection closed by server during {0}")]
    Closed(&'static str),

    #[error("I/O error during {stage}: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("protocol error during {stage}: {detail}")]
    Protocol { stage: &'static str, detail: String },

    #[error("TLS handshake failed: {0}")]
    Tls(String),
}

pub(crate) struct SmtpSession {
    stream: Option<BoxedStream>,
    buffer: Vec<u8>,
    command_timeout: Duration,
    tls: bool,
}

impl SmtpSession {
    pub(crate) fn new(stream: BoxedStream, command_timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            buffer: Vec::with_capacity(READ_CHUNK),
            command_timeout,
            tls: false,
        }
    }

    pub(crate) const fn is_tls(&self) -> bool {
        self.tls
    }

    fn timeout_error(&self, stage: &'static str) -> SessionError {
        SessionError::Timeout {
            stage,
            timeout_ms: self.command_timeout.as_millis(),
        }
    }

    /// Read the next complete reply.
    pub(crate) async fn read_reply(&mut self, stage: &'static str) -> Result<Reply, SessionError> {
        match timeout(self.command_timeout, self.read_reply_inner(stage)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(stage)),
        }
    }

    async fn read_reply_inner(&mut self, stage: &'static str) -> Result<Reply, SessionError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match parse_reply(&self.buffer) {
                Ok(Some((reply, consumed))) => {
                    self.buffer.drain(..consumed);
                    log::debug!("[SMTP] < {}", truncate_for_log(&reply.to_string()));
                    return Ok(reply);
                }
                Ok(None) => {}
                Err(detail) => return Err(SessionError::Protocol { stage, detail }),
            }
            if self.buffer.len() > MAX_REPLY_BYTES {
                return Err(SessionError::Protocol {
                    stage,
                    detail: format!("reply exceeds {MAX_REPLY_BYTES} bytes"),
                });
            }

            let stream = self.stream.as_mut().ok_or(SessionError::Closed(stage))?;
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|source| SessionError::Io { stage, source })?;
            if n == 0 {
                return Err(SessionError::Closed(stage));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn write_line(&mut self, line: &str, stage: &'static str) -> Result<(), SessionError> {
        let stream = self.stream.as_mut().ok_or(SessionError::Closed(stage))?;
        let write = async {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\r\n").await?;
            stream.flush().await
        };
        match timeout(self.command_timeout, write).await {
            Ok(result) => result.map_err(|source| SessionError::Io { stage, source }),
            Err(_) => Err(self.timeout_error(stage)),
        }
    }

    /// Send one command line and read its reply.
    pub(crate) async fn command(&mut self, line: &str, stage: &'static str) -> Result<Reply, SessionError> {
        log::debug!("[SMTP] > {line}");
        self.write_line(line, stage).await?;
        self.read_reply(stage).await
    }

    /// Like [`command`](Self::command), logging `shown` instead of the line.
    pub(crate) async fn secret_command(
        &mut self,
        line: &str,
        shown: &str,
        stage: &'static str,
    ) -> Result<Reply, SessionError> {
        log::debug!("[SMTP] > {shown}");
        self.write_line(line, stage).await?;
        self.read_reply(stage).await
    }

    /// Send a message body after a 354 and read the final reply.
    ///
    /// Line endings are normalised to CRLF and lines starting with `.` are dot-stuffed.
    pub(crate) async fn send_message(&mut self, message: &str) -> Result<Reply, SessionError> {
        const STAGE: &str = "end of data";
        let payload = dot_stuff(message);
        log::debug!("[SMTP] > <message, {} bytes>", payload.len());

        let stream = self.stream.as_mut().ok_or(SessionError::Closed(STAGE))?;
        let write = async {
            stream.write_all(payload.as_bytes()).await?;
            stream.write_all(b".\r\n").await?;
            stream.flush().await
        };
        match timeout(self.command_timeout, write).await {
            Ok(result) => result.map_err(|source| SessionError::Io {
                stage: STAGE,
                source,
            })?,
            Err(_) => return Err(self.timeout_error(STAGE)),
        }
        self.read_reply(STAGE).await
    }

    /// Replace the plain stream with a TLS stream.
    pub(crate) async fn upgrade_tls(
        &mut self,
        connector: &TlsConnector,
        server_name: ServerName<'static>,
    ) -> Result<(), SessionError> {
        // Anything already buffered was sent before the handshake and must not be trusted.
        if !self.buffer.is_empty() {
            return Err(SessionError::Tls(
                "server sent unexpected data before the TLS handshake".to_string(),
            ));
        }
        let stream = self
            .stream
            .take()
            .ok_or(SessionError::Closed("TLS handshake"))?;
        match timeout(self.command_timeout, connector.connect(server_name, stream)).await {
            Ok(Ok(tls_stream)) => {
                self.stream = Some(Box::new(tls_stream));
                self.tls = true;
                Ok(())
            }
            Ok(Err(e)) => Err(SessionError::Tls(e.to_string())),
            Err(_) => Err(self.timeout_error("TLS handshake")),
        }
    }

    /// Best-effort QUIT; errors are ignored.
    pub(crate) async fn quit(&mut self) {
        if let Err(e) = self.command("QUIT", "QUIT").await {
            log::debug!("[SMTP] QUIT failed (ignored): {e}");
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// Normalise to CRLF, dot-stuff, and make sure the body ends with CRLF.
pub(crate) fn dot_stuff(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 16);
    for line in message.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    // `split` yields a trailing empty piece for input ending in '\n'.
    if message.ends_with('\n') {
        out.truncate(out.len() - 2);
    }
    out
}
