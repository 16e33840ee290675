//! Live SMTP submission probe.
//!
//! One attempt per call, never retried: repeated AUTH failures can lock the
//! account. Every stage is bounded by a timeout and the whole probe by a deadline.

mod client;
mod response;

use std::io;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::SmtpConfig;
use crate::error::{ToolboxError, ToolboxResult};
use crate::services::classifier;
use crate::types::{SmtpCredentials, SmtpProbeOutcome, SmtpProbeResult};
use crate::utils::log_sanitizer::mask_secret;

use client::{SessionError, SmtpSession};
pub use response::Reply;

/// Byte stream an SMTP session runs over (plain TCP, TLS, or an in-memory pipe in tests).
pub trait SmtpStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SmtpStream for T {}

pub type BoxedStream = Box<dyn SmtpStream>;

/// Upper bound for the closing QUIT, which runs after the deadline-bounded session.
const QUIT_GRACE: Duration = Duration::from_secs(2);

/// Opens the transport connection for a probe.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

/// [`SmtpConnector`] over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl SmtpConnector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Install the ring crypto provider as the process default if none is set yet.
fn ensure_crypto_provider() {
    // Err means a provider is already installed.
    let _ = CryptoProvider::install_default(rustls::crypto::ring::default_provider());
}

static TLS_CONNECTOR: LazyLock<TlsConnector> = LazyLock::new(|| {
    ensure_crypto_provider();
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
});

/// Reject addresses that would break the SMTP envelope or headers.
pub fn validate_address(field: &str, address: &str) -> ToolboxResult<()> {
    let invalid = |why: &str| {
        Err(ToolboxError::ValidationError(format!(
            "{field} address '{address}' {why}"
        )))
    };
    if address.contains(['\r', '\n']) {
        return invalid("contains a line break");
    }
    if address.contains(['<', '>']) || address.chars().any(char::is_whitespace) {
        return invalid("must be a bare address without brackets or spaces");
    }
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => invalid("must contain exactly one '@' with a local part and a domain"),
    }
}

/// Validate everything a probe needs before any connection is opened.
pub fn validate_probe_request(
    credentials: &SmtpCredentials,
    from: &str,
    to: &str,
) -> ToolboxResult<()> {
    let host = credentials.host.trim();
    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ToolboxError::ValidationError(
            "SMTP host must be a non-empty host name or address".to_string(),
        ));
    }
    if credentials.port == 0 {
        return Err(ToolboxError::ValidationError(
            "SMTP port must be between 1 and 65535".to_string(),
        ));
    }
    if credentials.user.is_empty() || credentials.pass.is_empty() {
        return Err(ToolboxError::ValidationError(
            "SMTP user and password are required".to_string(),
        ));
    }
    if credentials.user.contains(['\r', '\n', '\0']) || credentials.pass.contains(['\r', '\n', '\0']) {
        return Err(ToolboxError::ValidationError(
            "SMTP credentials must not contain line breaks or NUL".to_string(),
        ));
    }
    validate_address("from", from)?;
    validate_address("to", to)
}

/// Terminal failure of a probe stage.
struct Failure {
    outcome: SmtpProbeOutcome,
    raw: String,
}

impl Failure {
    fn new(outcome: SmtpProbeOutcome, raw: impl Into<String>) -> Self {
        Self {
            outcome,
            raw: raw.into(),
        }
    }

    fn reply(outcome: SmtpProbeOutcome, reply: &Reply) -> Self {
        Self::new(outcome, reply.to_string())
    }
}

impl From<SessionError> for Failure {
    fn from(err: SessionError) -> Self {
        let outcome = match &err {
            SessionError::Timeout { .. } => SmtpProbeOutcome::Timeout,
            SessionError::Io { source, .. } if source.kind() == io::ErrorKind::TimedOut => {
                SmtpProbeOutcome::Timeout
            }
            SessionError::Tls(_) => SmtpProbeOutcome::TlsFailed,
            SessionError::Closed(_) | SessionError::Io { .. } | SessionError::Protocol { .. } => {
                SmtpProbeOutcome::ConnectionFailed
            }
        };
        Self::new(outcome, err.to_string())
    }
}

/// Run one probe: connect, secure, authenticate, submit a test message.
///
/// Inputs must already have passed [`validate_probe_request`].
pub async fn probe(
    connector: &dyn SmtpConnector,
    config: &SmtpConfig,
    credentials: &SmtpCredentials,
    from: &str,
    to: &str,
) -> SmtpProbeResult {
    log::info!(
        "[SMTP] Probing {}:{} as {} (secure={})",
        credentials.host,
        credentials.port,
        mask_secret(&credentials.user),
        credentials.secure
    );
    let started = Instant::now();
    let deadline = config.deadline();

    let result = match timeout(deadline, run_session(connector, config, credentials, from, to)).await
    {
        Ok(result) => result,
        Err(_) => Err(Failure::new(
            SmtpProbeOutcome::Timeout,
            format!("SMTP probe timed out after {} ms", deadline.as_millis()),
        )),
    };
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(mut session) => {
            log::info!("[SMTP] Test message accepted by {} in {latency_ms} ms", credentials.host);
            // The message is already queued; a stalled QUIT does not change the outcome.
            if timeout(config.command_timeout().min(QUIT_GRACE), session.quit())
                .await
                .is_err()
            {
                log::debug!("[SMTP] {} did not answer QUIT, closing", credentials.host);
            }
            SmtpProbeResult {
                outcome: SmtpProbeOutcome::Sent,
                raw_error: None,
                latency_ms,
                diagnosis: None,
            }
        }
        Err(failure) => {
            log::warn!(
                "[SMTP] Probe to {} ended with {:?} after {latency_ms} ms: {}",
                credentials.host,
                failure.outcome,
                failure.raw
            );
            SmtpProbeResult {
                outcome: failure.outcome,
                diagnosis: Some(classifier::classify(&failure.raw)),
                raw_error: Some(failure.raw),
                latency_ms,
            }
        }
    }
}

async fn run_session(
    connector: &dyn SmtpConnector,
    config: &SmtpConfig,
    credentials: &SmtpCredentials,
    from: &str,
    to: &str,
) -> Result<SmtpSession, Failure> {
    let host = credentials.host.trim();
    let stream = match timeout(config.connect_timeout(), connector.connect(host, credentials.port)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
            return Err(Failure::new(
                SmtpProbeOutcome::Timeout,
                format!("connection to {host}:{} timed out: {e}", credentials.port),
            ));
        }
        Ok(Err(e)) => {
            return Err(Failure::new(
                SmtpProbeOutcome::ConnectionFailed,
                format!("connection to {host}:{} failed: {e}", credentials.port),
            ));
        }
        Err(_) => {
            return Err(Failure::new(
                SmtpProbeOutcome::Timeout,
                format!(
                    "connection to {host}:{} timed out after {} ms",
                    credentials.port,
                    config.connect_timeout().as_millis()
                ),
            ));
        }
    };

    let mut session = SmtpSession::new(stream, config.command_timeout());
    let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
        Failure::new(
            SmtpProbeOutcome::TlsFailed,
            format!("'{host}' is not a valid TLS server name: {e}"),
        )
    })?;

    if credentials.secure {
        session.upgrade_tls(&TLS_CONNECTOR, server_name.clone()).await?;
    }

    let greeting = session.read_reply("greeting").await?;
    if greeting.code != 220 {
        return Err(Failure::reply(SmtpProbeOutcome::ConnectionFailed, &greeting));
    }

    let helo_name = config
        .helo_name
        .clone()
        .or_else(|| from.rsplit_once('@').map(|(_, domain)| domain.to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    let mut ehlo = expect_ehlo(&mut session, &helo_name).await?;

    if !session.is_tls() {
        if ehlo.has_capability("STARTTLS") {
            let reply = session.command("STARTTLS", "STARTTLS").await?;
            if reply.code != 220 {
                return Err(Failure::reply(SmtpProbeOutcome::TlsFailed, &reply));
            }
            session.upgrade_tls(&TLS_CONNECTOR, server_name).await?;
            ehlo = expect_ehlo(&mut session, &helo_name).await?;
        } else if config.allow_plaintext_auth {
            log::warn!("[SMTP] {host} does not offer STARTTLS; authenticating in plaintext");
        } else {
            return Err(Failure::new(
                SmtpProbeOutcome::TlsFailed,
                format!("{host} does not advertise STARTTLS; refusing to send credentials in plaintext"),
            ));
        }
    }

    authenticate(&mut session, &ehlo, credentials).await?;

    let reply = session.command(&format!("MAIL FROM:<{from}>"), "MAIL FROM").await?;
    if reply.code != 250 {
        return Err(Failure::reply(SmtpProbeOutcome::Rejected, &reply));
    }
    let reply = session.command(&format!("RCPT TO:<{to}>"), "RCPT TO").await?;
    if !matches!(reply.code, 250 | 251) {
        return Err(Failure::reply(SmtpProbeOutcome::Rejected, &reply));
    }
    let reply = session.command("DATA", "DATA").await?;
    if reply.code != 354 {
        return Err(Failure::reply(SmtpProbeOutcome::Rejected, &reply));
    }
    let reply = session.send_message(&build_test_message(from, to)).await?;
    if reply.code != 250 {
        return Err(Failure::reply(SmtpProbeOutcome::Rejected, &reply));
    }

    Ok(session)
}

async fn expect_ehlo(session: &mut SmtpSession, helo_name: &str) -> Result<Reply, Failure> {
    let reply = session.command(&format!("EHLO {helo_name}"), "EHLO").await?;
    if reply.code == 250 {
        Ok(reply)
    } else {
        Err(Failure::reply(SmtpProbeOutcome::Rejected, &reply))
    }
}

/// AUTH PLAIN when offered, otherwise (or when PLAIN is refused as unsupported) AUTH LOGIN.
async fn authenticate(
    session: &mut SmtpSession,
    ehlo: &Reply,
    credentials: &SmtpCredentials,
) -> Result<(), Failure> {
    use base64::{Engine, engine::general_purpose::STANDARD};

    let mechanisms = ehlo.auth_mechanisms();
    let offers = |name: &str| mechanisms.iter().any(|m| m == name);

    if offers("PLAIN") {
        let token = STANDARD.encode(format!("\0{}\0{}", credentials.user, credentials.pass));
        let reply = session
            .secret_command(&format!("AUTH PLAIN {token}"), "AUTH PLAIN <redacted>", "AUTH")
            .await?;
        match reply.code {
            235 => return Ok(()),
            // 504: mechanism not supported after all; try LOGIN below.
            504 if offers("LOGIN") => {
                log::debug!("[SMTP] AUTH PLAIN refused as unsupported, falling back to LOGIN");
            }
            _ => return Err(Failure::reply(SmtpProbeOutcome::AuthFailed, &reply)),
        }
    }

    if offers("LOGIN") {
        let reply = session.command("AUTH LOGIN", "AUTH").await?;
        if reply.code != 334 {
            return Err(Failure::reply(SmtpProbeOutcome::AuthFailed, &reply));
        }
        let reply = session
            .secret_command(&STANDARD.encode(&credentials.user), "<user>", "AUTH")
            .await?;
        if reply.code != 334 {
            return Err(Failure::reply(SmtpProbeOutcome::AuthFailed, &reply));
        }
        let reply = session
            .secret_command(&STANDARD.encode(&credentials.pass), "<redacted>", "AUTH")
            .await?;
        if reply.code != 235 {
            return Err(Failure::reply(SmtpProbeOutcome::AuthFailed, &reply));
        }
        return Ok(());
    }

    Err(Failure::new(
        SmtpProbeOutcome::AuthFailed,
        format!(
            "authentication failed: no PLAIN or LOGIN mechanism offered (server offers: {})",
            if mechanisms.is_empty() {
                "none".to_string()
            } else {
                mechanisms.join(" ")
            }
        ),
    ))
}

/// Minimal RFC 5322 message for the probe.
fn build_test_message(from: &str, to: &str) -> String {
    let domain = from.rsplit_once('@').map_or("localhost", |(_, d)| d);
    let now = Utc::now();
    format!(
        "From: <{from}>\r\n\
         To: <{to}>\r\n\
         Subject: Mail health probe\r\n\
         Date: {date}\r\n\
         Message-ID: <{id}@{domain}>\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         This message was sent by an automated sending-domain health check.\r\n\
         No action is required.\r\n",
        date = now.to_rfc2822(),
        id = uuid::Uuid::new_v4(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn creds() -> SmtpCredentials {
        SmtpCredentials {
            host: "smtp.example.com".to_string(),
            port: 587,
            secure: false,
            user: "mailer@example.com".to_string(),
            pass: "secret".to_string(),
        }
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("from", "ops@example.com").is_ok());
        assert!(validate_address("from", "ops@@example.com").is_err());
        assert!(validate_address("from", "ops").is_err());
        assert!(validate_address("from", "@example.com").is_err());
        assert!(validate_address("to", "a@example.com\r\nRCPT TO:<x@y>").is_err());
        assert!(validate_address("to", "<a@example.com>").is_err());
    }

    #[test]
    fn test_validate_probe_request() {
        assert!(validate_probe_request(&creds(), "a@example.com", "b@example.net").is_ok());

        let mut bad = creds();
        bad.port = 0;
        assert!(validate_probe_request(&bad, "a@example.com", "b@example.net").is_err());

        let mut bad = creds();
        bad.pass = String::new();
        assert!(validate_probe_request(&bad, "a@example.com", "b@example.net").is_err());

        let mut bad = creds();
        bad.host = " ".to_string();
        assert!(validate_probe_request(&bad, "a@example.com", "b@example.net").is_err());
    }

    #[test]
    fn test_probe_message_headers() {
        let message = build_test_message("probe@example.com", "inbox@example.net");
        assert!(message.starts_with("From: <probe@example.com>\r\n"));
        assert!(message.contains("To: <inbox@example.net>\r\n"));
        assert!(message.contains("@example.com>\r\n"));
        assert!(message.contains("\r\n\r\n"));
        assert!(!message.lines().any(|l| l.starts_with('.')));
    }
}
