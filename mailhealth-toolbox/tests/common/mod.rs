//! In-memory stand-ins for the DNS, SMTP and HTTP capabilities.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mailhealth_toolbox::{
    BoxedStream, HealthService, HttpReply, HttpTransport, ResolutionError, SmtpConnector,
    SmtpCredentials, ToolboxConfig, TransportError, TxtResolver,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

// ===== DNS =====

/// TXT table keyed by owner name. Unknown names are NXDOMAIN.
#[derive(Default)]
pub struct FakeResolver {
    records: HashMap<String, Result<Vec<String>, ResolutionError>>,
    calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_txt(mut self, name: &str, records: &[&str]) -> Self {
        self.records.insert(
            name.to_string(),
            Ok(records.iter().map(|r| (*r).to_string()).collect()),
        );
        self
    }

    #[must_use]
    pub fn with_error(mut self, name: &str, error: ResolutionError) -> Self {
        self.records.insert(name.to_string(), Err(error));
        self
    }

    /// SPF, DKIM (selector `s1`, key `QUJD`) and DMARC for `domain`, all valid.
    pub fn healthy(domain: &str) -> Self {
        Self::new()
            .with_txt(domain, &["v=spf1 include:_spf.example.net -all"])
            .with_txt(&format!("s1._domainkey.{domain}"), &["v=DKIM1; k=rsa; p=QUJD"])
            .with_txt(&format!("_dmarc.{domain}"), &["v=DMARC1; p=reject"])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxtResolver for FakeResolver {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records.get(name).cloned().unwrap_or_else(|| {
            Err(ResolutionError::NxDomain {
                name: name.to_string(),
            })
        })
    }
}

// ===== SMTP =====

/// One step of a scripted SMTP server.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send these reply lines (CRLF is appended to each).
    Reply(&'static [&'static str]),
    /// Read one command line and record it.
    Expect(&'static str),
    /// Read message data up to the terminating `.` line.
    Data,
    /// Stop answering but keep the connection open.
    Silence,
}

/// Connector whose every connection talks to a scripted in-memory server.
pub struct ScriptedSmtp {
    script: Vec<Step>,
    transcript: Arc<Mutex<Vec<String>>>,
    connects: AtomicUsize,
}

impl ScriptedSmtp {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            transcript: Arc::new(Mutex::new(Vec::new())),
            connects: AtomicUsize::new(0),
        }
    }

    /// Lines the client sent, in order. Message data is one entry.
    pub async fn transcript(&self) -> Vec<String> {
        self.transcript.lock().await.clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SmtpConnector for ScriptedSmtp {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_script(server, self.script.clone(), self.transcript.clone()));
        Ok(Box::new(client))
    }
}

async fn run_script(
    server: tokio::io::DuplexStream,
    script: Vec<Step>,
    transcript: Arc<Mutex<Vec<String>>>,
) {
    let (reader, mut writer) = tokio::io::split(server);
    let mut reader = BufReader::new(reader);
    for step in script {
        match step {
            Step::Reply(lines) => {
                for line in lines {
                    if writer.write_all(format!("{line}\r\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
            Step::Expect(prefix) => {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    return;
                }
                let line = line.trim_end().to_string();
                let matched = line.starts_with(prefix);
                transcript.lock().await.push(line);
                if !matched {
                    return;
                }
            }
            Step::Data => {
                let mut data = String::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    data.push_str(&line);
                }
                transcript.lock().await.push(data);
            }
            Step::Silence => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
        }
    }
}

/// Connector that fails immediately, like a closed port.
pub struct RefusingConnector;

#[async_trait]
impl SmtpConnector for RefusingConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedStream> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "Connection refused (os error 111)",
        ))
    }
}

/// Connector that never completes, like a port behind a dropping firewall.
pub struct BlackholeConnector;

#[async_trait]
impl SmtpConnector for BlackholeConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedStream> {
        std::future::pending().await
    }
}

pub fn credentials() -> SmtpCredentials {
    SmtpCredentials {
        host: "smtp.example.com".to_string(),
        port: 587,
        secure: false,
        user: "mailer@example.com".to_string(),
        pass: "correct horse".to_string(),
    }
}

/// Greeting and EHLO without STARTTLS, offering the given AUTH line.
pub fn plaintext_preamble(auth: &'static [&'static str]) -> Vec<Step> {
    vec![
        Step::Reply(&["220 smtp.example.com ESMTP ready"]),
        Step::Expect("EHLO"),
        Step::Reply(auth),
    ]
}

// ===== HTTP =====

/// Replays canned HTTP outcomes and records requests.
#[derive(Default)]
pub struct FakeHttp {
    replies: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
    requests: Mutex<Vec<(String, Option<Value>)>>,
    calls: AtomicUsize,
}

impl FakeHttp {
    pub fn new(replies: Vec<Result<HttpReply, TransportError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn json(status: u16, body: &Value) -> Result<HttpReply, TransportError> {
        Ok(HttpReply {
            status,
            body: body.to_string(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<(String, Option<Value>)> {
        self.requests.lock().await.clone()
    }

    async fn next(&self, url: &str, body: Option<&Value>) -> Result<HttpReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .await
            .push((url.to_string(), body.cloned()));
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("connection refused".to_string())))
    }
}

#[async_trait]
impl HttpTransport for FakeHttp {
    async fn get(&self, url: &str) -> Result<HttpReply, TransportError> {
        self.next(url, None).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply, TransportError> {
        self.next(url, Some(body)).await
    }
}

// ===== Service =====

/// Config for tests: plaintext AUTH allowed, short timeouts, no scanner retries.
pub fn test_config() -> ToolboxConfig {
    let mut config = ToolboxConfig::default();
    config.smtp.allow_plaintext_auth = true;
    config.smtp.connect_timeout_ms = 2_000;
    config.smtp.command_timeout_ms = 2_000;
    config.smtp.deadline_ms = 5_000;
    config.scanner.max_retries = 0;
    config
}

pub fn service(
    config: ToolboxConfig,
    resolver: Arc<FakeResolver>,
    smtp: Arc<dyn SmtpConnector>,
    http: Arc<FakeHttp>,
) -> HealthService {
    HealthService::with_capabilities(config, resolver, smtp, http).unwrap()
}
