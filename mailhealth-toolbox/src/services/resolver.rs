//! TXT resolution used by the record verifier.
//!
//! [`TxtResolver`] is the seam the verifier queries through; [`HickoryTxtResolver`]
//! is the real implementation. Tests substitute an in-memory table.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::{
    ResolveError, ResolveErrorKind, TokioResolver,
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::{ProtoErrorKind, op::ResponseCode},
};

use crate::config::DnsConfig;
use crate::error::ResolutionError;
use crate::types::DnsRecordType;

/// Resolve TXT records for a name.
///
/// Each returned string is one record with its character-strings already
/// concatenated. A name that exists without TXT records yields an empty list.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, ResolutionError>;

    /// Resolve the TXT records holding `record_type` for `domain`.
    ///
    /// `selector` is only used for DKIM.
    async fn resolve(
        &self,
        domain: &str,
        record_type: DnsRecordType,
        selector: &str,
    ) -> Result<Vec<String>, ResolutionError> {
        self.resolve_txt(&record_type.query_name(domain, selector))
            .await
    }
}

const DNS_PORT: u16 = 53;

/// [`TxtResolver`] backed by hickory.
///
/// Each query is bounded by the configured timeout and retried at most once,
/// and only when it timed out.
pub struct HickoryTxtResolver {
    resolver: TokioResolver,
    query_timeout: Duration,
    timeout_retries: u32,
}

impl HickoryTxtResolver {
    pub fn new(config: &DnsConfig) -> Self {
        let nameserver = config.nameserver.map(|ip| SocketAddr::new(ip, DNS_PORT));
        Self::with_nameserver(nameserver, config)
    }

    fn with_nameserver(nameserver: Option<SocketAddr>, config: &DnsConfig) -> Self {
        Self {
            resolver: build_resolver(nameserver, config.query_timeout()),
            query_timeout: config.query_timeout(),
            timeout_retries: config.timeout_retries,
        }
    }

    async fn query_once(&self, name: &str) -> Result<Vec<String>, ResolutionError> {
        let lookup = tokio::time::timeout(self.query_timeout, self.resolver.txt_lookup(name)).await;
        match lookup {
            Err(_) => Err(ResolutionError::Timeout {
                name: name.to_string(),
            }),
            Ok(Ok(response)) => Ok(response
                .iter()
                .map(|txt| {
                    txt.iter()
                        .map(|data| String::from_utf8_lossy(data).to_string())
                        .collect::<String>()
                })
                .collect()),
            Ok(Err(e)) => classify_resolve_error(name, &e),
        }
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, ResolutionError> {
        let mut attempt = 0;
        loop {
            match self.query_once(name).await {
                Err(ResolutionError::Timeout { .. }) if attempt < self.timeout_retries => {
                    attempt += 1;
                    log::debug!("[DNS] TXT {name} timed out, retrying ({attempt})");
                }
                Ok(records) => {
                    log::debug!("[DNS] TXT {name}: {} record(s)", records.len());
                    return Ok(records);
                }
                Err(e) => {
                    log::warn!("[DNS] TXT {name} failed: {e}");
                    return Err(e);
                }
            }
        }
    }
}

fn classify_resolve_error(name: &str, err: &ResolveError) -> Result<Vec<String>, ResolutionError> {
    if let ResolveErrorKind::Proto(proto) = err.kind() {
        match proto.kind() {
            // Hickory folds every answer without records into NoRecordsFound;
            // only the response code tells an empty NOERROR from a server failure.
            ProtoErrorKind::NoRecordsFound { response_code, .. } => {
                return match *response_code {
                    ResponseCode::NoError => Ok(Vec::new()),
                    ResponseCode::NXDomain => Err(ResolutionError::NxDomain {
                        name: name.to_string(),
                    }),
                    code => Err(ResolutionError::ServFail {
                        name: name.to_string(),
                        detail: format!("response code {code}"),
                    }),
                };
            }
            ProtoErrorKind::Timeout => {
                return Err(ResolutionError::Timeout {
                    name: name.to_string(),
                });
            }
            _ => {}
        }
    }
    Err(classify_message(name, &err.to_string()))
}

/// Map a resolver error message onto a [`ResolutionError`].
///
/// Fallback for errors without a structured response code (transport
/// failures, resolver-level messages).
pub(crate) fn classify_message(name: &str, message: &str) -> ResolutionError {
    let lower = message.to_lowercase();
    if lower.contains("nxdomain") || lower.contains("no such domain") {
        ResolutionError::NxDomain {
            name: name.to_string(),
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ResolutionError::Timeout {
            name: name.to_string(),
        }
    } else {
        ResolutionError::ServFail {
            name: name.to_string(),
            detail: message.to_string(),
        }
    }
}

/// Build a resolver for `nameserver`, or from the system configuration when `None`.
///
/// Hickory's own retry is disabled (`attempts = 1`); retries happen in
/// [`HickoryTxtResolver::resolve_txt`].
fn build_resolver(nameserver: Option<SocketAddr>, timeout: Duration) -> TokioResolver {
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;

    if let Some(addr) = nameserver {
        let config = ResolverConfig::from_parts(
            None,
            vec![],
            NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true),
        );
        return TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();
    }

    #[cfg(any(unix, target_os = "windows"))]
    {
        match TokioResolver::builder_tokio() {
            Ok(mut builder) => {
                builder.options_mut().timeout = timeout;
                builder.options_mut().attempts = 1;
                return builder.build();
            }
            Err(e) => {
                log::warn!(
                    "[DNS] Failed to load system DNS configuration, falling back to defaults: {e}"
                );
            }
        }
    }

    TokioResolver::builder_with_config(
        ResolverConfig::default(),
        TokioConnectionProvider::default(),
    )
    .with_options(opts)
    .build()
}
