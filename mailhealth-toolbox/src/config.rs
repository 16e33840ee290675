//! Explicit configuration passed to [`HealthService`](crate::HealthService) at construction.
//!
//! Every field has a serde default so a partial TOML/JSON document is enough.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ToolboxError, ToolboxResult};

/// Lowest accepted spam sensitivity.
pub const MIN_SENSITIVITY: f64 = 0.1;
/// Highest accepted spam sensitivity.
pub const MAX_SENSITIVITY: f64 = 20.0;
/// Sensitivity used when the caller does not pick one.
pub const DEFAULT_SENSITIVITY: f64 = 5.0;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolboxConfig {
    pub dns: DnsConfig,
    pub smtp: SmtpConfig,
    pub scanner: ScannerConfig,
    pub dkim: DkimConfig,
}

impl ToolboxConfig {
    /// Reject values that would make a component hang or misbehave.
    pub fn validate(&self) -> ToolboxResult<()> {
        if self.dns.query_timeout_ms == 0 {
            return Err(invalid("dns.query_timeout_ms must be greater than 0"));
        }
        if self.dns.timeout_retries > 1 {
            return Err(invalid("dns.timeout_retries must be 0 or 1"));
        }
        if self.smtp.connect_timeout_ms == 0
            || self.smtp.command_timeout_ms == 0
            || self.smtp.deadline_ms == 0
        {
            return Err(invalid("smtp timeouts must be greater than 0"));
        }
        if self.scanner.request_timeout_ms == 0 {
            return Err(invalid("scanner.request_timeout_ms must be greater than 0"));
        }
        if self.scanner.max_retries > 5 {
            return Err(invalid("scanner.max_retries must be at most 5"));
        }
        if !(MIN_SENSITIVITY..=MAX_SENSITIVITY).contains(&self.scanner.default_sensitivity) {
            return Err(invalid(format!(
                "scanner.default_sensitivity must be between {MIN_SENSITIVITY} and {MAX_SENSITIVITY}"
            )));
        }
        let url = url::Url::parse(&self.scanner.base_url)
            .map_err(|e| invalid(format!("scanner.base_url is not a valid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scanner.base_url must use http or https"));
        }
        crate::services::dkim::check_key_bits(self.dkim.key_bits)?;
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ToolboxError {
    ToolboxError::ValidationError(message.into())
}

/// DNS resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Per-query timeout.
    ///
    /// Default: 5000 ms
    pub query_timeout_ms: u64,

    /// Retries after a timed-out query (0 or 1).
    ///
    /// Default: 1
    pub timeout_retries: u32,

    /// Query this nameserver instead of the system configuration.
    pub nameserver: Option<IpAddr>,
}

impl DnsConfig {
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
            timeout_retries: 1,
            nameserver: None,
        }
    }
}

/// SMTP probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// TCP connect timeout.
    ///
    /// Default: 10000 ms
    pub connect_timeout_ms: u64,

    /// Timeout for each command/reply exchange, TLS handshakes included.
    ///
    /// Default: 15000 ms
    pub command_timeout_ms: u64,

    /// Upper bound for the whole probe.
    ///
    /// Default: 45000 ms
    pub deadline_ms: u64,

    /// Name announced in EHLO. Derived from the sender's domain when unset.
    pub helo_name: Option<String>,

    /// Allow AUTH over an unencrypted connection when the server does not offer STARTTLS.
    ///
    /// Only meant for local relays. Default: false
    pub allow_plaintext_auth: bool,
}

impl SmtpConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            command_timeout_ms: 15_000,
            deadline_ms: 45_000,
            helo_name: None,
            allow_plaintext_auth: false,
        }
    }
}

/// Spam/virus scoring service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Base URL of the scoring service.
    ///
    /// Default: `http://127.0.0.1:8025`
    pub base_url: String,

    /// Path of the scoring endpoint, relative to `base_url`.
    ///
    /// Default: `check`
    pub scan_path: String,

    /// Per-request timeout.
    ///
    /// Default: 15000 ms
    pub request_timeout_ms: u64,

    /// Retries for transient failures (network, timeout, 429, 502-504).
    ///
    /// Default: 2
    pub max_retries: u32,

    /// Sensitivity used when the caller does not pass one.
    ///
    /// Default: 5.0
    pub default_sensitivity: f64,
}

impl ScannerConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8025".to_string(),
            scan_path: "check".to_string(),
            request_timeout_ms: 15_000,
            max_retries: 2,
            default_sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

/// DKIM key generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DkimConfig {
    /// RSA modulus size. 2048, 3072 or 4096.
    ///
    /// Default: 2048
    pub key_bits: usize,
}

impl Default for DkimConfig {
    fn default() -> Self {
        Self { key_bits: 2048 }
    }
}
