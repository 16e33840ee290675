//! Public types consumed and returned by health-check operations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SENSITIVITY;
use crate::utils::log_sanitizer::mask_secret;

// ===== DNS =====

/// Email authentication record checked by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    /// Sender Policy Framework, TXT at the domain apex.
    Spf,
    /// DomainKeys Identified Mail public key, TXT at `<selector>._domainkey.<domain>`.
    Dkim,
    /// DMARC policy, TXT at `_dmarc.<domain>`.
    Dmarc,
}

impl DnsRecordType {
    /// All record types, in report order.
    pub const ALL: [Self; 3] = [Self::Spf, Self::Dkim, Self::Dmarc];

    /// Owner name holding this record for `domain`.
    ///
    /// `selector` is only used for DKIM.
    #[must_use]
    pub fn query_name(self, domain: &str, selector: &str) -> String {
        match self {
            Self::Spf => domain.to_string(),
            Self::Dkim => format!("{selector}._domainkey.{domain}"),
            Self::Dmarc => format!("_dmarc.{domain}"),
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spf => write!(f, "SPF"),
            Self::Dkim => write!(f, "DKIM"),
            Self::Dmarc => write!(f, "DMARC"),
        }
    }
}

impl FromStr for DnsRecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SPF" => Ok(Self::Spf),
            "DKIM" => Ok(Self::Dkim),
            "DMARC" => Ok(Self::Dmarc),
            _ => Err(format!("Unsupported record type: {s}")),
        }
    }
}

/// Verdict for a single DNS record check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DnsCheckStatus {
    /// Exactly one well-formed record, matching the expectation if one was given.
    Pass,
    /// A record exists but is malformed or does not match the expectation.
    Fail,
    /// No record resolves.
    Missing,
    /// Several conflicting records resolve.
    Ambiguous,
    /// The resolver itself failed (timeout, SERVFAIL); nothing is known about the record.
    Error,
}

/// Result of checking one record type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordCheck {
    pub record_type: DnsRecordType,
    /// Owner name that was queried.
    pub query_name: String,
    /// Expected value, when the caller supplied one.
    pub expected: Option<String>,
    /// Resolved record text. Several records are joined with `" | "`.
    pub observed: Option<String>,
    pub status: DnsCheckStatus,
    /// Why the check did not pass, or the raw resolver error.
    pub detail: Option<String>,
}

// ===== Requests =====

/// Everything [`HealthService::verify_domain_health`](crate::HealthService::verify_domain_health)
/// needs. Only the DNS part is mandatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainHealthRequest {
    /// Sending domain (FQDN).
    pub domain: String,
    /// DKIM selector.
    pub dkim_selector: String,
    /// Expected DKIM public key: PEM, bare base64, or a whole `v=DKIM1; ... p=...` value.
    ///
    /// When `None`, the DKIM check only requires one well-formed record.
    #[serde(default)]
    pub expected_dkim_public_key: Option<String>,
    /// Run a live SMTP probe as part of the check.
    #[serde(default)]
    pub smtp_probe: Option<SmtpProbeRequest>,
    /// Score a sample message as part of the check.
    #[serde(default)]
    pub spam_scan: Option<ScanRequest>,
}

impl DomainHealthRequest {
    /// DNS-only request.
    pub fn new(domain: impl Into<String>, dkim_selector: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            dkim_selector: dkim_selector.into(),
            expected_dkim_public_key: None,
            smtp_probe: None,
            spam_scan: None,
        }
    }

    #[must_use]
    pub fn with_expected_dkim_key(mut self, key: impl Into<String>) -> Self {
        self.expected_dkim_public_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_smtp_probe(mut self, probe: SmtpProbeRequest) -> Self {
        self.smtp_probe = Some(probe);
        self
    }

    #[must_use]
    pub fn with_spam_scan(mut self, scan: ScanRequest) -> Self {
        self.spam_scan = Some(scan);
        self
    }
}

/// SMTP submission credentials.
///
/// `Debug` masks the password and the user name.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpCredentials {
    pub host: String,
    pub port: u16,
    /// `true`: implicit TLS (usually port 465). `false`: STARTTLS upgrade.
    pub secure: bool,
    pub user: String,
    #[serde(skip_serializing)]
    pub pass: String,
}

impl fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("user", &mask_secret(&self.user))
            .field("pass", &"<redacted>")
            .finish()
    }
}

/// Inputs for a live SMTP probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpProbeRequest {
    pub credentials: SmtpCredentials,
    pub from: String,
    pub to: String,
}

/// Message submitted to the scoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

const fn default_sensitivity() -> f64 {
    DEFAULT_SENSITIVITY
}

/// Inputs for a spam/virus scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub message: ScanMessage,
    /// Spam threshold, 0.1 to 20.0.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    #[serde(default)]
    pub with_virus_scan: bool,
}

impl ScanRequest {
    /// Scan with the default sensitivity and no virus scan.
    pub const fn new(message: ScanMessage) -> Self {
        Self {
            message,
            sensitivity: DEFAULT_SENSITIVITY,
            with_virus_scan: false,
        }
    }
}

// ===== DKIM =====

/// Freshly generated DKIM key material.
///
/// The private key belongs to the caller; nothing here persists it. `Debug` never prints it.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DkimKeyPair {
    /// PKCS#8 PEM private key.
    pub private_key_pem: String,
    /// TXT record value: `v=DKIM1; k=rsa; p=<base64>`.
    pub public_key_dns_value: String,
    pub selector: String,
    /// Owner name relative to the domain: `<selector>._domainkey`.
    pub dns_record_name: String,
    pub key_bits: usize,
    pub created_at: DateTime<Utc>,
}

impl DkimKeyPair {
    /// Maximum length of a single TXT character-string.
    pub const TXT_CHUNK_LEN: usize = 255;

    /// Split the DNS value into character-strings of at most 255 bytes.
    ///
    /// Some DNS providers want long TXT values pre-split; resolvers concatenate them back.
    #[must_use]
    pub fn txt_chunks(&self) -> Vec<String> {
        // The value is pure ASCII, so byte chunks are char boundaries.
        self.public_key_dns_value
            .as_bytes()
            .chunks(Self::TXT_CHUNK_LEN)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }
}

impl fmt::Debug for DkimKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimKeyPair")
            .field("selector", &self.selector)
            .field("dns_record_name", &self.dns_record_name)
            .field("key_bits", &self.key_bits)
            .field("public_key_dns_value", &self.public_key_dns_value)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ===== SMTP =====

/// Terminal state of an SMTP probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmtpProbeOutcome {
    /// The test message was accepted.
    Sent,
    AuthFailed,
    ConnectionFailed,
    TlsFailed,
    /// EHLO, MAIL FROM, RCPT TO or DATA was refused.
    Rejected,
    Timeout,
}

/// Result of one SMTP probe attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpProbeResult {
    pub outcome: SmtpProbeOutcome,
    /// Raw server reply or transport error, verbatim.
    pub raw_error: Option<String>,
    pub latency_ms: u64,
    /// Classification of `raw_error`.
    pub diagnosis: Option<SmtpDiagnosis>,
}

impl SmtpProbeResult {
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.outcome == SmtpProbeOutcome::Sent
    }
}

/// Diagnostic category for an SMTP/transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    AuthFailed,
    Temporary,
    Infrastructure,
    Tls,
    Timeout,
    Dns,
    Rejected,
    Unknown,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpDiagnosis {
    pub category: ErrorCategory,
    /// Short label, e.g. "Invalid credentials".
    pub summary: String,
    /// What the operator should do about it.
    pub remediation: String,
    /// Input text, verbatim.
    pub raw_error: String,
}

// ===== Scanner =====

/// Interpreted scoring-service verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpamScanResult {
    /// Always `score >= threshold`.
    pub is_spam: bool,
    pub score: f64,
    /// The requested sensitivity.
    pub threshold: f64,
    /// Service report, verbatim.
    pub report: String,
    pub virus_scan_requested: bool,
}

impl SpamScanResult {
    /// Build a result, deriving `is_spam` from the score.
    #[must_use]
    pub fn new(score: f64, threshold: f64, report: String, virus_scan_requested: bool) -> Self {
        Self {
            is_spam: score >= threshold,
            score,
            threshold,
            report,
            virus_scan_requested,
        }
    }
}

/// Answer of the scoring service's `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerHealth {
    pub status_code: u16,
    pub body: serde_json::Value,
}

// ===== Report =====

/// Consolidated verdict for a sending domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A pipeline stage that may be part of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Dns,
    Smtp,
    Spam,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "dns"),
            Self::Smtp => write!(f, "smtp"),
            Self::Spam => write!(f, "spam"),
        }
    }
}

/// A requested component that could not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentFailure {
    pub component: Component,
    pub error: String,
}

/// Whether a component ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    /// Not requested.
    Skipped,
    /// Ran and produced a result (which may itself be negative).
    Completed,
    /// Requested but could not produce a result.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOutcome {
    pub state: ComponentState,
    pub error: Option<String>,
}

impl ComponentOutcome {
    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            state: ComponentState::Skipped,
            error: None,
        }
    }

    #[must_use]
    pub const fn completed() -> Self {
        Self {
            state: ComponentState::Completed,
            error: None,
        }
    }

    #[must_use]
    pub const fn failed(error: String) -> Self {
        Self {
            state: ComponentState::Failed,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportComponents {
    pub dns: ComponentOutcome,
    pub smtp: ComponentOutcome,
    pub spam: ComponentOutcome,
}

/// Consolidated domain health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainHealthReport {
    pub domain: String,
    pub dns_checks: Vec<DnsRecordCheck>,
    pub smtp_probe: Option<SmtpProbeResult>,
    pub spam_scan: Option<SpamScanResult>,
    pub components: ReportComponents,
    /// Derived from the fields above; see [`aggregate`](crate::aggregate).
    pub overall_status: OverallStatus,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_query_names() {
        assert_eq!(DnsRecordType::Spf.query_name("example.com", "s1"), "example.com");
        assert_eq!(
            DnsRecordType::Dkim.query_name("example.com", "foxmiu"),
            "foxmiu._domainkey.example.com"
        );
        assert_eq!(
            DnsRecordType::Dmarc.query_name("example.com", "s1"),
            "_dmarc.example.com"
        );
    }

    #[test]
    fn test_record_type_from_str_case_insensitive() {
        assert_eq!("dkim".parse::<DnsRecordType>().unwrap(), DnsRecordType::Dkim);
        assert_eq!("Dmarc".parse::<DnsRecordType>().unwrap(), DnsRecordType::Dmarc);
        assert!("MX".parse::<DnsRecordType>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&SmtpProbeOutcome::AuthFailed).unwrap(),
            "\"AUTH_FAILED\""
        );
        assert_eq!(
            serde_json::to_string(&DnsCheckStatus::Missing).unwrap(),
            "\"MISSING\""
        );
    }

    #[test]
    fn test_spam_result_derives_is_spam() {
        assert!(!SpamScanResult::new(2.1, 5.0, String::new(), false).is_spam);
        assert!(SpamScanResult::new(5.0, 5.0, String::new(), false).is_spam);
        assert!(SpamScanResult::new(7.3, 5.0, String::new(), false).is_spam);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = SmtpCredentials {
            host: "smtp.example.com".to_string(),
            port: 587,
            secure: false,
            user: "mailer@example.com".to_string(),
            pass: "hunter2-very-secret".to_string(),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("mailer@example.com"));
        assert!(debug.contains("smtp.example.com"));
    }

    #[test]
    fn test_credentials_never_serialize_password() {
        let creds = SmtpCredentials {
            host: "smtp.example.com".to_string(),
            port: 465,
            secure: true,
            user: "u".to_string(),
            pass: "p@ss".to_string(),
        };
        let json = serde_json::to_string(&creds).unwrap();
        assert!(!json.contains("p@ss"));
    }

    #[test]
    fn test_scan_request_defaults() {
        let request: ScanRequest = serde_json::from_str(
            r#"{"message":{"from":"a@example.com","to":"b@example.com","subject":"s","body":"b"}}"#,
        )
        .unwrap();
        assert!((request.sensitivity - 5.0).abs() < f64::EPSILON);
        assert!(!request.with_virus_scan);
    }

    #[test]
    fn test_txt_chunks_respect_limit() {
        let pair = DkimKeyPair {
            private_key_pem: String::new(),
            public_key_dns_value: format!("v=DKIM1; k=rsa; p={}", "A".repeat(600)),
            selector: "s1".to_string(),
            dns_record_name: "s1._domainkey".to_string(),
            key_bits: 2048,
            created_at: Utc::now(),
        };
        let chunks = pair.txt_chunks();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= DkimKeyPair::TXT_CHUNK_LEN));
        assert_eq!(chunks.concat(), pair.public_key_dns_value);
    }
}
