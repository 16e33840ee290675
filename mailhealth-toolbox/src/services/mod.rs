//! Service façade exposing all health-check operations.
//!
//! [`HealthService`] owns the configuration and the three network capabilities
//! (TXT resolver, SMTP connector, HTTP transport). It holds no mutable state, so a
//! single instance can serve concurrent requests.

pub mod classifier;
pub mod dkim;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod smtp;
pub mod verifier;

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::config::ToolboxConfig;
use crate::error::{ToolboxError, ToolboxResult};
use crate::types::{
    Component, ComponentFailure, DkimKeyPair, DomainHealthReport, DomainHealthRequest, ScanMessage,
    ScannerHealth, SmtpCredentials, SmtpDiagnosis, SmtpProbeResult, SpamScanResult,
};

use resolver::{HickoryTxtResolver, TxtResolver};
use scanner::{HttpTransport, ReqwestTransport};
use smtp::{SmtpConnector, TcpConnector};

/// Validate and normalise a sending domain.
///
/// Trims whitespace and a trailing dot, converts internationalised names to ASCII
/// via IDNA 2008, and rejects IP literals, single-label names and overlong input.
fn validate_domain(domain: &str) -> ToolboxResult<String> {
    let domain = domain.trim().trim_end_matches('.');
    if domain.is_empty() {
        return Err(ToolboxError::ValidationError(
            "Domain name is required".to_string(),
        ));
    }
    if domain.parse::<std::net::IpAddr>().is_ok() {
        return Err(ToolboxError::ValidationError(format!(
            "A sending domain is required, got an IP address: {domain}"
        )));
    }
    let ascii_domain = idna::domain_to_ascii_strict(domain)
        .map_err(|_| ToolboxError::ValidationError(format!("Invalid domain name: {domain}")))?;
    if !ascii_domain.contains('.') {
        return Err(ToolboxError::ValidationError(format!(
            "Domain name must be fully qualified: {domain}"
        )));
    }
    if ascii_domain.len() > 253 {
        return Err(ToolboxError::ValidationError(format!(
            "Domain name exceeds maximum length of 253 characters (got {})",
            ascii_domain.len()
        )));
    }
    Ok(ascii_domain)
}

/// Validate a DKIM selector: one or more dot-separated labels of letters, digits, `-` and `_`.
fn validate_selector(selector: &str) -> ToolboxResult<String> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(ToolboxError::ValidationError(
            "DKIM selector is required".to_string(),
        ));
    }
    let valid_label = |label: &str| {
        (1..=63).contains(&label.len())
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    };
    if !selector.split('.').all(valid_label) {
        return Err(ToolboxError::ValidationError(format!(
            "Invalid DKIM selector: {selector}"
        )));
    }
    Ok(selector.to_string())
}

/// An expected key must reduce to non-empty, decodable base64.
fn validate_expected_key(key: &str) -> ToolboxResult<String> {
    let normalized = verifier::normalize_public_key(key);
    if normalized.is_empty() {
        return Err(ToolboxError::ValidationError(
            "Expected DKIM public key is empty".to_string(),
        ));
    }
    STANDARD.decode(&normalized).map_err(|e| {
        ToolboxError::ValidationError(format!("Expected DKIM public key is not valid base64: {e}"))
    })?;
    Ok(normalized)
}

/// Entry point for all health-check operations.
///
/// ```rust,no_run
/// use mailhealth_toolbox::{DomainHealthRequest, HealthService, ToolboxConfig};
/// # async fn demo() -> mailhealth_toolbox::ToolboxResult<()> {
/// let service = HealthService::new(ToolboxConfig::default())?;
/// let report = service
///     .verify_domain_health(&DomainHealthRequest::new("example.com", "s1"))
///     .await?;
/// println!("{:?}", report.overall_status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HealthService {
    config: Arc<ToolboxConfig>,
    resolver: Arc<dyn TxtResolver>,
    connector: Arc<dyn SmtpConnector>,
    http: Arc<dyn HttpTransport>,
}

impl HealthService {
    /// Build a service with the real network capabilities.
    pub fn new(config: ToolboxConfig) -> ToolboxResult<Self> {
        config.validate()?;
        let resolver = Arc::new(HickoryTxtResolver::new(&config.dns));
        let http = Arc::new(ReqwestTransport::new(config.scanner.request_timeout()));
        Self::with_capabilities(config, resolver, Arc::new(TcpConnector), http)
    }

    /// Build a service over caller-supplied capabilities (fakes in tests, custom transports).
    pub fn with_capabilities(
        config: ToolboxConfig,
        resolver: Arc<dyn TxtResolver>,
        connector: Arc<dyn SmtpConnector>,
        http: Arc<dyn HttpTransport>,
    ) -> ToolboxResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            resolver,
            connector,
            http,
        })
    }

    pub fn config(&self) -> &ToolboxConfig {
        &self.config
    }

    /// Run every check the request asks for and aggregate the results.
    ///
    /// All inputs are validated before any network call; only a validation error
    /// makes this fail. DNS, SMTP and scanner failures end up in the report.
    pub async fn verify_domain_health(
        &self,
        request: &DomainHealthRequest,
    ) -> ToolboxResult<DomainHealthReport> {
        let domain = validate_domain(&request.domain)?;
        let selector = validate_selector(&request.dkim_selector)?;
        let expected_key = request
            .expected_dkim_public_key
            .as_deref()
            .map(validate_expected_key)
            .transpose()?;
        if let Some(probe) = &request.smtp_probe {
            smtp::validate_probe_request(&probe.credentials, &probe.from, &probe.to)?;
        }
        if let Some(scan) = &request.spam_scan {
            scanner::validate_sensitivity(scan.sensitivity)?;
        }

        log::info!(
            "[VERIFY] {domain} (selector={selector}, smtp={}, spam={})",
            request.smtp_probe.is_some(),
            request.spam_scan.is_some()
        );

        let mut dns_request = DomainHealthRequest::new(domain.clone(), selector);
        dns_request.expected_dkim_public_key = expected_key;

        let dns_fut = verifier::verify(self.resolver.as_ref(), &dns_request);
        let smtp_fut = async {
            match &request.smtp_probe {
                Some(probe) => Some(
                    smtp::probe(
                        self.connector.as_ref(),
                        &self.config.smtp,
                        &probe.credentials,
                        &probe.from,
                        &probe.to,
                    )
                    .await,
                ),
                None => None,
            }
        };
        let spam_fut = async {
            match &request.spam_scan {
                Some(scan) => Some(
                    scanner::scan(
                        self.http.as_ref(),
                        &self.config.scanner,
                        &scan.message,
                        scan.sensitivity,
                        scan.with_virus_scan,
                    )
                    .await,
                ),
                None => None,
            }
        };
        let (dns_checks, smtp_probe, spam_outcome) = futures::join!(dns_fut, smtp_fut, spam_fut);

        let mut failures = Vec::new();
        let spam_scan = match spam_outcome {
            Some(Ok(result)) => Some(result),
            Some(Err(e)) => {
                failures.push(ComponentFailure {
                    component: Component::Spam,
                    error: e.to_string(),
                });
                None
            }
            None => None,
        };

        let report =
            report::aggregate_with_failures(&domain, dns_checks, smtp_probe, spam_scan, &failures);
        log::info!("[VERIFY] {domain}: {:?}", report.overall_status);
        Ok(report)
    }

    /// Generate a DKIM key pair with the configured key size.
    ///
    /// Runs on the blocking pool; RSA generation takes a noticeable amount of CPU.
    pub async fn generate_dkim_key_pair(&self, selector: &str) -> ToolboxResult<DkimKeyPair> {
        let selector = validate_selector(selector)?;
        let bits = self.config.dkim.key_bits;
        tokio::task::spawn_blocking(move || dkim::generate_key_pair(&selector, bits))
            .await
            .map_err(|e| ToolboxError::CryptoError(format!("key generation task failed: {e}")))?
    }

    /// Probe an SMTP submission account by sending one test message.
    pub async fn send_test_email(
        &self,
        credentials: &SmtpCredentials,
        from: &str,
        to: &str,
    ) -> ToolboxResult<SmtpProbeResult> {
        smtp::validate_probe_request(credentials, from, to)?;
        Ok(smtp::probe(self.connector.as_ref(), &self.config.smtp, credentials, from, to).await)
    }

    /// Score a message with the scanning service.
    ///
    /// `sensitivity` falls back to the configured default.
    pub async fn scan_message(
        &self,
        message: &ScanMessage,
        sensitivity: Option<f64>,
        with_virus_scan: bool,
    ) -> ToolboxResult<SpamScanResult> {
        let sensitivity = sensitivity.unwrap_or(self.config.scanner.default_sensitivity);
        scanner::scan(
            self.http.as_ref(),
            &self.config.scanner,
            message,
            sensitivity,
            with_virus_scan,
        )
        .await
    }

    /// Check that the scanning service is up.
    pub async fn scanner_health(&self) -> ToolboxResult<ScannerHealth> {
        scanner::health(self.http.as_ref(), &self.config.scanner).await
    }

    /// Classify a raw SMTP error. Pure; no network involved.
    pub fn diagnose_smtp_error(raw_error: &str) -> SmtpDiagnosis {
        classifier::classify(raw_error)
    }
}
