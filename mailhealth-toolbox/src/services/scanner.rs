//! Spam/virus scoring service client.
//!
//! The service does the scoring; this module shapes the request, retries transient
//! failures and interprets the verdict. An unreachable or failing service is always
//! [`ToolboxError::ScannerUnavailable`], never "not spam".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::{MAX_SENSITIVITY, MIN_SENSITIVITY, ScannerConfig};
use crate::error::{ToolboxError, ToolboxResult};
use crate::types::{ScanMessage, ScannerHealth, SpamScanResult};
use crate::utils::log_sanitizer::truncate_for_log;

/// Status code and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Failure before any HTTP status was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),
}

/// Minimal HTTP capability used by the scanner client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpReply, TransportError>;

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply, TransportError>;
}

/// [`HttpTransport`] backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn finish(response: reqwest::Response) -> Result<HttpReply, TransportError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(HttpReply { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpReply, TransportError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        Self::finish(response).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpReply, TransportError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::finish(response).await
    }
}

/// Reject sensitivities outside `[0.1, 20.0]` (and NaN/infinity).
pub fn validate_sensitivity(sensitivity: f64) -> ToolboxResult<()> {
    if sensitivity.is_finite() && (MIN_SENSITIVITY..=MAX_SENSITIVITY).contains(&sensitivity) {
        Ok(())
    } else {
        Err(ToolboxError::ValidationError(format!(
            "sensitivity must be between {MIN_SENSITIVITY} and {MAX_SENSITIVITY}, got {sensitivity}"
        )))
    }
}

/// Remote verdict as sent by the service.
#[derive(Debug, Deserialize)]
struct ScanResponse {
    score: f64,
    #[serde(default)]
    is_spam: Option<bool>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    report: String,
}

/// Score `message`. Sensitivity is validated before anything is sent.
pub async fn scan(
    transport: &dyn HttpTransport,
    config: &ScannerConfig,
    message: &ScanMessage,
    sensitivity: f64,
    with_virus_scan: bool,
) -> ToolboxResult<SpamScanResult> {
    validate_sensitivity(sensitivity)?;
    let url = endpoint(&config.base_url, &config.scan_path)?;

    let payload = json!({
        "from": message.from,
        "to": message.to,
        "subject": message.subject,
        "body": message.body,
        "sensitivity": sensitivity,
        "clamav_scan": with_virus_scan,
    });

    log::debug!("[SCAN] POST {url} (sensitivity={sensitivity}, clamav_scan={with_virus_scan})");
    let reply = execute_with_retry(config.max_retries, &url, || {
        transport.post_json(&url, &payload)
    })
    .await?;
    let reply = require_success(reply)?;

    let response: ScanResponse = serde_json::from_str(&reply.body).map_err(|e| {
        log::error!("[SCAN] Unparseable response: {}", truncate_for_log(&reply.body));
        ToolboxError::ScannerUnavailable(format!("unparseable scanner response: {e}"))
    })?;
    if !response.score.is_finite() {
        return Err(ToolboxError::ScannerUnavailable(format!(
            "scanner returned a non-finite score: {}",
            response.score
        )));
    }

    let result = SpamScanResult::new(response.score, sensitivity, response.report, with_virus_scan);
    if response.is_spam.is_some_and(|remote| remote != result.is_spam) {
        log::warn!(
            "[SCAN] Remote is_spam={:?} disagrees with score {} >= {sensitivity}; using the local verdict",
            response.is_spam,
            response.score
        );
    }
    if response
        .threshold
        .is_some_and(|remote| (remote - sensitivity).abs() > f64::EPSILON)
    {
        log::warn!(
            "[SCAN] Remote threshold {:?} differs from requested sensitivity {sensitivity}",
            response.threshold
        );
    }
    log::info!(
        "[SCAN] score={} threshold={} is_spam={}",
        result.score,
        result.threshold,
        result.is_spam
    );
    Ok(result)
}

/// Query the service's `/health` endpoint.
pub async fn health(transport: &dyn HttpTransport, config: &ScannerConfig) -> ToolboxResult<ScannerHealth> {
    let url = endpoint(&config.base_url, "health")?;
    log::debug!("[SCAN] GET {url}");
    let reply = execute_with_retry(config.max_retries, &url, || transport.get(&url)).await?;

    if reply.status != 200 {
        return Err(unavailable_status(&reply));
    }
    let body: Value = serde_json::from_str(&reply.body).map_err(|e| {
        ToolboxError::ScannerUnavailable(format!(
            "health endpoint returned non-JSON body ({e}): {}",
            truncate_for_log(&reply.body)
        ))
    })?;
    Ok(ScannerHealth {
        status_code: reply.status,
        body,
    })
}

/// Join the base URL and a relative path, keeping any path prefix of the base.
fn endpoint(base_url: &str, path: &str) -> ToolboxResult<String> {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url::Url::parse(&joined)
        .map(|u| u.to_string())
        .map_err(|e| ToolboxError::ValidationError(format!("invalid scanner URL '{joined}': {e}")))
}

fn require_success(reply: HttpReply) -> ToolboxResult<HttpReply> {
    if (200..300).contains(&reply.status) {
        Ok(reply)
    } else {
        Err(unavailable_status(&reply))
    }
}

fn unavailable_status(reply: &HttpReply) -> ToolboxError {
    log::warn!(
        "[SCAN] HTTP {}: {}",
        reply.status,
        truncate_for_log(&reply.body)
    );
    ToolboxError::ScannerUnavailable(format!(
        "HTTP {}: {}",
        reply.status,
        truncate_for_log(&reply.body)
    ))
}

/// Network errors, timeouts, 429 and 502-504 are worth another attempt.
fn is_retryable(outcome: &Result<HttpReply, TransportError>) -> bool {
    match outcome {
        Err(_) => true,
        Ok(reply) => matches!(reply.status, 429 | 502..=504),
    }
}

/// Exponential backoff: 100ms, 200ms, 400ms, ... capped at 10 seconds.
fn backoff_delay(attempt: u32) -> Duration {
    let capped_attempt = attempt.min(20);
    let delay_ms = 100_u64.saturating_mul(1_u64 << capped_attempt);
    Duration::from_millis(delay_ms.min(10_000))
}

/// Run `send` until it succeeds, fails permanently, or retries run out.
///
/// A retryable status that survives every retry is returned as the reply;
/// a transport error that does is turned into `ScannerUnavailable`.
async fn execute_with_retry<F, Fut>(max_retries: u32, url: &str, mut send: F) -> ToolboxResult<HttpReply>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<HttpReply, TransportError>>,
{
    let mut attempt = 0;
    loop {
        let outcome = send().await;
        if attempt < max_retries && is_retryable(&outcome) {
            let delay = backoff_delay(attempt);
            match &outcome {
                Ok(reply) => log::warn!(
                    "[SCAN] {url} answered HTTP {} (attempt {}/{}), retrying in {:.1}s",
                    reply.status,
                    attempt + 1,
                    max_retries + 1,
                    delay.as_secs_f32()
                ),
                Err(e) => log::warn!(
                    "[SCAN] {url} failed (attempt {}/{}), retrying in {:.1}s: {e}",
                    attempt + 1,
                    max_retries + 1,
                    delay.as_secs_f32()
                ),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }
        return outcome.map_err(|e| {
            log::warn!("[SCAN] {url} unreachable: {e}");
            ToolboxError::ScannerUnavailable(e.to_string())
        });
    }
}
