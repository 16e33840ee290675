//! 统一错误类型定义

use serde::Serialize;
use thiserror::Error;

/// Resolver-level DNS failure.
///
/// "The name exists but has no TXT records" is not an error; resolvers return an
/// empty list for it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionError {
    /// The queried name does not exist.
    #[error("NXDOMAIN: {name} does not exist")]
    NxDomain { name: String },

    /// No answer within the configured query timeout (after the single retry).
    #[error("DNS query for {name} timed out")]
    Timeout { name: String },

    /// The server failed to answer, or any other resolver failure.
    #[error("SERVFAIL for {name}: {detail}")]
    ServFail { name: String, detail: String },
}

impl ResolutionError {
    /// Name that was being queried when the failure happened.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::NxDomain { name } | Self::Timeout { name } | Self::ServFail { name, .. } => name,
        }
    }
}

/// 工具箱错误类型
#[derive(Error, Debug, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum ToolboxError {
    /// Malformed input, rejected before any network call.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// DNS resolution failed.
    #[error("Resolution error: {0}")]
    ResolutionError(#[from] ResolutionError),

    /// Key generation or encoding failed.
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// The spam/virus scoring service is unreachable or answered with an error.
    ///
    /// Callers must treat this as "scan incomplete", never as "not spam".
    #[error("Scanner unavailable: {0}")]
    ScannerUnavailable(String),
}

/// 工具箱 Result 类型别名
pub type ToolboxResult<T> = std::result::Result<T, ToolboxError>;
