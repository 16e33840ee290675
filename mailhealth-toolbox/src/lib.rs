//! Sending-domain health checks
//!
//! 提供邮件发信域名健康检查：SPF/DKIM/DMARC 记录校验、DKIM 密钥生成、SMTP 实测投递、
//! 垃圾邮件评分，以及汇总报告。
//! 所有网络能力（DNS、SMTP、HTTP）通过 trait 注入，配置在构造时显式传入。

mod config;
mod error;
mod services;
mod types;
mod utils;

pub use config::{
    DEFAULT_SENSITIVITY, DkimConfig, DnsConfig, MAX_SENSITIVITY, MIN_SENSITIVITY, ScannerConfig,
    SmtpConfig, ToolboxConfig,
};
pub use error::{ResolutionError, ToolboxError, ToolboxResult};
pub use services::HealthService;
pub use services::classifier::classify;
pub use services::dkim::{SUPPORTED_KEY_BITS, generate_key_pair};
pub use services::report::{aggregate, aggregate_with_failures, overall_status};
pub use services::resolver::{HickoryTxtResolver, TxtResolver};
pub use services::scanner::{HttpReply, HttpTransport, ReqwestTransport, TransportError};
pub use services::smtp::{BoxedStream, SmtpConnector, SmtpStream, TcpConnector};
pub use services::verifier::{check_dkim, check_dmarc, check_spf, normalize_public_key, verify};
pub use types::{
    Component, ComponentFailure, ComponentOutcome, ComponentState, DkimKeyPair, DnsCheckStatus,
    DnsRecordCheck, DnsRecordType, DomainHealthReport, DomainHealthRequest, ErrorCategory,
    OverallStatus, ReportComponents, ScanMessage, ScanRequest, ScannerHealth, SmtpCredentials,
    SmtpDiagnosis, SmtpProbeOutcome, SmtpProbeRequest, SmtpProbeResult, SpamScanResult,
};
