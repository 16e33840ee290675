//! Health report aggregation.

use chrono::Utc;

use crate::types::{
    Component, ComponentFailure, ComponentOutcome, DnsCheckStatus, DnsRecordCheck,
    DomainHealthReport, OverallStatus, ReportComponents, SmtpProbeOutcome, SmtpProbeResult,
    SpamScanResult,
};

/// Combine component results into a report.
///
/// Absent components are reported as `None` and do not affect the overall status.
pub fn aggregate(
    domain: &str,
    dns_checks: Vec<DnsRecordCheck>,
    smtp_probe: Option<SmtpProbeResult>,
    spam_scan: Option<SpamScanResult>,
) -> DomainHealthReport {
    aggregate_with_failures(domain, dns_checks, smtp_probe, spam_scan, &[])
}

/// Like [`aggregate`], also recording components that were requested but could not
/// produce a result (for example an unreachable scanner).
pub fn aggregate_with_failures(
    domain: &str,
    dns_checks: Vec<DnsRecordCheck>,
    smtp_probe: Option<SmtpProbeResult>,
    spam_scan: Option<SpamScanResult>,
    failures: &[ComponentFailure],
) -> DomainHealthReport {
    let outcome = |component: Component, present: bool| {
        failures
            .iter()
            .find(|f| f.component == component)
            .map_or_else(
                || {
                    if present {
                        ComponentOutcome::completed()
                    } else {
                        ComponentOutcome::skipped()
                    }
                },
                |f| ComponentOutcome::failed(f.error.clone()),
            )
    };
    let components = ReportComponents {
        dns: outcome(Component::Dns, !dns_checks.is_empty()),
        smtp: outcome(Component::Smtp, smtp_probe.is_some()),
        spam: outcome(Component::Spam, spam_scan.is_some()),
    };

    let overall_status = overall_status(
        &dns_checks,
        smtp_probe.as_ref(),
        spam_scan.as_ref(),
        !failures.is_empty(),
    );

    DomainHealthReport {
        domain: domain.to_string(),
        dns_checks,
        smtp_probe,
        spam_scan,
        components,
        overall_status,
        generated_at: Utc::now(),
    }
}

/// Derive the overall verdict.
///
/// UNHEALTHY when a required record is missing or broken, or the probe shows the
/// account cannot send; DEGRADED for anything else short of a clean pass.
pub fn overall_status(
    dns_checks: &[DnsRecordCheck],
    smtp_probe: Option<&SmtpProbeResult>,
    spam_scan: Option<&SpamScanResult>,
    any_component_failed: bool,
) -> OverallStatus {
    let dns_broken = dns_checks
        .iter()
        .any(|c| matches!(c.status, DnsCheckStatus::Fail | DnsCheckStatus::Missing));
    let probe_refused = smtp_probe.is_some_and(|p| {
        matches!(
            p.outcome,
            SmtpProbeOutcome::AuthFailed | SmtpProbeOutcome::Rejected
        )
    });
    if dns_broken || probe_refused {
        return OverallStatus::Unhealthy;
    }

    let dns_clean = dns_checks.iter().all(|c| c.status == DnsCheckStatus::Pass);
    let probe_clean = smtp_probe.is_none_or(SmtpProbeResult::is_sent);
    let scan_clean = spam_scan.is_none_or(|s| !s.is_spam);
    if dns_clean && probe_clean && scan_clean && !any_component_failed {
        OverallStatus::Healthy
    } else {
        OverallStatus::Degraded
    }
}
