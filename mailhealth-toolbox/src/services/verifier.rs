//! SPF / DKIM / DMARC record verification.
//!
//! Resolution happens concurrently; classification is pure and lives in
//! [`check_spf`], [`check_dkim`] and [`check_dmarc`].

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::ResolutionError;
use crate::services::resolver::TxtResolver;
use crate::types::{DnsCheckStatus, DnsRecordCheck, DnsRecordType, DomainHealthRequest};
use crate::utils::log_sanitizer::truncate_for_log;

/// Separator between several observed records.
const OBSERVED_SEPARATOR: &str = " | ";

type Lookup = Result<Vec<String>, ResolutionError>;

/// Run the three record checks for `request`.
///
/// Always returns SPF, DKIM, DMARC in that order. A failed lookup only affects its own check.
pub async fn verify(resolver: &dyn TxtResolver, request: &DomainHealthRequest) -> Vec<DnsRecordCheck> {
    let domain = request.domain.as_str();
    let selector = request.dkim_selector.as_str();

    let spf_name = DnsRecordType::Spf.query_name(domain, selector);
    let dkim_name = DnsRecordType::Dkim.query_name(domain, selector);
    let dmarc_name = DnsRecordType::Dmarc.query_name(domain, selector);

    let (spf, dkim, dmarc) = futures::join!(
        resolver.resolve_txt(&spf_name),
        resolver.resolve_txt(&dkim_name),
        resolver.resolve_txt(&dmarc_name),
    );

    let checks = vec![
        check_spf(spf_name, spf),
        check_dkim(dkim_name, dkim, request.expected_dkim_public_key.as_deref()),
        check_dmarc(dmarc_name, dmarc),
    ];
    for check in &checks {
        log::debug!(
            "[DNS] {} {} -> {:?}",
            check.record_type,
            check.query_name,
            check.status
        );
    }
    checks
}

// ===== SPF =====

/// Classify the TXT records found at the domain apex.
pub fn check_spf(query_name: String, lookup: Lookup) -> DnsRecordCheck {
    let records = match lookup {
        Ok(records) => records,
        Err(e) => return failed_lookup(DnsRecordType::Spf, query_name, None, &e),
    };
    let spf: Vec<&String> = records.iter().filter(|r| is_spf_record(r)).collect();

    let (status, detail) = match spf.as_slice() {
        [] if records.is_empty() => (DnsCheckStatus::Missing, None),
        [] => (
            DnsCheckStatus::Missing,
            Some(format!("none of the {} TXT record(s) is v=spf1", records.len())),
        ),
        [record] => match parse_spf(record) {
            Ok(()) => (DnsCheckStatus::Pass, None),
            Err(problem) => (DnsCheckStatus::Fail, Some(problem)),
        },
        many => (
            DnsCheckStatus::Ambiguous,
            Some(format!("{} v=spf1 records published; exactly one is allowed", many.len())),
        ),
    };

    DnsRecordCheck {
        record_type: DnsRecordType::Spf,
        query_name,
        expected: None,
        observed: join_observed(&spf),
        status,
        detail,
    }
}

/// `v=spf1` followed by a space or the end of the record, case-insensitive.
fn is_spf_record(record: &str) -> bool {
    let bytes = record.as_bytes();
    bytes.len() >= 6
        && bytes[..6].eq_ignore_ascii_case(b"v=spf1")
        && (bytes.len() == 6 || bytes[6] == b' ')
}

/// Check a record against the RFC 7208 term grammar.
///
/// Returns the first problem found.
pub fn parse_spf(record: &str) -> Result<(), String> {
    let mut terms = record.split(' ').filter(|t| !t.is_empty());
    match terms.next() {
        Some(version) if version.eq_ignore_ascii_case("v=spf1") => {}
        _ => return Err("record does not start with v=spf1".to_string()),
    }

    let mut redirect_seen = false;
    let mut exp_seen = false;
    for term in terms {
        if !term.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(format!("term '{term}' contains non-printable characters"));
        }
        if let Some((name, value)) = modifier_parts(term) {
            match name.to_ascii_lowercase().as_str() {
                "redirect" => {
                    if redirect_seen {
                        return Err("more than one redirect= modifier".to_string());
                    }
                    redirect_seen = true;
                    check_domain_spec(value).map_err(|e| format!("redirect={value}: {e}"))?;
                }
                "exp" => {
                    if exp_seen {
                        return Err("more than one exp= modifier".to_string());
                    }
                    exp_seen = true;
                    check_domain_spec(value).map_err(|e| format!("exp={value}: {e}"))?;
                }
                // Unknown modifiers are ignored by receivers, but their value must still be a macro-string.
                _ => check_macro_string(value).map_err(|e| format!("{name}={value}: {e}"))?,
            }
            continue;
        }
        check_directive(term)?;
    }
    Ok(())
}

/// Split `name=value` when `name` is a valid modifier name.
fn modifier_parts(term: &str) -> Option<(&str, &str)> {
    let (name, value) = term.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then_some((name, value))
}

fn check_directive(term: &str) -> Result<(), String> {
    let body = term.strip_prefix(['+', '-', '~', '?']).unwrap_or(term);
    let name_end = body.find([':', '/']).unwrap_or(body.len());
    let (name, rest) = body.split_at(name_end);

    let invalid = |why: &str| format!("mechanism '{term}': {why}");
    match name.to_ascii_lowercase().as_str() {
        "all" => {
            if rest.is_empty() {
                Ok(())
            } else {
                Err(invalid("all takes no argument"))
            }
        }
        "include" | "exists" => match rest.strip_prefix(':') {
            Some(spec) => check_domain_spec(spec).map_err(|e| invalid(&e)),
            None => Err(invalid("a domain is required")),
        },
        "a" | "mx" => check_a_mx_argument(rest).map_err(|e| invalid(&e)),
        "ptr" => match rest.strip_prefix(':') {
            Some(spec) => check_domain_spec(spec).map_err(|e| invalid(&e)),
            None if rest.is_empty() => Ok(()),
            None => Err(invalid("unexpected suffix")),
        },
        "ip4" => {
            let network = rest
                .strip_prefix(':')
                .ok_or_else(|| invalid("an address is required"))?;
            let (addr, prefix) = split_prefix(network);
            addr.parse::<Ipv4Addr>()
                .map_err(|_| invalid("invalid IPv4 address"))?;
            check_prefix(prefix, 32).map_err(|e| invalid(&e))
        }
        "ip6" => {
            let network = rest
                .strip_prefix(':')
                .ok_or_else(|| invalid("an address is required"))?;
            let (addr, prefix) = split_prefix(network);
            addr.parse::<Ipv6Addr>()
                .map_err(|_| invalid("invalid IPv6 address"))?;
            check_prefix(prefix, 128).map_err(|e| invalid(&e))
        }
        "" => Err(invalid("empty mechanism")),
        _ => Err(invalid("unknown mechanism")),
    }
}

/// `[":" domain-spec] [ip4-cidr-length] ["/" ip6-cidr-length]`
fn check_a_mx_argument(rest: &str) -> Result<(), String> {
    let (spec, cidr) = match rest.strip_prefix(':') {
        Some(after) => match after.find('/') {
            Some(i) => (Some(&after[..i]), &after[i..]),
            None => (Some(after), ""),
        },
        None => (None, rest),
    };
    if let Some(spec) = spec {
        check_domain_spec(spec)?;
    }
    if cidr.is_empty() {
        return Ok(());
    }
    if let Some(v6) = cidr.strip_prefix("//") {
        return check_prefix(Some(v6), 128);
    }
    let v4_and_rest = &cidr[1..];
    match v4_and_rest.split_once("//") {
        Some((v4, v6)) => {
            check_prefix(Some(v4), 32)?;
            check_prefix(Some(v6), 128)
        }
        None => check_prefix(Some(v4_and_rest), 32),
    }
}

fn split_prefix(network: &str) -> (&str, Option<&str>) {
    match network.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (network, None),
    }
}

fn check_prefix(prefix: Option<&str>, max: u8) -> Result<(), String> {
    let Some(prefix) = prefix else {
        return Ok(());
    };
    // Leading zeros are not allowed by the grammar.
    if prefix.is_empty() || (prefix.len() > 1 && prefix.starts_with('0')) {
        return Err(format!("invalid prefix length '/{prefix}'"));
    }
    match prefix.parse::<u8>() {
        Ok(n) if n <= max => Ok(()),
        _ => Err(format!("prefix length '/{prefix}' is out of range (0-{max})")),
    }
}

/// `domain-spec = macro-string domain-end`
fn check_domain_spec(spec: &str) -> Result<(), String> {
    if spec.is_empty() {
        return Err("empty domain".to_string());
    }
    check_macro_string(spec)?;
    // A literal (macro-free) domain needs a dot-separated TLD label.
    if !spec.contains('%') {
        let trimmed = spec.trim_end_matches('.');
        let Some((_, tld)) = trimmed.rsplit_once('.') else {
            return Err(format!("'{spec}' is not a fully qualified domain"));
        };
        if tld.is_empty() || tld.len() > 63 {
            return Err(format!("'{spec}' has an invalid top-level label"));
        }
    }
    Ok(())
}

/// Validate `%{...}`, `%%`, `%_` and `%-` macro escapes.
fn check_macro_string(value: &str) -> Result<(), String> {
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        match chars.next() {
            Some('%' | '_' | '-') => {}
            Some('{') => {
                let letter = chars.next().ok_or("unterminated macro")?;
                if !"slodiphcrtvSLODIPHCRTV".contains(letter) {
                    return Err(format!("unknown macro letter '{letter}'"));
                }
                let mut closed = false;
                let mut seen_r = false;
                for c in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '0'..='9' if !seen_r => {}
                        'r' | 'R' if !seen_r => seen_r = true,
                        '.' | '-' | '+' | ',' | '/' | '_' | '=' => {}
                        other => return Err(format!("invalid character '{other}' in macro")),
                    }
                }
                if !closed {
                    return Err("unterminated macro".to_string());
                }
            }
            _ => return Err("'%' must be followed by '{', '%', '_' or '-'".to_string()),
        }
    }
    Ok(())
}

// ===== DKIM =====

/// Classify the TXT records at `<selector>._domainkey.<domain>`.
///
/// `expected` may be a PEM block, bare base64, or a whole `v=DKIM1; ... p=...` value.
pub fn check_dkim(query_name: String, lookup: Lookup, expected: Option<&str>) -> DnsRecordCheck {
    let expected_key = expected.map(normalize_public_key);
    let records = match lookup {
        Ok(records) => records,
        Err(e) => return failed_lookup(DnsRecordType::Dkim, query_name, expected_key, &e),
    };
    let observed = join_observed(&records.iter().collect::<Vec<_>>());

    let (status, detail) = match records.as_slice() {
        [] => (DnsCheckStatus::Missing, None),
        [record] => match dkim_public_key(record) {
            None => (
                DnsCheckStatus::Fail,
                Some("record has no p= value; key is revoked or malformed".to_string()),
            ),
            Some(published) => match expected_key.as_deref() {
                Some(expected) if expected != published => (
                    DnsCheckStatus::Fail,
                    Some("published p= value does not match the expected public key".to_string()),
                ),
                _ => (DnsCheckStatus::Pass, None),
            },
        },
        many => (
            DnsCheckStatus::Ambiguous,
            Some(format!("{} TXT records published for this selector", many.len())),
        ),
    };

    DnsRecordCheck {
        record_type: DnsRecordType::Dkim,
        query_name,
        expected: expected_key,
        observed,
        status,
        detail,
    }
}

/// Non-empty `p=` value of a DKIM tag list, with folding whitespace removed.
fn dkim_public_key(record: &str) -> Option<String> {
    record.split(';').find_map(|tag| {
        let (name, value) = tag.split_once('=')?;
        if name.trim() != "p" {
            return None;
        }
        let key = strip_whitespace(value);
        (!key.is_empty()).then_some(key)
    })
}

/// Reduce an expected public key to the bare base64 that appears after `p=`.
pub fn normalize_public_key(input: &str) -> String {
    if input.contains("-----BEGIN") {
        let body: String = input
            .lines()
            .filter(|line| !line.trim_start().starts_with("-----"))
            .collect();
        return strip_whitespace(&body);
    }
    if input.split(';').count() > 1 || input.trim_start().starts_with("p=") {
        return dkim_public_key(input).unwrap_or_default();
    }
    strip_whitespace(input)
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

// ===== DMARC =====

/// Classify the TXT records at `_dmarc.<domain>`.
pub fn check_dmarc(query_name: String, lookup: Lookup) -> DnsRecordCheck {
    let records = match lookup {
        Ok(records) => records,
        Err(e) => return failed_lookup(DnsRecordType::Dmarc, query_name, None, &e),
    };
    let dmarc: Vec<&String> = records.iter().filter(|r| is_dmarc_record(r)).collect();

    let (status, detail) = match dmarc.len() {
        0 => (DnsCheckStatus::Missing, None),
        1 => (DnsCheckStatus::Pass, None),
        n => (
            DnsCheckStatus::Fail,
            Some(format!(
                "{n} v=DMARC1 records published; receivers treat this as no policy"
            )),
        ),
    };

    DnsRecordCheck {
        record_type: DnsRecordType::Dmarc,
        query_name,
        expected: None,
        observed: join_observed(&dmarc),
        status,
        detail,
    }
}

fn is_dmarc_record(record: &str) -> bool {
    let trimmed = record.trim_start();
    let bytes = trimmed.as_bytes();
    bytes.len() >= 8
        && bytes[..8].eq_ignore_ascii_case(b"v=DMARC1")
        && (bytes.len() == 8 || matches!(bytes[8], b';' | b' ' | b'\t'))
}

// ===== Shared =====

fn join_observed(records: &[&String]) -> Option<String> {
    if records.is_empty() {
        None
    } else {
        Some(
            records
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(OBSERVED_SEPARATOR),
        )
    }
}

fn failed_lookup(
    record_type: DnsRecordType,
    query_name: String,
    expected: Option<String>,
    error: &ResolutionError,
) -> DnsRecordCheck {
    let status = match error {
        ResolutionError::NxDomain { .. } => DnsCheckStatus::Missing,
        ResolutionError::Timeout { .. } | ResolutionError::ServFail { .. } => {
            DnsCheckStatus::Error
        }
    };
    log::debug!(
        "[DNS] {record_type} lookup for {query_name} failed: {}",
        truncate_for_log(&error.to_string())
    );
    DnsRecordCheck {
        record_type,
        query_name,
        expected,
        observed: None,
        status,
        detail: Some(error.to_string()),
    }
}
