//! SMTP error classification.
//!
//! A fixed rule table, checked in order. Each rule matches on basic reply codes,
//! RFC 3463 enhanced status codes, or case-insensitive phrases in the raw text.

use crate::types::{ErrorCategory, SmtpDiagnosis};

struct Rule {
    category: ErrorCategory,
    summary: &'static str,
    remediation: &'static str,
    /// Three-digit reply codes.
    codes: &'static [u16],
    /// Enhanced status codes (`class.subject.detail`).
    enhanced: &'static [&'static str],
    /// Lowercase substrings.
    phrases: &'static [&'static str],
    /// Status token that only counts together with a phrase.
    combined: &'static [(&'static str, &'static str)],
}

const RULES: &[Rule] = &[
    Rule {
        category: ErrorCategory::Tls,
        summary: "TLS negotiation failed",
        remediation: "Check that the port matches the TLS mode (465 implicit TLS, 587 STARTTLS) \
                      and that the server presents a valid certificate for the host name.",
        codes: &[],
        enhanced: &["5.7.10", "5.7.11"],
        phrases: &["tls", "ssl", "certificate", "handshake", "starttls"],
        combined: &[("454", "tls")],
    },
    Rule {
        category: ErrorCategory::AuthFailed,
        summary: "Invalid credentials",
        remediation: "Verify the SMTP user name and password. Providers with two-factor \
                      authentication usually require an app password.",
        codes: &[530, 534, 535],
        enhanced: &["5.7.8", "5.7.9"],
        phrases: &[
            "authentication failed",
            "authentication failure",
            "invalid credentials",
            "username and password not accepted",
            "authentication credentials invalid",
        ],
        combined: &[("5.7.0", "auth")],
    },
    Rule {
        category: ErrorCategory::Timeout,
        summary: "Connection timed out",
        remediation: "The server did not answer in time. Check that the host and port are \
                      correct and that outbound traffic to them is not silently dropped.",
        codes: &[],
        enhanced: &[],
        phrases: &["timed out", "timeout", "etimedout"],
        combined: &[],
    },
    Rule {
        category: ErrorCategory::Infrastructure,
        summary: "Port/firewall issue",
        remediation: "The connection could not be established. Check the port, the server \
                      status and any firewall between this host and the server (port 25 is \
                      often blocked by hosting providers).",
        codes: &[],
        enhanced: &[],
        phrases: &[
            "connection refused",
            "econnrefused",
            "unreachable",
            "connection reset",
            "broken pipe",
            "no route to host",
        ],
        combined: &[],
    },
    Rule {
        category: ErrorCategory::Dns,
        summary: "Host name could not be resolved",
        remediation: "Check the SMTP host name for typos and verify it resolves from this host.",
        codes: &[],
        enhanced: &[],
        phrases: &[
            "enotfound",
            "name or service not known",
            "nodename nor servname",
            "failed to lookup address",
        ],
        combined: &[],
    },
    Rule {
        category: ErrorCategory::Temporary,
        summary: "Rate limited or greylisted",
        remediation: "The server deferred the request. Wait a few minutes before retrying and \
                      reduce the sending rate.",
        codes: &[421, 450, 451, 452],
        enhanced: &[],
        phrases: &["greylist", "rate limit", "too many", "try again later"],
        combined: &[],
    },
    Rule {
        category: ErrorCategory::Rejected,
        summary: "Message or sender rejected",
        remediation: "The server refused the sender, recipient or content. Check the sender \
                      address is allowed for this account and that SPF, DKIM and DMARC pass.",
        codes: &[550, 551, 552, 553, 554],
        enhanced: &[],
        phrases: &["spam", "blocked", "blacklist", "policy"],
        combined: &[],
    },
];

const UNKNOWN_SUMMARY: &str = "Unrecognized error";
const UNKNOWN_REMEDIATION: &str =
    "The error did not match a known pattern. Inspect the raw server response.";

/// Classify a raw SMTP or transport error.
///
/// Deterministic; the input is kept verbatim in `raw_error`.
pub fn classify(raw_error: &str) -> SmtpDiagnosis {
    let tokens = StatusTokens::scan(raw_error);
    let lower = raw_error.to_lowercase();

    let rule = RULES.iter().find(|rule| {
        rule.codes.iter().any(|c| tokens.codes.contains(c))
            || rule.enhanced.iter().any(|e| tokens.has_enhanced(e))
            || rule.phrases.iter().any(|p| lower.contains(p))
            || rule
                .combined
                .iter()
                .any(|(token, phrase)| tokens.has_token(token) && lower.contains(phrase))
    });

    match rule {
        Some(rule) => SmtpDiagnosis {
            category: rule.category,
            summary: rule.summary.to_string(),
            remediation: rule.remediation.to_string(),
            raw_error: raw_error.to_string(),
        },
        None => SmtpDiagnosis {
            category: ErrorCategory::Unknown,
            summary: UNKNOWN_SUMMARY.to_string(),
            remediation: UNKNOWN_REMEDIATION.to_string(),
            raw_error: raw_error.to_string(),
        },
    }
}

/// Reply codes and enhanced status codes found in a text.
struct StatusTokens {
    codes: Vec<u16>,
    enhanced: Vec<String>,
}

impl StatusTokens {
    fn scan(text: &str) -> Self {
        let mut codes = Vec::new();
        let mut enhanced = Vec::new();
        for token in text
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .map(|t| t.trim_matches('.'))
            .filter(|t| !t.is_empty())
        {
            if let Some(code) = reply_code(token) {
                codes.push(code);
            } else if is_enhanced_code(token) {
                enhanced.push(token.to_string());
            }
        }
        Self { codes, enhanced }
    }

    fn has_enhanced(&self, code: &str) -> bool {
        self.enhanced.iter().any(|e| e == code)
    }

    fn has_token(&self, token: &str) -> bool {
        match token.parse::<u16>() {
            Ok(code) if !token.contains('.') => self.codes.contains(&code),
            _ => self.has_enhanced(token),
        }
    }
}

/// `[2-5]NN`
fn reply_code(token: &str) -> Option<u16> {
    let bytes = token.as_bytes();
    if bytes.len() == 3 && (b'2'..=b'5').contains(&bytes[0]) && bytes.iter().all(u8::is_ascii_digit) {
        token.parse().ok()
    } else {
        None
    }
}

/// `[245].N{1,3}.N{1,3}`
fn is_enhanced_code(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3
        && matches!(parts[0], "2" | "4" | "5")
        && parts[1..]
            .iter()
            .all(|p| (1..=3).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit()))
}
