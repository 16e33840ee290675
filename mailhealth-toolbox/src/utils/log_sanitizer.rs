//! Log sanitization utilities
//!
//! Keeps SMTP passwords, user names, private keys and long scanner reports
//! from being fully exposed in debug/error logs.

/// Maximum number of bytes to include in truncated log output.
const TRUNCATE_LIMIT: usize = 256;

/// Shorten a remote payload for logging.
///
/// Anything over `TRUNCATE_LIMIT` bytes is cut at the last char boundary within the
/// limit and annotated with how much was kept.
pub fn truncate_for_log(s: &str) -> String {
    if s.len() <= TRUNCATE_LIMIT {
        return s.to_string();
    }
    let cut = (0..=TRUNCATE_LIMIT)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}... [{cut} of {} bytes shown]", &s[..cut], s.len())
}

/// Mask an identifier such as an SMTP user name.
///
/// Keeps the first character and, for addresses, the domain: `mailer@example.com`
/// becomes `m***@example.com`.
pub fn mask_secret(s: &str) -> String {
    let Some(first) = s.chars().next() else {
        return String::new();
    };
    match s.rsplit_once('@') {
        Some((_, domain)) => format!("{first}***@{domain}"),
        None => format!("{first}***"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_unchanged() {
        let s = "250 2.0.0 Ok: queued";
        assert_eq!(truncate_for_log(s), s);
    }

    #[test]
    fn long_report_is_cut() {
        let s = "x".repeat(TRUNCATE_LIMIT + 44);
        let result = truncate_for_log(&s);
        assert!(result.ends_with("... [256 of 300 bytes shown]"));
        assert!(result.len() < s.len());
    }

    #[test]
    fn cut_lands_on_char_boundary() {
        // 3-byte chars: 85 fit in 255 bytes.
        let s = "邮".repeat(200);
        let result = truncate_for_log(&s);
        assert!(result.ends_with("... [255 of 600 bytes shown]"));
    }

    #[test]
    fn mask_keeps_domain_only() {
        assert_eq!(mask_secret("mailer@example.com"), "m***@example.com");
        assert_eq!(mask_secret("apikey"), "a***");
        assert_eq!(mask_secret(""), "");
    }
}
