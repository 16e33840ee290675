//! SMTP reply parsing.

use std::fmt;

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// Text of each line, without the code and separator.
    pub lines: Vec<String>,
}

impl Reply {
    /// Extension keywords advertised in an EHLO reply (first line is the greeting).
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().skip(1).map(|line| line.trim())
    }

    /// SASL mechanisms from `AUTH PLAIN LOGIN` or the legacy `AUTH=PLAIN LOGIN`.
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.capabilities()
            .filter_map(|cap| {
                let upper = cap.to_ascii_uppercase();
                upper
                    .strip_prefix("AUTH ")
                    .or_else(|| upper.strip_prefix("AUTH="))
                    .map(|rest| {
                        rest.split_whitespace()
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
            })
            .flatten()
            .collect()
    }

    pub fn has_capability(&self, keyword: &str) -> bool {
        self.capabilities().any(|cap| {
            cap.split_whitespace()
                .next()
                .is_some_and(|k| k.eq_ignore_ascii_case(keyword))
        })
    }
}

impl fmt::Display for Reply {
    /// Wire form without CRLF: `250-first` ... `250 last`, joined by newlines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            return write!(f, "{}", self.code);
        }
        let last = self.lines.len() - 1;
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}{sep}{line}", self.code)?;
        }
        Ok(())
    }
}

/// Parse one complete reply from the front of `buffer`.
///
/// Returns `Ok(None)` until the final line (`NNN ` or bare `NNN`) has arrived,
/// otherwise the reply and the number of bytes it occupied.
pub fn parse_reply(buffer: &[u8]) -> Result<Option<(Reply, usize)>, String> {
    let mut consumed = 0;
    let mut code = None;
    let mut lines = Vec::new();

    while let Some(newline) = buffer[consumed..].iter().position(|&b| b == b'\n') {
        let raw = &buffer[consumed..consumed + newline];
        consumed += newline + 1;
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);

        if line.len() < 3 || !line.is_char_boundary(3) {
            return Err(format!("malformed reply line: '{line}'"));
        }
        let line_code: u16 = line[..3]
            .parse()
            .map_err(|_| format!("malformed reply code: '{line}'"))?;
        if !(200..600).contains(&line_code) {
            return Err(format!("reply code out of range: '{line}'"));
        }
        match code {
            Some(c) if c != line_code => {
                return Err(format!(
                    "reply code changed mid-reply: {c} then {line_code}"
                ));
            }
            _ => code = Some(line_code),
        }

        let rest = &line[3..];
        let (is_last, text) = match rest.chars().next() {
            None => (true, ""),
            Some(' ') => (true, &rest[1..]),
            Some('-') => (false, &rest[1..]),
            Some(other) => return Err(format!("invalid reply separator '{other}'")),
        };
        lines.push(text.to_string());

        if is_last {
            return Ok(Some((
                Reply {
                    code: line_code,
                    lines,
                },
                consumed,
            )));
        }
    }
    Ok(None)
}
