//! Subject filters
//!
//! Subjects are `.`-separated tokens. Filters may use two wildcards:
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens (last token only)

use super::error::BrokerError;

const SEPARATOR: char = '.';
const SINGLE: &str = "*";
const TAIL: &str = ">";

/// Validate a subject filter (wildcards allowed)
pub fn validate_filter(subject: &str) -> Result<(), BrokerError> {
    if subject.is_empty() {
        return Err(BrokerError::InvalidSubject("subject is empty".into()));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(BrokerError::InvalidSubject(format!(
            "'{}' contains whitespace",
            subject
        )));
    }

    let mut tokens = subject.split(SEPARATOR).peekable();
    while let Some(token) = tokens.next() {
        if token.is_empty() {
            return Err(BrokerError::InvalidSubject(format!(
                "'{}' contains an empty token",
                subject
            )));
        }
        if token == TAIL && tokens.peek().is_some() {
            return Err(BrokerError::InvalidSubject(format!(
                "'{}' uses '>' before the last token",
                subject
            )));
        }
        if token.len() > 1 && (token.contains('*') || token.contains('>')) {
            return Err(BrokerError::InvalidSubject(format!(
                "'{}' mixes wildcards with other characters",
                subject
            )));
        }
    }
    Ok(())
}

/// Validate a subject used for publishing (no wildcards)
pub fn validate_publish(subject: &str) -> Result<(), BrokerError> {
    validate_filter(subject)?;
    if subject
        .split(SEPARATOR)
        .any(|token| token == SINGLE || token == TAIL)
    {
        return Err(BrokerError::InvalidSubject(format!(
            "cannot publish to wildcard subject '{}'",
            subject
        )));
    }
    Ok(())
}

/// True if every subject matched by `filter` is also matched by `pattern`.
/// For a literal `filter` this is plain wildcard matching.
pub fn covers(pattern: &str, filter: &str) -> bool {
    let mut pattern = pattern.split(SEPARATOR);
    let mut filter = filter.split(SEPARATOR);
    loop {
        match (pattern.next(), filter.next()) {
            (Some(TAIL), Some(_)) => return true,
            (Some(SINGLE), Some(token)) if token != TAIL => continue,
            (Some(p), Some(f)) if p == f && p != SINGLE && p != TAIL => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// True if some literal subject is matched by both filters
pub fn overlaps(a: &str, b: &str) -> bool {
    let mut a = a.split(SEPARATOR);
    let mut b = b.split(SEPARATOR);
    loop {
        match (a.next(), b.next()) {
            (Some(TAIL), Some(_)) | (Some(_), Some(TAIL)) => return true,
            (Some(x), Some(y)) if x == SINGLE || y == SINGLE || x == y => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Storage unit and cursor names: non-empty, no separators, wildcards,
/// whitespace or path characters
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/' | '\\'))
}
