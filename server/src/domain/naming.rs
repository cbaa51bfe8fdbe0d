//! Topic naming policy
//!
//! Maps caller topics to broker resource names. Topics may carry `.`
//! separators and wildcard markers that resource names cannot, so every
//! character outside `[A-Za-z0-9_]` becomes `_`.

/// Prefix for storage units provisioned per topic
pub const STORAGE_UNIT_PREFIX: &str = "unit_";

/// Prefix for per-topic durable cursors
pub const CURSOR_PREFIX: &str = "durable_";

const PLACEHOLDER: char = '_';

/// Storage unit name for a topic
pub fn storage_unit_name(topic: &str) -> String {
    format!("{}{}", STORAGE_UNIT_PREFIX, sanitize(topic))
}

/// Durable cursor name for a topic
pub fn cursor_name(topic: &str) -> String {
    format!("{}{}", CURSOR_PREFIX, sanitize(topic))
}

fn sanitize(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                PLACEHOLDER
            }
        })
        .collect()
}
