//! User-facing messages: error hints, status lines and key/value summaries.

use crate::report::normalizer::TextNormalizer;
use serde_json::Value;

/// Known failure keywords and the hint shown for each, checked in order.
const ERROR_HINTS: &[(&str, &str)] = &[
    (
        "connection",
        "Connection error: could not reach the data source. Check the network and the provider configuration.",
    ),
    (
        "timeout",
        "Request timed out: the query took too long. Try narrowing the query range.",
    ),
    (
        "permission",
        "Permission error: no access to the data source. Check the credential configuration.",
    ),
    (
        "auth",
        "Authentication error: identity verification failed. Check the configured credentials.",
    ),
    (
        "not found",
        "Data not found: check the query conditions and the data source configuration.",
    ),
    (
        "invalid",
        "Invalid parameters: the query arguments were rejected. Check the input format.",
    ),
    (
        "rate limit",
        "Rate limited: too many requests. Please retry later.",
    ),
];

/// Severity of a status line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusKind {
    #[default]
    Info,
    Warning,
    Error,
    Success,
    Loading,
    Processing,
}

impl StatusKind {
    pub fn icon(&self) -> &'static str {
        match self {
            StatusKind::Info => "ℹ️",
            StatusKind::Warning => "⚠️",
            StatusKind::Error => "❌",
            StatusKind::Success => "✅",
            StatusKind::Loading => "⏳",
            StatusKind::Processing => "🔄",
        }
    }
}

/// Map an error description to a user-facing hint.
pub fn format_error_message(normalizer: &TextNormalizer, error: &str) -> String {
    let lower = error.to_lowercase();
    if let Some((_, hint)) = ERROR_HINTS.iter().find(|(keyword, _)| lower.contains(keyword)) {
        return hint.to_string();
    }

    format!(
        "An error occurred while processing the query: {}",
        normalizer.clean_basic(error)
    )
}

pub fn format_status_message(message: &str, kind: StatusKind) -> String {
    format!("{} {}", kind.icon(), message)
}

/// Render `key: value` pairs as a bulleted summary.
pub fn format_summary(entries: &[(&str, Value)]) -> String {
    if entries.is_empty() {
        return "No data to display".to_string();
    }

    entries
        .iter()
        .map(|(key, value)| format!("• {}: {}", title_case(key), format_value(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                group_thousands(i.unsigned_abs(), i < 0)
            } else if let Some(u) = n.as_u64() {
                group_thousands(u, false)
            } else {
                format!("{:.2}", n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn group_thousands(n: u64, negative: bool) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if negative {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn title_case(key: &str) -> String {
    key.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_hints_in_order() {
        let normalizer = TextNormalizer::new();

        let both = format_error_message(&normalizer, "Connection TIMEOUT while reading");
        assert!(both.starts_with("Connection error"));

        let auth = format_error_message(&normalizer, "401 Unauthorized: auth token expired");
        assert!(auth.starts_with("Authentication error"));

        let limited = format_error_message(&normalizer, "Rate limit exceeded");
        assert!(limited.starts_with("Rate limited"));
    }

    #[test]
    fn test_unknown_error_is_cleaned() {
        let normalizer = TextNormalizer::new();
        let message = format_error_message(&normalizer, "**boom** in `parser`\\nretry");
        assert_eq!(
            message,
            "An error occurred while processing the query: boom in parser\nretry"
        );
    }

    #[test]
    fn test_status_message() {
        assert_eq!(format_status_message("ready", StatusKind::Success), "✅ ready");
        assert_eq!(format_status_message("note", StatusKind::default()), "ℹ️ note");
    }

    #[test]
    fn test_summary() {
        let summary = format_summary(&[
            ("total_records", json!(1234567)),
            ("error_rate", json!(0.0567)),
            ("delta", json!(-1500)),
            ("source", json!("nginx")),
            ("flags", json!([1, 2])),
        ]);

        assert_eq!(
            summary,
            "• Total Records: 1,234,567\n• Error Rate: 0.06\n• Delta: -1,500\n• Source: nginx\n• Flags: [1,2]"
        );
        assert_eq!(format_summary(&[]), "No data to display");
    }
}
