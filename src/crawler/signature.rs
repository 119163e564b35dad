//! Grouping keys for diagnostics.
//!
//! The primary signature is exact: text and location are joined verbatim,
//! with the text length up front so the split point is never ambiguous.
//! A normalized variant exists for presentation only and is never used to
//! count affected pages.

use std::sync::OnceLock;

use regex::Regex;

use crate::crawler::task::DiagnosticRecord;

/// Joins text and location.
pub const SEPARATOR: &str = "\u{1f}|::|\u{1f}";

/// Stand-in for a missing location.
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Exact grouping key for a diagnostic.
pub fn signature(record: &DiagnosticRecord) -> String {
    signature_of(&record.text, record.location_url.as_deref())
}

/// `<text byte length>:<text><SEPARATOR><location>`
pub fn signature_of(text: &str, location: Option<&str>) -> String {
    format!(
        "{}:{}{}{}",
        text.len(),
        text,
        SEPARATOR,
        location.unwrap_or(UNKNOWN_LOCATION)
    )
}

/// Looser key that folds ids, numbers and query strings.
///
/// Two diagnostics that differ only by a request id or a cache-busting
/// parameter share a normalized signature.
pub fn normalized_signature(record: &DiagnosticRecord) -> String {
    let text = normalize_text(&record.text);
    let location = record.location_url.as_deref().map(strip_query);
    signature_of(&text, location.as_deref())
}

fn patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"https?://[^\s?#]+[?#][^\s]*", ""),
            (r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b", "<uuid>"),
            (r"(?i)\b[0-9a-f]{16,}\b", "<hex>"),
            (r"\d+", "<n>"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|regex| (regex, replacement))
        })
        .collect()
    })
}

fn normalize_text(text: &str) -> String {
    let mut normalized = text.to_string();
    for (regex, replacement) in patterns() {
        normalized = if replacement.is_empty() {
            // URL with a query or fragment: keep everything before it
            regex
                .replace_all(&normalized, |caps: &regex::Captures| strip_query(&caps[0]))
                .into_owned()
        } else {
            regex.replace_all(&normalized, *replacement).into_owned()
        };
    }
    normalized
}

fn strip_query(url: &str) -> String {
    match url.find(['?', '#']) {
        Some(index) => url[..index].to_string(),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::task::DiagnosticKind;
    use chrono::Utc;

    fn record(text: &str, location: Option<&str>) -> DiagnosticRecord {
        DiagnosticRecord {
            text: text.to_string(),
            kind: DiagnosticKind::ConsoleError,
            location_url: location.map(str::to_string),
            line_number: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn equal_text_and_location_share_signature() {
        let a = record("X failed", Some("https://example.com/a.js"));
        let b = record("X failed", Some("https://example.com/a.js"));
        assert_eq!(signature(&a), signature(&b));
    }

    #[test]
    fn missing_locations_match_each_other() {
        assert_eq!(signature(&record("boom", None)), signature(&record("boom", None)));
    }

    #[test]
    fn missing_location_differs_from_real_location() {
        let absent = record("boom", None);
        let present = record("boom", Some("https://example.com/unknown.js"));
        assert_ne!(signature(&absent), signature(&present));
    }

    #[test]
    fn different_location_gives_different_signature() {
        let a = record("X failed", Some("https://example.com/a.js"));
        let b = record("X failed", Some("https://example.com/b.js"));
        assert_ne!(signature(&a), signature(&b));
    }

    #[test]
    fn exact_signature_keeps_numbers() {
        let a = record("request 123 failed", None);
        let b = record("request 456 failed", None);
        assert_ne!(signature(&a), signature(&b));
    }

    #[test]
    fn separator_cannot_be_forged_by_plain_text() {
        // text "a|b" + location "c" must not collide with text "a" + location "b|c"
        let a = record("a|b", Some("c"));
        let b = record("a", Some("b|c"));
        assert_ne!(signature(&a), signature(&b));
    }

    #[test]
    fn separator_inside_text_cannot_shift_the_split() {
        let forged_text = format!("a{}b", SEPARATOR);
        let forged_location = format!("b{}c", SEPARATOR);
        let a = record(&forged_text, Some("c"));
        let b = record("a", Some(&forged_location));
        assert_ne!(signature(&a), signature(&b));
    }

    #[test]
    fn length_prefix_cannot_be_forged_either() {
        // "1:a" + SEP + "x" vs text that itself starts with a fake prefix
        let inner = signature_of("a", Some("x"));
        let a = record("", Some(&inner));
        let b = record("a", Some("x"));
        assert_ne!(signature(&a), signature(&b));
    }

    #[test]
    fn absent_location_and_literal_unknown_share_a_signature() {
        // the placeholder is a plain string, so an "unknown" location folds into it
        let absent = record("boom", None);
        let literal = record("boom", Some(UNKNOWN_LOCATION));
        assert_eq!(signature(&absent), signature(&literal));
    }

    #[test]
    fn normalized_signature_folds_ids_and_queries() {
        let a = record(
            "Request 123 for https://cdn.example.com/x.js?v=1 failed (id 3f2b1c9a-1d2e-4f5a-8b9c-0a1b2c3d4e5f)",
            Some("https://example.com/app.js?cache=1"),
        );
        let b = record(
            "Request 987 for https://cdn.example.com/x.js?v=2 failed (id 00000000-1111-2222-3333-444444444444)",
            Some("https://example.com/app.js?cache=2"),
        );
        assert_ne!(signature(&a), signature(&b));
        assert_eq!(normalized_signature(&a), normalized_signature(&b));
    }
}
