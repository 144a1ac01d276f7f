#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Small string helpers.

use std::time::Duration;

/// Shortens `text` to at most `max` characters, marking the cut with `...`.
///
/// Counts characters rather than bytes so multi-byte output never splits.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Collapses every run of whitespace into a single space.
pub fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a whole number of seconds, ignoring blank or malformed values.
pub fn parse_secs(value: Option<&str>) -> Option<Duration> {
    value
        .map(str::trim)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn truncate_marks_the_cut() {
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn one_line_collapses_whitespace() {
        assert_eq!(one_line("a\n  b\tc "), "a b c");
    }

    #[test]
    fn parse_secs_ignores_garbage() {
        assert_eq!(parse_secs(Some(" 12 ")), Some(Duration::from_secs(12)));
        assert_eq!(parse_secs(Some("soon")), None);
        assert_eq!(parse_secs(None), None);
    }
}
