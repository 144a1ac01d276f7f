#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Locating code, SQL or JSON payloads inside free-form answers.
//!
//! Precedence is always: first well-formed fenced block, then any
//! caller-supplied [`Heuristic`] in order, then the whole trimmed answer.
//! None of these functions fail.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Matches a triple-backtick block; group 1 is the optional language tag.
static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+#.\-]*)(.*?)```").expect("fence regex is valid")
});

/// Matches a JSON object with at most one level of nested objects.
static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("json regex is valid")
});

/// Typographic characters with safe ASCII spellings.
const ASCII_REPLACEMENTS: &[(char, &str)] = &[
    ('\u{2192}', "->"),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201c}', "\""),
    ('\u{201d}', "\""),
    ('\u{2013}', "-"),
    ('\u{2014}', "--"),
    ('\u{2026}', "..."),
    ('\u{00a0}', " "),
];

/// A fenced block found in an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Tag written right after the opening fence, if any.
    pub language: Option<String>,
    /// Inner text, trimmed.
    pub body:     String,
}

/// Result of an extraction, tagged with how confident it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Content of the first fenced block.
    Fenced {
        /// Tag written right after the opening fence, if any.
        language: Option<String>,
        /// Inner text, trimmed.
        body:     String,
    },
    /// Found by a caller-supplied heuristic.
    Heuristic {
        /// Name of the heuristic that matched.
        name: &'static str,
        /// Matched text, trimmed.
        body: String,
    },
    /// Nothing better was found; the whole trimmed answer.
    Whole(String),
}

impl Extraction {
    /// The extracted text.
    pub fn text(&self) -> &str {
        match self {
            Extraction::Fenced { body, .. } | Extraction::Heuristic { body, .. } => body,
            Extraction::Whole(body) => body,
        }
    }

    /// True when the payload came from a fenced block.
    pub fn is_fenced(&self) -> bool {
        matches!(self, Extraction::Fenced { .. })
    }

    /// True when nothing matched and the whole answer was used.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Extraction::Whole(_))
    }

    /// Language tag of the fenced block, if any.
    pub fn language(&self) -> Option<&str> {
        match self {
            Extraction::Fenced { language, .. } => language.as_deref(),
            _ => None,
        }
    }
}

/// Domain-specific fallbacks tried when no fenced block exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Heuristic {
    /// From the first line starting with one of `words` to the end.
    Keywords {
        /// Leading tokens, matched case-insensitively.
        words: Vec<String>,
    },
    /// Everything after the last occurrence of `marker`.
    AfterMarker {
        /// Marker phrase, matched case-insensitively.
        marker: String,
    },
    /// The first `{...}` object in the text.
    JsonObject,
}

impl Heuristic {
    /// Short name used in [`Extraction::Heuristic`].
    fn name(&self) -> &'static str {
        match self {
            Heuristic::Keywords { .. } => "keywords",
            Heuristic::AfterMarker { .. } => "after_marker",
            Heuristic::JsonObject => "json_object",
        }
    }

    /// Applies the heuristic; `None` when it finds nothing useful.
    fn apply(&self, text: &str) -> Option<String> {
        let found = match self {
            Heuristic::Keywords { words } => {
                let words: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
                let mut offset = 0;
                let mut start = None;
                for line in text.split_inclusive('\n') {
                    let lowered = line.trim_start().to_lowercase();
                    if words
                        .iter()
                        .any(|w| !w.is_empty() && lowered.starts_with(w.as_str()))
                    {
                        start = Some(offset);
                        break;
                    }
                    offset += line.len();
                }
                start.map(|s| text[s..].to_string())
            }
            Heuristic::AfterMarker { marker } => after_marker(text, marker),
            Heuristic::JsonObject => JSON_OBJECT.find(text).map(|m| m.as_str().to_string()),
        }?;

        let found = found.trim();
        (!found.is_empty()).then(|| found.to_string())
    }
}

/// Returns every well-formed fenced block in order of appearance.
///
/// A trailing opening fence without a closing one is ignored.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    FENCE
        .captures_iter(text)
        .map(|caps| {
            let language = caps
                .get(1)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let body = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            FencedBlock { language, body }
        })
        .collect()
}

/// Extracts the first fenced block, falling back to the whole trimmed text.
pub fn extract_code(text: &str) -> Extraction {
    extract_with(text, &[])
}

/// Extracts with the fenced block first, then `heuristics` in order, then the
/// whole trimmed text.
pub fn extract_with(text: &str, heuristics: &[Heuristic]) -> Extraction {
    if let Some(block) = fenced_blocks(text).into_iter().next() {
        return Extraction::Fenced {
            language: block.language,
            body:     block.body,
        };
    }

    for heuristic in heuristics {
        if let Some(body) = heuristic.apply(text) {
            return Extraction::Heuristic {
                name: heuristic.name(),
                body,
            };
        }
    }

    Extraction::Whole(text.trim().to_string())
}

/// Text following the last case-insensitive occurrence of `marker`.
pub fn after_marker(text: &str, marker: &str) -> Option<String> {
    if marker.is_empty() {
        return None;
    }
    let pattern = RegexBuilder::new(&regex::escape(marker))
        .case_insensitive(true)
        .build()
        .ok()?;
    let last = pattern.find_iter(text).last()?;
    Some(text[last.end()..].trim().to_string())
}

/// Replaces typographic characters with ASCII spellings and drops anything
/// else outside ASCII.
pub fn sanitize_ascii(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for ch in code.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else if let Some((_, replacement)) = ASCII_REPLACEMENTS.iter().find(|(c, _)| *c == ch) {
            out.push_str(replacement);
        }
    }
    out
}

/// Removes every whitespace character.
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Finds a JSON value in program output or an answer.
///
/// Tries each fenced block, then the whole trimmed text, then every `{...}`
/// span.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    fenced_blocks(text)
        .into_iter()
        .find_map(|block| serde_json::from_str(&block.body).ok())
        .or_else(|| serde_json::from_str(text.trim()).ok())
        .or_else(|| {
            JSON_OBJECT
                .find_iter(text)
                .find_map(|m| serde_json::from_str(m.as_str()).ok())
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_fenced_block_wins() {
        let answer = "Here you go:\n```python\ndef f():\n    return 1\n```\nand\n```\nother\n```";
        let extraction = extract_code(answer);
        assert!(extraction.is_fenced());
        assert_eq!(extraction.language(), Some("python"));
        assert_eq!(extraction.text(), "def f():\n    return 1");
    }

    #[test]
    fn untagged_fence_has_no_language() {
        let extraction = extract_code("```\n  SELECT 1;  \n```");
        assert_eq!(extraction.language(), None);
        assert_eq!(extraction.text(), "SELECT 1;");
    }

    #[test]
    fn plus_signs_are_part_of_the_tag() {
        let blocks = fenced_blocks("```c++\nint main() {}\n```");
        assert_eq!(blocks[0].language.as_deref(), Some("c++"));
        assert_eq!(blocks[0].body, "int main() {}");
    }

    #[test]
    fn no_fence_returns_trimmed_input() {
        let extraction = extract_code("   just some prose  \n");
        assert!(extraction.is_fallback());
        assert_eq!(extraction.text(), "just some prose");
    }

    #[test]
    fn unbalanced_fence_falls_back_to_whole_text() {
        let answer = "```rust\nfn main() {}";
        assert_eq!(extract_code(answer), Extraction::Whole(answer.to_string()));
    }

    #[test]
    fn keyword_heuristic_finds_sql() {
        let answer = "Sure, run this:\n\nCREATE TABLE people (name TEXT);\nINSERT INTO people VALUES ('a');";
        let extraction = extract_with(
            answer,
            &[Heuristic::Keywords {
                words: vec!["create".into(), "insert".into()],
            }],
        );
        assert_eq!(
            extraction.text(),
            "CREATE TABLE people (name TEXT);\nINSERT INTO people VALUES ('a');"
        );
        assert!(matches!(extraction, Extraction::Heuristic { name: "keywords", .. }));
    }

    #[test]
    fn heuristics_are_tried_in_order() {
        let answer = "reasoning... Final Answer: v+2";
        let extraction = extract_with(
            answer,
            &[
                Heuristic::JsonObject,
                Heuristic::AfterMarker {
                    marker: "final answer:".into(),
                },
            ],
        );
        assert_eq!(extraction.text(), "v+2");
    }

    #[test]
    fn after_marker_uses_last_occurrence() {
        assert_eq!(
            after_marker("final answer: no. FINAL ANSWER: yes", "final answer:").as_deref(),
            Some("yes")
        );
        assert_eq!(after_marker("nothing here", "final answer:"), None);
    }

    #[test]
    fn after_marker_keeps_original_text_around_case_changing_characters() {
        // `İ` grows and `Ω` (ohm sign) shrinks when lowercased.
        assert_eq!(
            after_marker("\u{130} final answer:\u{e9}v+2 \u{2126}", "final answer:").as_deref(),
            Some("\u{e9}v+2 \u{2126}")
        );
        assert_eq!(
            after_marker("\u{130} FINAL ANSWER: *x + 2", "final answer:").as_deref(),
            Some("*x + 2")
        );
    }

    #[test]
    fn sanitize_replaces_typography_and_drops_the_rest() {
        let code = "echo \u{201c}hi\u{201d} \u{2192} done\u{2026} \u{1f600}";
        assert_eq!(sanitize_ascii(code), "echo \"hi\" -> done... ");
    }

    #[test]
    fn json_prefers_fenced_blocks() {
        let text = "noise {\"a\": 2}\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text), Some(json!({"a": 1})));
    }

    #[test]
    fn json_falls_back_to_embedded_object() {
        let text = "counts: {\"the\": 11, \"nested\": {\"x\": 1}} done";
        assert_eq!(extract_json(text), Some(json!({"the": 11, "nested": {"x": 1}})));
        assert_eq!(extract_json("no json at all"), None);
    }
}
