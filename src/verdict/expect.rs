#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Local comparators: exact, substring, numeric tolerance, ordering and JSON
//! subset.

use std::sync::LazyLock;

use anyhow::{Result, bail, ensure};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;

use super::Verdict;
use crate::{
    constants::REASON_TRUNCATE,
    extract::{extract_json, strip_whitespace},
    util::truncate,
};

/// Slack added to numeric tolerances to absorb float representation error.
const FLOAT_SLACK: f64 = 1e-9;

/// Matches integers, decimals and exponent forms, with an optional sign.
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?").expect("number regex is valid")
});

/// What the output is compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Expectation {
    /// Output equals `expected` after whitespace normalization.
    Exact {
        /// Expected text.
        expected:            String,
        /// Compare case-insensitively.
        #[serde(default)]
        ignore_case:         bool,
        /// Skip whitespace normalization.
        #[serde(default)]
        preserve_whitespace: bool,
    },
    /// Required and forbidden literals.
    Contains {
        /// Every one of these must appear.
        #[serde(default)]
        all_of:            Vec<String>,
        /// At least one of these must appear, when non-empty.
        #[serde(default)]
        any_of:            Vec<String>,
        /// None of these may appear.
        #[serde(default)]
        none_of:           Vec<String>,
        /// Compare case-insensitively.
        #[serde(default)]
        ignore_case:       bool,
        /// Remove all whitespace from both sides first.
        #[serde(default)]
        ignore_whitespace: bool,
    },
    /// A number in the output is within `epsilon` of `expected`.
    Numeric {
        /// Expected value.
        expected: f64,
        /// Absolute tolerance.
        #[serde(default)]
        epsilon:  f64,
    },
    /// Items appear in this relative order, by first occurrence.
    Ordered {
        /// Items in required order.
        items:       Vec<String>,
        /// Compare case-insensitively.
        #[serde(default)]
        ignore_case: bool,
    },
    /// Output holds a JSON object containing every key of `expected`.
    JsonSubset {
        /// Expected object.
        expected:  Value,
        /// Absolute tolerance for numbers.
        #[serde(default)]
        tolerance: f64,
        /// All-or-nothing scoring instead of one share per key.
        #[serde(default)]
        strict:    bool,
    },
}

impl Expectation {
    /// Shorthand for an exact comparison with default normalization.
    pub fn exact(expected: impl Into<String>) -> Self {
        Expectation::Exact {
            expected:            expected.into(),
            ignore_case:         false,
            preserve_whitespace: false,
        }
    }

    /// Shorthand for "every literal must appear".
    pub fn contains_all<S: Into<String>>(literals: impl IntoIterator<Item = S>) -> Self {
        Expectation::Contains {
            all_of:            literals.into_iter().map(Into::into).collect(),
            any_of:            Vec::new(),
            none_of:           Vec::new(),
            ignore_case:       false,
            ignore_whitespace: false,
        }
    }

    /// Shorthand for "at least one literal must appear".
    pub fn contains_any<S: Into<String>>(literals: impl IntoIterator<Item = S>) -> Self {
        Expectation::Contains {
            all_of:            Vec::new(),
            any_of:            literals.into_iter().map(Into::into).collect(),
            none_of:           Vec::new(),
            ignore_case:       false,
            ignore_whitespace: false,
        }
    }

    /// Compares `output` and produces a verdict. Never panics; malformed
    /// expectations become failing verdicts.
    pub fn evaluate(&self, output: &str) -> Verdict {
        let verdict = match self {
            Expectation::Exact {
                expected,
                ignore_case,
                preserve_whitespace,
            } => Ok(exact(output, expected, *ignore_case, *preserve_whitespace)),
            Expectation::Contains {
                all_of,
                any_of,
                none_of,
                ignore_case,
                ignore_whitespace,
            } => contains(output, all_of, any_of, none_of, *ignore_case, *ignore_whitespace),
            Expectation::Numeric { expected, epsilon } => numeric(output, *expected, *epsilon),
            Expectation::Ordered { items, ignore_case } => ordered(output, items, *ignore_case),
            Expectation::JsonSubset {
                expected,
                tolerance,
                strict,
            } => json_subset(output, expected, *tolerance, *strict),
        };
        verdict.unwrap_or_else(|err| Verdict::errored(format!("{err:#}")))
    }
}

/// CRLF to LF, trailing whitespace dropped per line, outer trim.
fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .join("\n")
        .trim()
        .to_string()
}

/// Exact comparison.
fn exact(output: &str, expected: &str, ignore_case: bool, preserve_whitespace: bool) -> Verdict {
    let (actual, expected) = if preserve_whitespace {
        (output.to_string(), expected.to_string())
    } else {
        (normalize(output), normalize(expected))
    };
    let equal = if ignore_case {
        actual.to_lowercase() == expected.to_lowercase()
    } else {
        actual == expected
    };

    if equal {
        return Verdict::pass("Output matches expected exactly");
    }

    let diff = TextDiff::from_lines(expected.as_str(), actual.as_str())
        .unified_diff()
        .header("expected", "actual")
        .to_string();
    Verdict::fail(format!(
        "Output does not match expected:\n{}",
        truncate(&diff, REASON_TRUNCATE)
    ))
}

/// Renders literals as a backticked list.
fn listing(items: &[&String]) -> String {
    items.iter().map(|item| format!("`{item}`")).join(", ")
}

/// Substring comparison.
fn contains(
    output: &str,
    all_of: &[String],
    any_of: &[String],
    none_of: &[String],
    ignore_case: bool,
    ignore_whitespace: bool,
) -> Result<Verdict> {
    ensure!(
        !(all_of.is_empty() && any_of.is_empty() && none_of.is_empty()),
        "contains expectation lists no literals"
    );

    let prepare = |text: &str| {
        let text = if ignore_whitespace { strip_whitespace(text) } else { text.to_string() };
        if ignore_case { text.to_lowercase() } else { text }
    };
    let haystack = prepare(output);
    let found = |literal: &String| haystack.contains(&prepare(literal.as_str()));

    let missing: Vec<&String> = all_of.iter().filter(|l| !found(*l)).collect();
    let any_hits: Vec<&String> = any_of.iter().filter(|l| found(*l)).collect();
    let forbidden: Vec<&String> = none_of.iter().filter(|l| found(*l)).collect();

    let mut problems = Vec::new();
    if !missing.is_empty() {
        problems.push(format!("Missing required: {}", listing(&missing)));
    }
    if !any_of.is_empty() && any_hits.is_empty() {
        let all: Vec<&String> = any_of.iter().collect();
        problems.push(format!("None of the expected literals were found: {}", listing(&all)));
    }
    if !forbidden.is_empty() {
        problems.push(format!("Found forbidden: {}", listing(&forbidden)));
    }

    if problems.is_empty() {
        let present: Vec<&String> = all_of.iter().chain(any_hits).collect();
        if present.is_empty() {
            Ok(Verdict::pass("No forbidden literals found"))
        } else {
            Ok(Verdict::pass(format!("Found {}", listing(&present))))
        }
    } else {
        Ok(Verdict::fail(problems.join("; ")))
    }
}

/// Numeric tolerance comparison.
fn numeric(output: &str, expected: f64, epsilon: f64) -> Result<Verdict> {
    ensure!(expected.is_finite(), "expected value {expected} is not finite");
    ensure!(epsilon >= 0.0, "epsilon must not be negative, got {epsilon}");

    let trimmed = output.trim();
    let candidates: Vec<f64> = match trimmed.parse::<f64>() {
        Ok(value) => vec![value],
        Err(_) => NUMBER
            .find_iter(trimmed)
            .filter_map(|m| m.as_str().parse::<f64>().ok())
            .collect(),
    };

    let Some(closest) = candidates
        .into_iter()
        .filter(|v| v.is_finite())
        .min_by(|a, b| (a - expected).abs().total_cmp(&(b - expected).abs()))
    else {
        return Ok(Verdict::fail(format!(
            "No numeric value found in output `{}`",
            truncate(trimmed, 200)
        )));
    };

    let delta = (closest - expected).abs();
    if delta <= epsilon + FLOAT_SLACK {
        Ok(Verdict::pass(format!("Found {closest}, within {epsilon} of {expected}")))
    } else {
        Ok(Verdict::fail(format!(
            "Closest value {closest} is {delta} away from {expected} (allowed {epsilon})"
        )))
    }
}

/// Relative-order comparison by first occurrence.
fn ordered(output: &str, items: &[String], ignore_case: bool) -> Result<Verdict> {
    ensure!(!items.is_empty(), "ordered expectation lists no items");

    let fold = |text: &str| if ignore_case { text.to_lowercase() } else { text.to_string() };
    let haystack = fold(output);
    let positions: Vec<Option<usize>> = items.iter().map(|item| haystack.find(&fold(item.as_str()))).collect();

    let missing: Vec<&String> = items
        .iter()
        .zip(&positions)
        .filter(|(_, pos)| pos.is_none())
        .map(|(item, _)| item)
        .collect();
    if !missing.is_empty() {
        return Ok(Verdict::fail(format!("Missing: {}", listing(&missing))));
    }

    let positions: Vec<usize> = positions.into_iter().flatten().collect();
    for (i, pair) in positions.windows(2).enumerate() {
        if pair[0] >= pair[1] {
            return Ok(Verdict::fail(format!(
                "Expected `{}` before `{}`, but it appears after",
                items[i],
                items[i + 1]
            )));
        }
    }

    Ok(Verdict::pass(format!("All {} items appear in order", items.len())))
}

/// Compares two JSON values, recursing into objects and arrays.
fn values_match(expected: &Value, actual: &Value, tolerance: f64) -> bool {
    match (expected, actual) {
        (Value::Number(e), Value::Number(a)) => match (e.as_f64(), a.as_f64()) {
            (Some(e), Some(a)) => (e - a).abs() <= tolerance + FLOAT_SLACK,
            _ => e == a,
        },
        (Value::Object(e), Value::Object(a)) => e
            .iter()
            .all(|(key, value)| a.get(key).is_some_and(|other| values_match(value, other, tolerance))),
        (Value::Array(e), Value::Array(a)) => {
            e.len() == a.len() && e.iter().zip(a).all(|(x, y)| values_match(x, y, tolerance))
        }
        _ => expected == actual,
    }
}

/// Graduated JSON subset comparison.
fn json_subset(output: &str, expected: &Value, tolerance: f64, strict: bool) -> Result<Verdict> {
    let Value::Object(expected) = expected else {
        bail!("json_subset expectation must be an object");
    };
    ensure!(!expected.is_empty(), "json_subset expectation has no keys");
    ensure!(tolerance >= 0.0, "tolerance must not be negative, got {tolerance}");

    let Some(parsed) = extract_json(output) else {
        return Ok(Verdict::fail("No JSON object found in output"));
    };
    let Value::Object(actual) = parsed else {
        return Ok(Verdict::fail("Output JSON is not an object"));
    };

    Ok(score_subset(expected, &actual, tolerance, strict))
}

/// Scores how many expected keys `actual` matches. Under `strict` any
/// mismatch scores zero.
fn score_subset(
    expected: &Map<String, Value>,
    actual: &Map<String, Value>,
    tolerance: f64,
    strict: bool,
) -> Verdict {
    let total = expected.len();
    let mut errors = Vec::new();
    for (key, value) in expected {
        match actual.get(key) {
            Some(found) if values_match(value, found, tolerance) => {}
            Some(found) => errors.push(format!("`{key}`: expected {value}, got {found}")),
            None => errors.push(format!("Missing `{key}`")),
        }
    }

    let correct = total - errors.len();
    let score = if strict && !errors.is_empty() {
        0.0
    } else {
        correct as f64 / total as f64
    };
    if errors.is_empty() {
        Verdict::partial(score, format!("All {total} expected keys match"))
    } else {
        Verdict::partial(
            score,
            format!(
                "Only {correct}/{total} correct. Errors: {}",
                errors.iter().take(3).join("; ")
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn numeric_expect(expected: f64, epsilon: f64) -> Expectation {
        Expectation::Numeric { expected, epsilon }
    }

    #[test]
    fn exact_normalizes_incidental_whitespace() {
        let verdict = Expectation::exact("a\nb").evaluate("  a   \r\nb\t\n\n");
        assert!(verdict.passed, "{verdict}");
    }

    #[test]
    fn exact_mismatch_embeds_diff() {
        let verdict = Expectation::exact("one\ntwo").evaluate("one\nthree");
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("-two"));
        assert!(verdict.reason.contains("+three"));
    }

    #[test]
    fn numeric_tolerance_window() {
        let expect = numeric_expect(111.1, 0.1);
        for output in ["111.05", "111.1", "111.15"] {
            assert!(expect.evaluate(output).passed, "{output} should pass");
        }
        for output in ["110.9", "111.3"] {
            assert!(!expect.evaluate(output).passed, "{output} should fail");
        }
    }

    #[test]
    fn numeric_scans_tokens_and_cites_closest() {
        let expect = numeric_expect(625.0, 0.0);
        assert!(expect.evaluate("result: 625\n").passed);

        let verdict = expect.evaluate("got 600 and 620");
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("620"), "{}", verdict.reason);

        assert!(!expect.evaluate("nothing numeric").passed);
    }

    #[test]
    fn negative_epsilon_is_an_error_verdict() {
        let verdict = numeric_expect(1.0, -0.5).evaluate("1");
        assert!(!verdict.passed);
        assert!(verdict.reason.starts_with("Error during evaluation:"));
    }

    #[test]
    fn ordering_uses_first_occurrence() {
        let expect = Expectation::Ordered {
            items:       vec!["California".into(), "Louisiana".into(), "Wisconsin".into()],
            ignore_case: false,
        };
        assert!(expect.evaluate("California, then Louisiana, then Wisconsin").passed);

        let verdict = expect.evaluate("... Louisiana ... California ... Wisconsin ...");
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, "Expected `California` before `Louisiana`, but it appears after");

        let missing = expect.evaluate("California and Wisconsin");
        assert_eq!(missing.reason, "Missing: `Louisiana`");
    }

    #[test]
    fn contains_names_every_missing_alternative() {
        let expect = Expectation::contains_any(["nvidia-container-toolkit", "nvidia-docker2"]);
        let verdict = expect.evaluate("Install docker and reboot.");
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0.0);
        assert!(verdict.reason.contains("nvidia-container-toolkit"));
        assert!(verdict.reason.contains("nvidia-docker2"));

        assert!(expect.evaluate("apt install nvidia-docker2").passed);
    }

    #[test]
    fn contains_flags_forbidden_and_folds_case_and_space() {
        let expect = Expectation::Contains {
            all_of:            vec!["v + 2".into()],
            any_of:            Vec::new(),
            none_of:           vec!["SQRT".into()],
            ignore_case:       true,
            ignore_whitespace: true,
        };
        assert!(expect.evaluate("answer: V+2").passed);

        let verdict = expect.evaluate("v+2 via sqrt");
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, "Found forbidden: `SQRT`");
    }

    #[test]
    fn empty_contains_is_malformed() {
        let verdict = Expectation::contains_all(Vec::<String>::new()).evaluate("x");
        assert!(verdict.reason.starts_with("Error during evaluation:"));
    }

    #[test]
    fn json_subset_is_graduated() {
        let expect = Expectation::JsonSubset {
            expected:  json!({"2024": 69.71, "2023": 71.07, "2022": 65.79, "2021": 66.56}),
            tolerance: 0.01,
            strict:    false,
        };

        let full = expect.evaluate("```json\n{\"2024\": 69.712, \"2023\": 71.07, \"2022\": 65.79, \"2021\": 66.56}\n```");
        assert!(full.passed, "{full}");

        let half = expect.evaluate("{\"2024\": 69.71, \"2023\": 71.07, \"2022\": 1.0}");
        assert!(!half.passed);
        assert_eq!(half.score, 0.5);
        assert!(half.reason.starts_with("Only 2/4 correct."));
    }

    #[test]
    fn json_subset_recurses_into_objects() {
        let expect = Expectation::JsonSubset {
            expected:  json!({"counts": {"the": 2}}),
            tolerance: 0.0,
            strict:    false,
        };
        assert!(expect.evaluate("{\"counts\": {\"the\": 2, \"a\": 1}}").passed);
        assert!(!expect.evaluate("{\"counts\": {\"the\": 3}}").passed);
        assert!(!expect.evaluate("no json").passed);
    }

    #[test]
    fn strict_json_subset_is_all_or_nothing() {
        let expect = Expectation::JsonSubset {
            expected:  json!({"the": 11, "it": 10}),
            tolerance: 0.0,
            strict:    true,
        };
        let miss = expect.evaluate("{\"the\": 11, \"it\": 9}");
        assert!(!miss.passed);
        assert_eq!(miss.score, 0.0);
        assert!(miss.reason.starts_with("Only 1/2 correct."));
        assert!(expect.evaluate("{\"the\": 11, \"it\": 10, \"was\": 10}").passed);
    }

    #[test]
    fn expectations_deserialize_by_mode() {
        let expect: Expectation =
            serde_json::from_value(json!({"mode": "contains", "any_of": ["a"]})).expect("parse");
        assert_eq!(expect, Expectation::contains_any(["a"]));
    }
}
