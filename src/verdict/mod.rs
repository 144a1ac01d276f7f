#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The graded outcome handed back to the evaluation harness, and the local
//! comparison modes that produce it.

/// Comparison modes.
pub mod expect;

use std::fmt::Display;

pub use expect::Expectation;
use serde::{Deserialize, Serialize};

/// Outcome of one grading call.
///
/// Serializes as `{"pass": .., "score": .., "reason": ..}`, which is the whole
/// contract with the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the criterion was met.
    #[serde(rename = "pass")]
    pub passed: bool,
    /// Score in `[0, 1]`.
    pub score:  f64,
    /// What was found versus what was expected.
    pub reason: String,
}

impl Verdict {
    /// A passing verdict with full score.
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            score:  1.0,
            reason: reason.into(),
        }
    }

    /// A failing verdict with zero score.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            score:  0.0,
            reason: reason.into(),
        }
    }

    /// A graduated verdict. The score is clamped to `[0, 1]` and only a full
    /// score passes.
    pub fn partial(score: f64, reason: impl Into<String>) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            passed: score >= 1.0,
            score,
            reason: reason.into(),
        }
    }

    /// A failing verdict for an internal error.
    pub fn errored(err: impl Display) -> Self {
        Self::fail(format!("Error during evaluation: {err}"))
    }

    /// Appends a parenthesized note to the reason.
    pub fn annotate(mut self, note: impl Display) -> Self {
        self.reason = format!("{} ({note})", self.reason);
        self
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "{label} ({:.2}): {}", self.score, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_harness_keys() {
        let value = serde_json::to_value(Verdict::pass("ok")).expect("serialize");
        assert_eq!(value, serde_json::json!({"pass": true, "score": 1.0, "reason": "ok"}));
    }

    #[test]
    fn partial_clamps_and_only_full_score_passes() {
        assert!(!Verdict::partial(0.99, "close").passed);
        assert!(Verdict::partial(1.5, "over").passed);
        assert_eq!(Verdict::partial(1.5, "over").score, 1.0);
        assert_eq!(Verdict::partial(-2.0, "under").score, 0.0);
        assert_eq!(Verdict::partial(f64::NAN, "nan").score, 0.0);
    }

    #[test]
    fn errored_prefixes_reason() {
        let verdict = Verdict::errored("boom");
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, "Error during evaluation: boom");
        assert_eq!(verdict.to_string(), "FAIL (0.00): Error during evaluation: boom");
    }
}
