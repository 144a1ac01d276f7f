#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Rendering graded assertions for people (tables) and harnesses (JSON).

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Panel, Style, Width, object::Rows},
};

use crate::{
    constants::TABLE_REASON_WIDTH,
    util::{one_line, truncate},
    verdict::Verdict,
};

/// One graded assertion.
#[derive(Tabled, Debug, Clone, PartialEq, Serialize)]
pub struct GradedRow {
    /// Assertion name.
    #[tabled(rename = "Assertion")]
    pub assertion: String,
    /// Whether it passed.
    #[tabled(rename = "Pass")]
    pub pass:      bool,
    /// Score in `[0, 1]`.
    #[tabled(rename = "Score")]
    pub score:     f64,
    /// Verdict reason.
    #[tabled(rename = "Reason")]
    pub reason:    String,
}

impl GradedRow {
    /// Row for `verdict` graded under `assertion`.
    pub fn new(assertion: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            assertion: assertion.into(),
            pass:      verdict.passed,
            score:     verdict.score,
            reason:    verdict.reason,
        }
    }
}

/// Renders rows as a table with one-line, truncated reasons and a pass count.
pub fn render_table(rows: &[GradedRow]) -> String {
    let passed = rows.iter().filter(|row| row.pass).count();
    let display: Vec<GradedRow> = rows
        .iter()
        .map(|row| GradedRow {
            score: (row.score * 100.0).round() / 100.0,
            reason: truncate(&one_line(&row.reason), TABLE_REASON_WIDTH),
            ..row.clone()
        })
        .collect();

    Table::new(&display)
        .with(Panel::header("Verdicts"))
        .with(Panel::footer(format!("Passed: {passed}/{}", rows.len())))
        .with(Modify::new(Rows::new(1..)).with(Width::wrap(40).keep_words(true)))
        .with(
            Modify::new(Rows::first())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(
            Modify::new(Rows::last())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(Style::modern())
        .to_string()
}

/// Renders rows as JSON. A single row renders as the bare verdict object
/// (`pass`, `score`, `reason`); several render as an array of rows.
pub fn render_json(rows: &[GradedRow]) -> Result<String> {
    match rows {
        [row] => serde_json::to_string_pretty(&Verdict {
            passed: row.pass,
            score:  row.score,
            reason: row.reason.clone(),
        }),
        _ => serde_json::to_string_pretty(rows),
    }
    .context("Could not serialize verdicts")
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn rows() -> Vec<GradedRow> {
        vec![
            GradedRow::new("docker_cuda", Verdict::pass("Found `nvidia-docker2`")),
            GradedRow::new("program_sqrt", Verdict::fail("Code execution failed:\nrun stage ".repeat(20))),
        ]
    }

    #[test]
    fn table_counts_passes_and_shortens_reasons() {
        let table = render_table(&rows());
        assert!(table.contains("Passed: 1/2"));
        assert!(table.contains("docker_cuda"));
        assert!(table.matches("run stage").count() < 20);
    }

    #[test]
    fn single_row_json_is_the_verdict_contract() {
        let rendered = render_json(&rows()[..1]).expect("json");
        let value: Value = serde_json::from_str(&rendered).expect("parse");
        assert_eq!(value, json!({"pass": true, "score": 1.0, "reason": "Found `nvidia-docker2`"}));
    }

    #[test]
    fn many_rows_render_as_array() {
        let rendered = render_json(&rows()).expect("json");
        let value: Value = serde_json::from_str(&rendered).expect("parse");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
        assert_eq!(value[1]["assertion"], "program_sqrt");
    }
}
