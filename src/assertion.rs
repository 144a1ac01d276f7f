#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The grading-function boundary.
//!
//! An [`Assertion`] takes a candidate answer (plus optional context) and
//! returns a [`Verdict`]. Nothing escapes [`Assertion::grade`]: extraction
//! falls back, runner failures are encoded in the execution result, judge
//! failures become "unavailable" and panics are caught.

use std::{
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use bon::Builder;
use futures::FutureExt;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config,
    extract::{Extraction, Heuristic, extract_with, sanitize_ascii},
    judge::{JudgeClient, JudgeCriterion, judge},
    runner::{Fixture, Harness, Redirect, Runner, Toolchain},
    verdict::{Expectation, Verdict},
};

/// Note added to failing verdicts graded from the whole-answer fallback.
const FALLBACK_NOTE: &str = "no fenced code block found; graded the whole answer";

/// How the payload is pulled out of the answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractPlan {
    /// Use the trimmed answer as-is, skipping fence detection.
    pub raw:        bool,
    /// Fallbacks tried when the answer has no fenced block.
    pub heuristics: Vec<Heuristic>,
    /// Force (or suppress) ASCII sanitizing of the payload.
    pub ascii:      Option<bool>,
}

impl ExtractPlan {
    /// Plan that grades the whole trimmed answer.
    pub fn raw() -> Self {
        Self {
            raw: true,
            ..Self::default()
        }
    }

    /// Plan that tries `heuristics` after the fenced block.
    pub fn with_heuristics(heuristics: impl IntoIterator<Item = Heuristic>) -> Self {
        Self {
            heuristics: heuristics.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Applies the plan to `answer`.
    pub fn apply(&self, answer: &str) -> Extraction {
        if self.raw {
            Extraction::Whole(answer.trim().to_string())
        } else {
            extract_with(answer, &self.heuristics)
        }
    }

    /// Whether a whole-text result means nothing better was found.
    fn is_guesswork(&self, extraction: &Extraction) -> bool {
        !self.raw && extraction.is_fallback()
    }
}

/// Which captured stream the expectation is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    /// Standard output of the last step.
    #[default]
    Stdout,
    /// Standard output followed by standard error.
    Combined,
}

/// Extract, run, then compare.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct ProgramCheck {
    /// How the snippet is pulled out of the answer.
    #[builder(default)]
    #[serde(default)]
    pub extract:              ExtractPlan,
    /// Interpreter or compiler.
    pub toolchain:            Toolchain,
    /// Text spliced around the snippet.
    #[builder(default)]
    #[serde(default)]
    pub harness:              Harness,
    /// Files written before running.
    #[builder(default)]
    #[serde(default)]
    pub fixtures:             Vec<Fixture>,
    /// Fixed paths rewritten into fixture paths.
    #[builder(default)]
    #[serde(default)]
    pub redirects:            Vec<Redirect>,
    /// Extra arguments for the run step.
    #[builder(default)]
    #[serde(default)]
    pub args:                 Vec<String>,
    /// Bytes fed to the run step.
    #[builder(into)]
    #[serde(default)]
    pub stdin:                Option<String>,
    /// Command run after the snippet, program first; `{scratch}` expands to
    /// the scratch directory. Its stdout replaces the snippet's.
    #[serde(default)]
    pub inspect:              Option<Vec<String>>,
    /// Case-insensitive patterns the snippet must not match.
    #[builder(default, with = |items: impl IntoIterator<Item = impl Into<String>>| {
        items.into_iter().map(Into::into).collect()
    })]
    #[serde(default)]
    pub forbid:               Vec<String>,
    /// Comparison applied to the output.
    pub expect:               Expectation,
    /// Stream the comparison reads.
    #[builder(default)]
    #[serde(default)]
    pub source:               OutputSource,
    /// Fail when the program exits non-zero, before comparing.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub require_success:      bool,
    /// Compile-step limit override, in seconds.
    #[serde(default)]
    pub compile_timeout_secs: Option<u64>,
    /// Run-step limit override, in seconds.
    #[serde(default)]
    pub run_timeout_secs:     Option<u64>,
}

/// Serde default for flags that start enabled.
fn default_true() -> bool {
    true
}

/// What an assertion does with the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Check {
    /// Compare the (optionally narrowed) answer directly.
    Text {
        /// How the text is pulled out of the answer.
        #[serde(default)]
        extract: ExtractPlan,
        /// Comparison applied to the text.
        expect:  Expectation,
    },
    /// Run extracted code and compare its output.
    Program(ProgramCheck),
    /// Ask a remote model.
    Judge(JudgeCriterion),
}

/// Collaborators available while grading.
#[derive(Debug, Clone, Default)]
pub struct GradeContext {
    /// Judge client, when credentials are configured.
    pub judge:        Option<JudgeClient>,
    /// Free-form context from the harness; `vars` feed judge prompts.
    pub context:      Option<Value>,
    /// Parent directory for scratch directories.
    pub scratch_root: Option<PathBuf>,
}

impl GradeContext {
    /// Context built from the process configuration.
    pub fn from_config() -> Self {
        let judge = match config::judge_client() {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::debug!("judge client unavailable: {err}");
                None
            }
        };
        Self {
            judge,
            context: None,
            scratch_root: None,
        }
    }

    /// Attaches harness context.
    pub fn with_context(mut self, context: Option<Value>) -> Self {
        self.context = context;
        self
    }
}

/// A named grading function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    /// Identifier, unique within a suite.
    pub name:        String,
    /// What the assertion checks.
    #[serde(default)]
    pub description: String,
    /// The check itself.
    pub check:       Check,
}

impl Assertion {
    /// Creates an assertion.
    pub fn new(name: impl Into<String>, description: impl Into<String>, check: Check) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            check,
        }
    }

    /// Grades `answer`. Never fails and never panics.
    pub async fn grade(&self, answer: &str, ctx: &GradeContext) -> Verdict {
        let span = tracing::info_span!("grade", assertion = %self.name, id = %Uuid::new_v4());
        let verdict = async {
            match AssertUnwindSafe(self.grade_unchecked(answer, ctx))
                .catch_unwind()
                .await
            {
                Ok(verdict) => verdict,
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::warn!("grading panicked: {message}");
                    Verdict::errored(format!("panic: {message}"))
                }
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| {
            tracing::info!(pass = verdict.passed, score = verdict.score, "graded");
        });
        verdict
    }

    /// Grades without the panic boundary.
    async fn grade_unchecked(&self, answer: &str, ctx: &GradeContext) -> Verdict {
        if answer.trim().is_empty() {
            return Verdict::fail("Empty response");
        }

        match &self.check {
            Check::Text { extract, expect } => grade_text(extract, expect, answer),
            Check::Program(program) => grade_program(program, answer, ctx).await,
            Check::Judge(criterion) => {
                judge(ctx.judge.as_ref(), criterion, answer, ctx.context.as_ref())
                    .await
                    .into()
            }
        }
    }
}

/// Compares the extracted text directly.
fn grade_text(plan: &ExtractPlan, expect: &Expectation, answer: &str) -> Verdict {
    let extraction = plan.apply(answer);
    let text = match plan.ascii {
        Some(true) => sanitize_ascii(extraction.text()),
        _ => extraction.text().to_string(),
    };

    let verdict = expect.evaluate(&text);
    if !verdict.passed && plan.is_guesswork(&extraction) && !plan.heuristics.is_empty() {
        verdict.annotate("no heuristic matched; graded the whole answer")
    } else {
        verdict
    }
}

/// Extract, guard, run, compare.
async fn grade_program(check: &ProgramCheck, answer: &str, ctx: &GradeContext) -> Verdict {
    let extraction = check.extract.apply(answer);
    let snippet = extraction.text();
    tracing::debug!(
        fenced = extraction.is_fenced(),
        language = extraction.language().unwrap_or(""),
        "extracted snippet"
    );

    match forbidden_match(&check.forbid, snippet) {
        Ok(Some(pattern)) => {
            return Verdict::fail(format!("Forbidden pattern `{pattern}` found in the snippet"));
        }
        Ok(None) => {}
        Err(err) => return Verdict::errored(format!("{err:#}")),
    }

    let runner = Runner::builder()
        .toolchain(check.toolchain.clone())
        .harness(check.harness.clone())
        .fixtures(check.fixtures.clone())
        .redirects(check.redirects.clone())
        .args(check.args.clone())
        .maybe_stdin(check.stdin.clone())
        .maybe_inspect(check.inspect.clone())
        .maybe_ascii_only(check.extract.ascii)
        .maybe_compile_timeout(check.compile_timeout_secs.map(Duration::from_secs))
        .maybe_run_timeout(check.run_timeout_secs.map(Duration::from_secs))
        .maybe_scratch_root(ctx.scratch_root.clone())
        .build();

    let result = runner.run(snippet).await;
    let unusable = result.timed_out || result.error.is_some();
    let verdict = if unusable || (check.require_success && !result.success()) {
        Verdict::fail(format!("Code execution failed: {}", result.failure_summary()))
    } else {
        let output = match check.source {
            OutputSource::Stdout => result.stdout.clone(),
            OutputSource::Combined => result.combined_output(),
        };
        check.expect.evaluate(&output)
    };

    if !verdict.passed && check.extract.is_guesswork(&extraction) {
        verdict.annotate(FALLBACK_NOTE)
    } else {
        verdict
    }
}

/// Returns the first pattern in `forbid` matching `snippet`.
fn forbidden_match<'a>(forbid: &'a [String], snippet: &str) -> Result<Option<&'a str>> {
    for pattern in forbid {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid forbid pattern `{pattern}`"))?;
        if regex.is_match(snippet) {
            return Ok(Some(pattern));
        }
    }
    Ok(None)
}

/// A list of assertions graded against the same answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    /// Assertions in grading order.
    pub assertions: Vec<Assertion>,
}

/// Accepted on-disk shapes for a suite.
#[derive(Deserialize)]
#[serde(untagged)]
enum SuiteFile {
    /// `{"assertions": [...]}`.
    Suite(Suite),
    /// `[...]`.
    List(Vec<Assertion>),
    /// A single assertion object.
    Single(Box<Assertion>),
}

impl Suite {
    /// Parses a suite from JSON: an object with `assertions`, a bare list, or
    /// a single assertion.
    pub fn from_json(text: &str) -> Result<Self> {
        let parsed: SuiteFile = serde_json::from_str(text).context("Could not parse suite JSON")?;
        Ok(match parsed {
            SuiteFile::Suite(suite) => suite,
            SuiteFile::List(assertions) => Suite { assertions },
            SuiteFile::Single(assertion) => Suite {
                assertions: vec![*assertion],
            },
        })
    }

    /// Reads and parses a suite file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read suite {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid suite {}", path.display()))
    }

    /// Grades `answer` against every assertion, in order.
    pub async fn grade_all(&self, answer: &str, ctx: &GradeContext) -> Vec<(String, Verdict)> {
        let mut verdicts = Vec::with_capacity(self.assertions.len());
        for assertion in &self.assertions {
            verdicts.push((assertion.name.clone(), assertion.grade(answer, ctx).await));
        }
        verdicts
    }
}
