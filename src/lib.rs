//! # verdict
//!
//! Reusable grading functions for LLM evaluation harnesses.
//!
//! A grading call takes a candidate answer and returns a [`Verdict`]
//! (`pass`, `score`, `reason`). Most assertions follow the same linear
//! pipeline:
//!
//! 1. [`extract`] pulls a fenced block (or a heuristic match, or the whole
//!    answer) out of the free-form text.
//! 2. [`runner`] writes it into a private scratch directory, runs it with an
//!    external toolchain under a timeout, and captures the output.
//! 3. [`verdict`] compares the output with an expected literal.
//!
//! The [`judge`] module replaces step 3 with a remote model call. The
//! [`assertion`] module ties the stages together behind a boundary that never
//! errors, and [`catalog`] ships ready-made assertions.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Grading-function boundary and suites
pub mod assertion;
/// Built-in assertions
pub mod catalog;
/// Environment-driven configuration
pub mod config;
/// Shared defaults
pub mod constants;
/// Payload extraction from free-form answers
pub mod extract;
/// Toolchain and judge availability checks
pub mod health;
/// Remote model judge
pub mod judge;
/// Child process execution with deadlines
pub mod process;
/// Table and JSON rendering of verdicts
pub mod report;
/// Scratch-directory snippet execution
pub mod runner;
/// Small string helpers
pub mod util;
/// Verdict record and comparison modes
pub mod verdict;

pub use assertion::{Assertion, Check, GradeContext, Suite};
pub use extract::{Extraction, extract_code};
pub use runner::{ExecutionResult, Runner, Toolchain};
pub use verdict::{Expectation, Verdict};
