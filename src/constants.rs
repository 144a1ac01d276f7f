#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Defaults shared across the crate.

/// Replacement spelling for a snippet's `int main` when the harness brings
/// its own entry point.
pub const MAIN_RENAME: &str = "int __delete_this__main";

/// Maximum length of process output embedded in a verdict reason.
pub const REASON_TRUNCATE: usize = 2_000;

/// Maximum length of a reason shown in a rendered table cell.
pub const TABLE_REASON_WIDTH: usize = 80;

/// Default compile-stage limit, in seconds.
pub const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 30;

/// Default run-stage limit, in seconds.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 10;

/// Default judge request limit, in seconds.
pub const DEFAULT_JUDGE_TIMEOUT_SECS: u64 = 30;

/// Time allowed for a `--version` probe in `doctor`.
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// OpenAI-compatible endpoint used when `OPENAI_ENDPOINT` is unset.
pub const DEFAULT_JUDGE_ENDPOINT: &str = "https://llmfoundry.straive.com/openai/v1";

/// Judge model used when `OPENAI_MODEL` is unset.
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4o-mini";

/// Project suffix appended to an `LLMFOUNDRY_TOKEN`.
pub const DEFAULT_JUDGE_PROJECT: &str = "my-test-project";
